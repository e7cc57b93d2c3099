use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

use geobatch_core::config::LayeredConfig;
use geobatch_core::formats::geojson::PlotReader;
use geobatch_core::layers::{load_layer_specs, LayerComposer, LayerFailure};
use geobatch_core::models::{ExecutionMode, Reduction, ResultTable};
use geobatch_engine::{profile_and_suggest, BatchPipeline, BatchSummary, HttpRemoteService};
use geobatch_geo::DecoyTransform;

use crate::cli::{ModeArg, RunArgs};
use crate::errors;
use crate::output::{format_value, OutputWriter};
use crate::progress::RunProgress;

#[derive(Debug, Serialize)]
struct RunOutput<'a> {
    summary: &'a BatchSummary,
    layer_failures: &'a [LayerFailure],
    output: Option<String>,
    table: &'a ResultTable,
}

pub async fn execute(args: RunArgs, config: &LayeredConfig, output: &OutputWriter) -> Result<()> {
    let settings = config.settings()?;
    let service_url = config
        .service_url
        .value
        .clone()
        .ok_or_else(errors::service_url_missing)?;

    if !args.plots.exists() {
        return Err(errors::plots_not_found(&args.plots).into());
    }
    if !args.layers.exists() {
        return Err(errors::layers_not_found(&args.layers).into());
    }

    let operations = args
        .operations
        .iter()
        .map(|op| op.trim().parse::<Reduction>())
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let progress = RunProgress::new(output.is_json());

    // Plots
    let reader = PlotReader::new(args.id_property.clone());
    let plots = reader.read(&args.plots)?;
    let file_size_mb = PlotReader::file_size_mb(&args.plots)?;
    progress.finish_load(plots.len(), file_size_mb);

    // Layers
    let specs = load_layer_specs(&args.layers)?;
    let composition = LayerComposer::from_specs(specs).compose();
    progress.finish_layers(composition.expression.band_count(), composition.failures.len());
    for failure in &composition.failures {
        output.warning(format!("Layer '{}' skipped: {}", failure.name, failure.reason));
    }
    if composition.expression.is_empty() {
        return Err(errors::no_layers().into());
    }

    let mode = match args.mode {
        ModeArg::Auto => {
            let (profile, mode) = profile_and_suggest(&plots, file_size_mb);
            tracing::info!(
                features = profile.feature_count,
                mean_area_ha = profile.mean_area_ha,
                mode = mode.as_str(),
                "Selected execution mode"
            );
            mode
        }
        ModeArg::Sequential => ExecutionMode::Sequential,
        ModeArg::Concurrent => ExecutionMode::Concurrent,
        ModeArg::Local => ExecutionMode::Local,
    };

    let mut pipeline = BatchPipeline::new(Arc::new(HttpRemoteService::new(service_url)), settings)
        .with_operations(operations);
    if args.decoys > 0 {
        let seed = args
            .seed
            .unwrap_or_else(|| chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64);
        pipeline = pipeline.with_transform(Arc::new(DecoyTransform::new(
            args.decoys,
            args.decoy_min_km,
            args.decoy_max_km,
            seed,
        )));
    }

    let cancel = pipeline.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after in-flight requests");
            cancel.cancel();
        }
    });

    progress.start_batch(mode.as_str());
    let result = pipeline.run(&composition.expression, &plots, mode).await;
    ctrl_c.abort();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            progress.fail_batch(&e.to_string());
            return Err(e.into());
        }
    };
    progress.finish_batch(outcome.summary.succeeded, outcome.summary.total);

    if let Some(ref path) = args.output {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file {}", path.display()))?;
        outcome.table.write_csv(BufWriter::new(file))?;
    }

    if output.is_json() {
        output.result(RunOutput {
            summary: &outcome.summary,
            layer_failures: &composition.failures,
            output: args.output.as_ref().map(|p| p.display().to_string()),
            table: &outcome.table,
        })?;
        return Ok(());
    }

    let summary = &outcome.summary;
    output.section("Batch Summary");
    output.kv("Run", summary.run_id);
    output.kv("Mode", summary.mode);
    output.kv("Plots", summary.total);
    output.kv("Succeeded", summary.succeeded);
    output.kv("Missing", summary.failed);
    if summary.invalid_geometries > 0 {
        output.kv("Invalid geometries", summary.invalid_geometries);
    }
    if summary.mode == ExecutionMode::Local {
        output.kv("Mosaic tiles", summary.mosaic_tiles);
        output.kv("Failed tiles", summary.failed_tiles);
        output.kv("Decoy tiles", summary.decoy_tiles);
        output.kv("Replans", summary.replans);
    }
    output.kv("Failed chunks", summary.failed_chunks);
    output.kv(
        "Duration",
        format!(
            "{:.1}s",
            (summary.finished_at - summary.started_at).num_milliseconds() as f64 / 1000.0
        ),
    );

    if args.preview > 0 && !outcome.table.is_empty() {
        output.section("Results");
        let mut header = vec!["feature_id".to_string()];
        header.extend(outcome.table.columns.iter().cloned());
        let rows = outcome
            .table
            .rows
            .iter()
            .take(args.preview)
            .map(|row| {
                let mut cells = vec![row.feature_id.to_string()];
                cells.extend(row.values.iter().map(|v| format_value(*v)));
                cells
            })
            .collect();
        output.grid(header, rows);
        if outcome.table.len() > args.preview {
            output.info(format!("{} more rows not shown", outcome.table.len() - args.preview));
        }
    }

    match args.output {
        Some(path) => output.success(format!("Wrote {} rows to {}", outcome.table.len(), path.display())),
        None => output.info("No --output given; result table not written"),
    }

    Ok(())
}
