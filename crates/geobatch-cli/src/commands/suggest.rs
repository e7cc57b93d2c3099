use anyhow::Result;
use serde::Serialize;

use geobatch_core::formats::geojson::PlotReader;
use geobatch_core::models::{ExecutionMode, WorkloadProfile};
use geobatch_engine::{breakeven_threshold, profile_and_suggest};

use crate::cli::SuggestArgs;
use crate::errors;
use crate::output::OutputWriter;

#[derive(Debug, Serialize)]
struct SuggestOutput {
    profile: WorkloadProfile,
    breakeven_threshold: usize,
    suggested_mode: ExecutionMode,
}

pub fn execute(args: SuggestArgs, output: &OutputWriter) -> Result<()> {
    if !args.plots.exists() {
        return Err(errors::plots_not_found(&args.plots).into());
    }

    let reader = PlotReader::new(args.id_property);
    let plots = reader.read(&args.plots)?;
    let file_size_mb = PlotReader::file_size_mb(&args.plots)?;

    let (profile, mode) = profile_and_suggest(&plots, file_size_mb);
    let threshold = breakeven_threshold(profile.mean_area_ha, profile.mean_vertex_count);

    if output.is_json() {
        output.result(SuggestOutput {
            profile,
            breakeven_threshold: threshold,
            suggested_mode: mode,
        })?;
        return Ok(());
    }

    output.section("Workload Profile");
    output.kv("Features", profile.feature_count);
    output.kv(
        "Geometry type",
        profile
            .feature_type
            .map(|kind| format!("{:?}", kind))
            .unwrap_or_else(|| "mixed".to_string()),
    );
    output.kv("Mean area", format!("{:.2} ha", profile.mean_area_ha));
    output.kv("Max area", format!("{:.2} ha", profile.max_area_ha));
    output.kv("Mean vertices", format!("{:.1}", profile.mean_vertex_count));
    output.kv("Max vertices", profile.max_vertex_count);
    output.kv("File size", format!("{:.2} MB", profile.file_size_mb));

    output.section("Suggestion");
    output.kv("Breakeven threshold", format!("{} features", threshold));
    output.success(format!("Suggested mode: {}", mode));

    Ok(())
}
