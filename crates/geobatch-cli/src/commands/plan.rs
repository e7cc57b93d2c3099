use anyhow::Result;
use serde::Serialize;

use geobatch_core::config::LayeredConfig;
use geobatch_engine::plan_tile;

use crate::cli::PlanArgs;
use crate::output::OutputWriter;

#[derive(Debug, Serialize)]
struct PlanOutput {
    band_count: u32,
    latitude: f64,
    scale_m: f64,
    byte_limit: u64,
    bytes_per_band: u32,
    safety_margin: f64,
    pixels_per_side: u64,
    width_deg: f64,
    height_deg: f64,
    estimated_bytes: u128,
}

pub fn execute(args: PlanArgs, config: &LayeredConfig, output: &OutputWriter) -> Result<()> {
    let settings = config.settings()?;
    let byte_limit = args.byte_limit.unwrap_or(settings.byte_limit);
    let bytes_per_band = args.bytes_per_band.unwrap_or(settings.bytes_per_band);

    let plan = plan_tile(
        args.bands,
        settings.scale_m,
        byte_limit,
        bytes_per_band,
        settings.safety_margin,
        args.latitude,
    )?;
    let estimated_bytes = plan.estimated_bytes(args.bands, bytes_per_band);

    if output.is_json() {
        output.result(PlanOutput {
            band_count: args.bands,
            latitude: args.latitude,
            scale_m: settings.scale_m,
            byte_limit,
            bytes_per_band,
            safety_margin: settings.safety_margin,
            pixels_per_side: plan.pixels_per_side,
            width_deg: plan.width_deg,
            height_deg: plan.height_deg,
            estimated_bytes,
        })?;
        return Ok(());
    }

    output.section("Tile Plan");
    output.kv("Bands", args.bands);
    output.kv("Latitude", format!("{:.4}°", args.latitude));
    output.kv("Scale", format!("{} m", settings.scale_m));
    output.kv(
        "Budget",
        format!("{} bytes × {}", byte_limit, settings.safety_margin),
    );
    output.kv("Pixels per side", plan.pixels_per_side);
    output.kv("Width", format!("{:.6}°", plan.width_deg));
    output.kv("Height", format!("{:.6}°", plan.height_deg));
    output.kv("Estimated payload", format!("{} bytes", estimated_bytes));

    Ok(())
}
