use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use geobatch_core::config::LayeredConfig;
use geobatch_engine::build_mosaic;

use crate::cli::MosaicArgs;
use crate::output::OutputWriter;

#[derive(Debug, Tabled)]
struct TileRow {
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Bands")]
    bands: usize,
    #[tabled(rename = "Bounds")]
    bounds: String,
}

#[derive(Debug, Serialize)]
struct MosaicOutput {
    dir: String,
    tiles: usize,
    excluded: usize,
    skipped: Vec<String>,
    band_names: Vec<String>,
    bounds: [f64; 4],
    pixel_size: (f64, f64),
    vrt: Option<String>,
}

pub fn execute(args: MosaicArgs, config: &LayeredConfig, output: &OutputWriter) -> Result<()> {
    let settings = config.settings()?;
    let mosaic = build_mosaic(&settings.tile_dir, &settings.exclude_pattern)?;

    if let Some(ref vrt) = args.vrt {
        mosaic.write_vrt(vrt, &settings.crs)?;
    }

    let bounds = mosaic.bounds();
    if output.is_json() {
        output.result(MosaicOutput {
            dir: mosaic.dir().display().to_string(),
            tiles: mosaic.tile_count(),
            excluded: mosaic.excluded_count(),
            skipped: mosaic.skipped().iter().map(|p| p.display().to_string()).collect(),
            band_names: mosaic.band_names().to_vec(),
            bounds: [bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y],
            pixel_size: mosaic.pixel_size(),
            vrt: args.vrt.as_ref().map(|p| p.display().to_string()),
        })?;
        return Ok(());
    }

    output.section("Mosaic");
    output.kv("Directory", mosaic.dir().display());
    output.kv("Tiles", mosaic.tile_count());
    output.kv("Excluded", mosaic.excluded_count());
    output.kv("Bands", mosaic.band_names().join(", "));
    output.kv(
        "Bounds",
        format!(
            "[{:.6}, {:.6}, {:.6}, {:.6}]",
            bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y
        ),
    );

    let rows: Vec<TileRow> = mosaic
        .tiles()
        .map(|tile| {
            let b = tile.bounds();
            TileRow {
                file: tile
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                size: format!("{}×{}", tile.header.width, tile.header.height),
                bands: tile.header.band_count,
                bounds: format!("[{:.4}, {:.4}, {:.4}, {:.4}]", b.min_x, b.min_y, b.max_x, b.max_y),
            }
        })
        .collect();
    output.section("Tiles");
    output.table(rows);

    for path in mosaic.skipped() {
        output.warning(format!("Skipped unreadable tile {}", path.display()));
    }
    if let Some(vrt) = args.vrt {
        output.success(format!("Wrote {}", vrt.display()));
    }

    Ok(())
}
