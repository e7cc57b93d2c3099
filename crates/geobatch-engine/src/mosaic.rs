//! Mosaic assembly.
//!
//! A mosaic is a spatial index over every eligible tile file in a directory.
//! Pixels stay in the files; readers look tiles up by envelope and decode
//! them on demand.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use rayon::prelude::*;
use regex::Regex;
use rstar::{RTree, RTreeObject, AABB};

use geobatch_core::error::{GeobatchError, Result};
use geobatch_core::models::{Bounds, Crs};

use crate::raster::{read_header, TileHeader};

/// One tile file in a mosaic
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicTile {
    pub path: PathBuf,
    pub header: TileHeader,
    bounds: Bounds,
}

impl MosaicTile {
    pub fn new(path: PathBuf, header: TileHeader) -> Self {
        let bounds = header.bounds();
        Self { path, header, bounds }
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }
}

impl RTreeObject for MosaicTile {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners([self.bounds.min_x, self.bounds.min_y], [self.bounds.max_x, self.bounds.max_y])
    }
}

/// Virtual raster over a directory of tiles
#[derive(Debug)]
pub struct Mosaic {
    dir: PathBuf,
    index: RTree<MosaicTile>,
    bounds: Bounds,
    band_names: Vec<String>,
    pixel_width: f64,
    pixel_height: f64,
    excluded: usize,
    skipped: Vec<PathBuf>,
}

fn is_raster_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
        .unwrap_or(false)
}

/// Build a mosaic from the raster files in `tile_dir`
///
/// Files whose name matches `exclude_pattern` are left out. Unreadable tiles
/// and tiles whose band count differs from the first readable tile are
/// skipped with a warning. No eligible tile at all is a fatal error.
pub fn build_mosaic(tile_dir: &Path, exclude_pattern: &str) -> Result<Mosaic> {
    scan_tiles(tile_dir, exclude_pattern, None)
}

/// Like [`build_mosaic`], but only tiles with exactly `band_count` bands
/// are eligible
pub fn build_mosaic_with_bands(
    tile_dir: &Path,
    exclude_pattern: &str,
    band_count: usize,
) -> Result<Mosaic> {
    scan_tiles(tile_dir, exclude_pattern, Some(band_count))
}

fn scan_tiles(tile_dir: &Path, exclude_pattern: &str, required_bands: Option<usize>) -> Result<Mosaic> {
    let exclude = Regex::new(exclude_pattern).map_err(|e| GeobatchError::ConfigInvalid {
        key: "exclude_pattern".to_string(),
        reason: e.to_string(),
    })?;

    let entries = match fs::read_dir(tile_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(GeobatchError::MosaicEmpty { dir: tile_dir.to_path_buf() });
        }
        Err(e) => return Err(e.into()),
    };

    let mut excluded = 0;
    let mut candidates = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() || !is_raster_file(&path) {
            continue;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if exclude.is_match(name) {
            tracing::debug!(file = %name, "Excluding tile from mosaic");
            excluded += 1;
            continue;
        }
        candidates.push(path);
    }
    candidates.sort();

    let headers: Vec<(PathBuf, Result<TileHeader>)> = candidates
        .into_par_iter()
        .map(|path| {
            let header = read_header(&path);
            (path, header)
        })
        .collect();

    let mut tiles = Vec::with_capacity(headers.len());
    let mut skipped = Vec::new();
    let mut band_count = required_bands;
    for (path, header) in headers {
        match header {
            Ok(header) => {
                let expected = *band_count.get_or_insert(header.band_count);
                if header.band_count != expected {
                    tracing::warn!(
                        path = %path.display(),
                        bands = header.band_count,
                        expected,
                        "Skipping tile with mismatched band count"
                    );
                    skipped.push(path);
                    continue;
                }
                tiles.push(MosaicTile::new(path, header));
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable tile");
                skipped.push(path);
            }
        }
    }

    let Some(first) = tiles.first() else {
        return Err(GeobatchError::MosaicEmpty { dir: tile_dir.to_path_buf() });
    };

    let band_names = first
        .header
        .band_names
        .iter()
        .enumerate()
        .map(|(i, name)| name.clone().unwrap_or_else(|| format!("b{}", i + 1)))
        .collect();
    let mut bounds = first.bounds();
    let mut pixel_width = first.header.transform.pixel_width;
    let mut pixel_height = first.header.transform.pixel_height;
    for tile in &tiles[1..] {
        bounds = bounds.union(&tile.bounds());
        pixel_width = pixel_width.min(tile.header.transform.pixel_width);
        pixel_height = pixel_height.min(tile.header.transform.pixel_height);
    }

    tracing::info!(
        dir = %tile_dir.display(),
        tiles = tiles.len(),
        excluded,
        skipped = skipped.len(),
        "Built mosaic"
    );

    Ok(Mosaic {
        dir: tile_dir.to_path_buf(),
        index: RTree::bulk_load(tiles),
        bounds,
        band_names,
        pixel_width,
        pixel_height,
        excluded,
        skipped,
    })
}

fn xml_error(e: impl std::fmt::Display) -> GeobatchError {
    GeobatchError::Format { format: "VRT".to_string(), reason: e.to_string() }
}

impl Mosaic {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tile_count(&self) -> usize {
        self.index.size()
    }

    pub fn tiles(&self) -> impl Iterator<Item = &MosaicTile> {
        self.index.iter()
    }

    /// Union of all tile extents
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn band_names(&self) -> &[String] {
        &self.band_names
    }

    pub fn band_count(&self) -> usize {
        self.band_names.len()
    }

    /// Finest pixel width and height across tiles
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.pixel_width, self.pixel_height)
    }

    /// Files left out by the exclude pattern
    pub fn excluded_count(&self) -> usize {
        self.excluded
    }

    /// Files that could not be used
    pub fn skipped(&self) -> &[PathBuf] {
        &self.skipped
    }

    /// Rename the bands, e.g. after the layers that produced them
    pub fn with_band_names(mut self, names: Vec<String>) -> Result<Self> {
        if names.len() != self.band_names.len() {
            return Err(GeobatchError::ConfigInvalid {
                key: "layers".to_string(),
                reason: format!(
                    "mosaic has {} bands but {} band names were given",
                    self.band_names.len(),
                    names.len()
                ),
            });
        }
        self.band_names = names;
        Ok(self)
    }

    /// Tiles whose extent touches `bounds`
    pub fn tiles_intersecting(&self, bounds: &Bounds) -> Vec<&MosaicTile> {
        let envelope =
            AABB::from_corners([bounds.min_x, bounds.min_y], [bounds.max_x, bounds.max_y]);
        self.index.locate_in_envelope_intersecting(&envelope).collect()
    }

    /// Render a GDAL VRT document referencing every tile
    pub fn to_vrt(&self, crs: &Crs) -> Result<String> {
        let columns = (self.bounds.width() / self.pixel_width).round().max(1.0) as u64;
        let rows = (self.bounds.height() / self.pixel_height).round().max(1.0) as u64;

        let mut tiles: Vec<&MosaicTile> = self.tiles().collect();
        tiles.sort_by(|a, b| a.path.cmp(&b.path));

        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        let mut dataset = BytesStart::new("VRTDataset");
        dataset.push_attribute(("rasterXSize", columns.to_string().as_str()));
        dataset.push_attribute(("rasterYSize", rows.to_string().as_str()));
        writer.write_event(Event::Start(dataset)).map_err(xml_error)?;

        write_text_element(&mut writer, "SRS", &crs.code())?;
        let geo_transform = format!(
            "{}, {}, 0, {}, 0, {}",
            self.bounds.min_x, self.pixel_width, self.bounds.max_y, -self.pixel_height
        );
        write_text_element(&mut writer, "GeoTransform", &geo_transform)?;

        for (band_index, band_name) in self.band_names.iter().enumerate() {
            let mut band = BytesStart::new("VRTRasterBand");
            band.push_attribute(("dataType", "Float32"));
            band.push_attribute(("band", (band_index + 1).to_string().as_str()));
            writer.write_event(Event::Start(band)).map_err(xml_error)?;
            write_text_element(&mut writer, "Description", band_name)?;

            for tile in &tiles {
                self.write_source(&mut writer, tile, band_index)?;
            }

            writer.write_event(Event::End(BytesEnd::new("VRTRasterBand"))).map_err(xml_error)?;
        }

        writer.write_event(Event::End(BytesEnd::new("VRTDataset"))).map_err(xml_error)?;
        String::from_utf8(writer.into_inner()).map_err(xml_error)
    }

    fn write_source(
        &self,
        writer: &mut Writer<Vec<u8>>,
        tile: &MosaicTile,
        band_index: usize,
    ) -> Result<()> {
        let header = &tile.header;
        let path = tile.path.display().to_string();
        // Bands stored one per image are addressed as GTiff sub-directories
        let (source_name, source_band) = if header.images > 1 {
            (format!("GTIFF_DIR:{}:{}", band_index + 1, path), 1)
        } else {
            (path, band_index + 1)
        };

        let bounds = tile.bounds();
        let x_off = (bounds.min_x - self.bounds.min_x) / self.pixel_width;
        let y_off = (self.bounds.max_y - bounds.max_y) / self.pixel_height;
        let x_size = bounds.width() / self.pixel_width;
        let y_size = bounds.height() / self.pixel_height;

        writer.write_event(Event::Start(BytesStart::new("SimpleSource"))).map_err(xml_error)?;

        let mut filename = BytesStart::new("SourceFilename");
        filename.push_attribute(("relativeToVRT", "0"));
        writer.write_event(Event::Start(filename)).map_err(xml_error)?;
        writer.write_event(Event::Text(BytesText::new(&source_name))).map_err(xml_error)?;
        writer.write_event(Event::End(BytesEnd::new("SourceFilename"))).map_err(xml_error)?;

        write_text_element(writer, "SourceBand", &source_band.to_string())?;

        let mut src_rect = BytesStart::new("SrcRect");
        src_rect.push_attribute(("xOff", "0"));
        src_rect.push_attribute(("yOff", "0"));
        src_rect.push_attribute(("xSize", header.width.to_string().as_str()));
        src_rect.push_attribute(("ySize", header.height.to_string().as_str()));
        writer.write_event(Event::Empty(src_rect)).map_err(xml_error)?;

        let mut dst_rect = BytesStart::new("DstRect");
        dst_rect.push_attribute(("xOff", format!("{}", x_off.round()).as_str()));
        dst_rect.push_attribute(("yOff", format!("{}", y_off.round()).as_str()));
        dst_rect.push_attribute(("xSize", format!("{}", x_size.round()).as_str()));
        dst_rect.push_attribute(("ySize", format!("{}", y_size.round()).as_str()));
        writer.write_event(Event::Empty(dst_rect)).map_err(xml_error)?;

        writer.write_event(Event::End(BytesEnd::new("SimpleSource"))).map_err(xml_error)?;
        Ok(())
    }

    /// Write the VRT document to `path`
    pub fn write_vrt(&self, path: &Path, crs: &Crs) -> Result<()> {
        fs::write(path, self.to_vrt(crs)?)?;
        Ok(())
    }
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name))).map_err(xml_error)?;
    writer.write_event(Event::Text(BytesText::new(text))).map_err(xml_error)?;
    writer.write_event(Event::End(BytesEnd::new(name))).map_err(xml_error)?;
    Ok(())
}
