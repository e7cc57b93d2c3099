//! GeoTIFF tile codec.
//!
//! Tiles are north-up rasters georeferenced through the ModelTiepoint and
//! ModelPixelScale tags. Bands are read either from interleaved samples of one
//! image or from consecutive same-sized images in the file. The encoder writes
//! one float32 image per band, with the band name in ImageDescription.

use std::fs;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

use geobatch_core::error::{GeobatchError, Result};
use geobatch_core::models::Bounds;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GDAL_NODATA: u16 = 42113;

fn geotiff_tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Affine placement of a north-up raster
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// X of the top-left corner
    pub origin_x: f64,
    /// Y of the top-left corner
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Positive; rows advance southward
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Transform placing a `width` x `height` grid over `bounds`
    pub fn from_bounds(bounds: &Bounds, width: u32, height: u32) -> Self {
        Self {
            origin_x: bounds.min_x,
            origin_y: bounds.max_y,
            pixel_width: bounds.width() / width.max(1) as f64,
            pixel_height: bounds.height() / height.max(1) as f64,
        }
    }

    pub fn bounds(&self, width: u32, height: u32) -> Bounds {
        Bounds::new(
            self.origin_x,
            self.origin_y - height as f64 * self.pixel_height,
            self.origin_x + width as f64 * self.pixel_width,
            self.origin_y,
        )
    }

    /// Centre of pixel (`col`, `row`)
    pub fn pixel_center(&self, col: u32, row: u32) -> [f64; 2] {
        [
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y - (row as f64 + 0.5) * self.pixel_height,
        ]
    }

    /// Fractional pixel coordinates of a point
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.origin_x) / self.pixel_width, (self.origin_y - y) / self.pixel_height)
    }
}

/// Size and placement of a tile, read without decoding pixels
#[derive(Debug, Clone, PartialEq)]
pub struct TileHeader {
    pub width: u32,
    pub height: u32,
    pub transform: GeoTransform,
    pub band_count: usize,
    pub band_names: Vec<Option<String>>,
    pub nodata: Option<f64>,
    /// Images holding the bands; more than one means one band per image
    pub images: usize,
}

impl TileHeader {
    pub fn bounds(&self) -> Bounds {
        self.transform.bounds(self.width, self.height)
    }
}

/// A decoded multi-band tile
#[derive(Debug, Clone, PartialEq)]
pub struct RasterTile {
    pub width: u32,
    pub height: u32,
    pub transform: GeoTransform,
    /// Row-major pixel values per band
    pub bands: Vec<Vec<f32>>,
    pub band_names: Vec<Option<String>>,
    pub nodata: Option<f64>,
}

impl RasterTile {
    /// Tile filled with one constant per band
    pub fn filled(bounds: &Bounds, width: u32, height: u32, values: &[f32]) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            width,
            height,
            transform: GeoTransform::from_bounds(bounds, width, height),
            bands: values.iter().map(|v| vec![*v; pixels]).collect(),
            band_names: vec![None; values.len()],
            nodata: None,
        }
    }

    pub fn with_band_names(mut self, names: &[String]) -> Self {
        self.band_names = names.iter().map(|n| Some(n.clone())).collect();
        self.band_names.resize(self.bands.len(), None);
        self
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn bounds(&self) -> Bounds {
        self.transform.bounds(self.width, self.height)
    }

    /// Value of one pixel; `None` outside the grid, for nodata, and for NaN
    pub fn value(&self, band: usize, col: u32, row: u32) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        let value = *self.bands.get(band)?.get(row as usize * self.width as usize + col as usize)?;
        if value.is_nan() || self.nodata.is_some_and(|nd| value as f64 == nd) {
            return None;
        }
        Some(value)
    }

    /// Pixel containing a point, if inside the tile
    pub fn pixel_at(&self, x: f64, y: f64) -> Option<(u32, u32)> {
        let (col, row) = self.transform.to_pixel(x, y);
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (col, row) = (col.floor() as u64, row.floor() as u64);
        if col >= self.width as u64 || row >= self.height as u64 {
            return None;
        }
        Some((col as u32, row as u32))
    }
}

fn raster_error(path: &Path, reason: impl std::fmt::Display) -> GeobatchError {
    GeobatchError::Raster { path: path.to_path_buf(), reason: reason.to_string() }
}

fn read_transform<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    source: &Path,
) -> Result<GeoTransform> {
    let tiepoint = decoder
        .get_tag_f64_vec(geotiff_tag(MODEL_TIEPOINT))
        .map_err(|e| raster_error(source, format!("missing ModelTiepoint: {}", e)))?;
    let scale = decoder
        .get_tag_f64_vec(geotiff_tag(MODEL_PIXEL_SCALE))
        .map_err(|e| raster_error(source, format!("missing ModelPixelScale: {}", e)))?;

    if tiepoint.len() < 6 || scale.len() < 2 {
        return Err(raster_error(source, "malformed georeferencing tags"));
    }
    if scale[0] <= 0.0 || scale[1] <= 0.0 {
        return Err(raster_error(source, "pixel scale must be positive"));
    }

    // Tiepoint is [i, j, k, x, y, z]: raster (i, j) sits at model (x, y)
    Ok(GeoTransform {
        origin_x: tiepoint[3] - tiepoint[0] * scale[0],
        origin_y: tiepoint[4] + tiepoint[1] * scale[1],
        pixel_width: scale[0],
        pixel_height: scale[1],
    })
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    decoder
        .get_tag_ascii_string(geotiff_tag(GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim().trim_end_matches('\0').parse().ok())
}

fn samples_per_pixel<R: Read + Seek>(decoder: &mut Decoder<R>) -> usize {
    decoder.get_tag_u32(Tag::SamplesPerPixel).map(|s| s.max(1) as usize).unwrap_or(1)
}

fn image_description<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<String> {
    decoder
        .get_tag_ascii_string(Tag::ImageDescription)
        .ok()
        .map(|s| s.trim_end_matches('\0').to_string())
        .filter(|s| !s.is_empty())
}

fn to_f32(result: DecodingResult) -> Vec<f32> {
    match result {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
    }
}

/// Walk the images of a file, calling `visit` for each one matching the first
/// image's dimensions. Differently sized images (overviews) end the walk.
fn for_each_band_image<R, F>(decoder: &mut Decoder<R>, source: &Path, mut visit: F) -> Result<()>
where
    R: Read + Seek,
    F: FnMut(&mut Decoder<R>) -> Result<()>,
{
    let dimensions = decoder.dimensions().map_err(|e| raster_error(source, e))?;
    loop {
        visit(decoder)?;
        if !decoder.more_images() {
            return Ok(());
        }
        decoder.next_image().map_err(|e| raster_error(source, e))?;
        if decoder.dimensions().map_err(|e| raster_error(source, e))? != dimensions {
            return Ok(());
        }
    }
}

fn read_header_from<R: Read + Seek>(reader: R, source: &Path) -> Result<TileHeader> {
    let mut decoder = Decoder::new(reader).map_err(|e| raster_error(source, e))?;
    let (width, height) = decoder.dimensions().map_err(|e| raster_error(source, e))?;
    if width == 0 || height == 0 {
        return Err(raster_error(source, "raster has no pixels"));
    }
    let transform = read_transform(&mut decoder, source)?;
    let nodata = read_nodata(&mut decoder);

    let mut band_names = Vec::new();
    let mut images = 0;
    for_each_band_image(&mut decoder, source, |decoder| {
        images += 1;
        let samples = samples_per_pixel(decoder);
        if samples == 1 {
            band_names.push(image_description(decoder));
        } else {
            band_names.extend(std::iter::repeat(None).take(samples));
        }
        Ok(())
    })?;

    Ok(TileHeader {
        width,
        height,
        transform,
        band_count: band_names.len(),
        band_names,
        nodata,
        images,
    })
}

fn decode_from<R: Read + Seek>(reader: R, source: &Path) -> Result<RasterTile> {
    let mut decoder = Decoder::new(reader).map_err(|e| raster_error(source, e))?;
    let (width, height) = decoder.dimensions().map_err(|e| raster_error(source, e))?;
    if width == 0 || height == 0 {
        return Err(raster_error(source, "raster has no pixels"));
    }
    let transform = read_transform(&mut decoder, source)?;
    let nodata = read_nodata(&mut decoder);
    let pixels = width as usize * height as usize;

    let mut bands = Vec::new();
    let mut band_names = Vec::new();
    for_each_band_image(&mut decoder, source, |decoder| {
        let samples = samples_per_pixel(decoder);
        let name = if samples == 1 { image_description(decoder) } else { None };
        let data = to_f32(decoder.read_image().map_err(|e| raster_error(source, e))?);
        if data.len() < pixels * samples {
            return Err(raster_error(
                source,
                format!("expected {} values, decoded {}", pixels * samples, data.len()),
            ));
        }

        if samples == 1 {
            bands.push(data);
            band_names.push(name);
        } else {
            for sample in 0..samples {
                bands.push(data.iter().skip(sample).step_by(samples).take(pixels).copied().collect());
                band_names.push(None);
            }
        }
        Ok(())
    })?;

    Ok(RasterTile { width, height, transform, bands, band_names, nodata })
}

/// Read size, placement and band layout of a GeoTIFF file
pub fn read_header(path: &Path) -> Result<TileHeader> {
    let file = fs::File::open(path).map_err(|e| raster_error(path, e))?;
    read_header_from(std::io::BufReader::new(file), path)
}

/// Decode a GeoTIFF file
pub fn read_geotiff(path: &Path) -> Result<RasterTile> {
    let file = fs::File::open(path).map_err(|e| raster_error(path, e))?;
    decode_from(std::io::BufReader::new(file), path)
}

/// Decode GeoTIFF bytes; `source` names them in errors
pub fn decode_geotiff(bytes: &[u8], source: &Path) -> Result<RasterTile> {
    decode_from(Cursor::new(bytes), source)
}

/// Check that bytes are a readable, georeferenced GeoTIFF
pub fn probe_geotiff(bytes: &[u8]) -> Result<TileHeader> {
    read_header_from(Cursor::new(bytes), Path::new("<payload>")).map_err(|e| {
        GeobatchError::InvalidPayload { reason: e.to_string() }
    })
}

/// Encode a tile as GeoTIFF, one float32 image per band
pub fn encode_geotiff(tile: &RasterTile) -> Result<Vec<u8>> {
    let source = Path::new("<encoder>");
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buffer).map_err(|e| raster_error(source, e))?;
        let tiepoint = [0.0, 0.0, 0.0, tile.transform.origin_x, tile.transform.origin_y, 0.0];
        let scale = [tile.transform.pixel_width, tile.transform.pixel_height, 0.0];
        let nodata = tile.nodata.map(|v| v.to_string());

        for (index, band) in tile.bands.iter().enumerate() {
            let mut image = encoder
                .new_image::<colortype::Gray32Float>(tile.width, tile.height)
                .map_err(|e| raster_error(source, e))?;
            let directory = image.encoder();
            directory
                .write_tag(geotiff_tag(MODEL_TIEPOINT), &tiepoint[..])
                .map_err(|e| raster_error(source, e))?;
            directory
                .write_tag(geotiff_tag(MODEL_PIXEL_SCALE), &scale[..])
                .map_err(|e| raster_error(source, e))?;
            if let Some(nodata) = &nodata {
                directory
                    .write_tag(geotiff_tag(GDAL_NODATA), nodata.as_str())
                    .map_err(|e| raster_error(source, e))?;
            }
            if let Some(Some(name)) = tile.band_names.get(index) {
                directory
                    .write_tag(Tag::ImageDescription, name.as_str())
                    .map_err(|e| raster_error(source, e))?;
            }
            image.write_data(band).map_err(|e| raster_error(source, e))?;
        }
    }
    Ok(buffer.into_inner())
}

/// Encode and write a tile to `path`
pub fn write_geotiff(tile: &RasterTile, path: &Path) -> Result<()> {
    let bytes = encode_geotiff(tile)?;
    fs::write(path, bytes)?;
    Ok(())
}
