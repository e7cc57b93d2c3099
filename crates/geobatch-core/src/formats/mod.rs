//! Input formats for plot batches

pub mod geojson;

pub use self::geojson::{parse_plots, read_plots, PlotReader};
