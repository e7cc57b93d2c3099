pub mod geometry;
pub mod mode;
pub mod plot;
pub mod profile;
pub mod table;

pub use geometry::{Bounds, Crs, Geometry, GeometryType};
pub use mode::ExecutionMode;
pub use plot::{FeatureId, Plot};
pub use profile::{FeatureKind, WorkloadProfile};
pub use table::{statistic_columns, PartialTable, Reduction, ResultRow, ResultTable, StatRow};
