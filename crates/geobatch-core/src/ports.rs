//! Port trait definitions
//!
//! These traits define the interfaces that external collaborators must implement.

pub mod remote;

pub use remote::{ExportHandle, ExportRequest, RasterPayload, RemoteService};
