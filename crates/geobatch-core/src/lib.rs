//! GeoBatch Core - Domain models, configuration, and collaborator ports
//!
//! This crate contains the plot and result-table models, the layered
//! configuration, the GeoJSON plot reader, and the port the batch engine
//! uses to talk to the remote compute service.

pub mod cache;
pub mod config;
pub mod error;
pub mod formats;
pub mod layers;
pub mod models;
pub mod ports;

pub use error::{GeobatchError, Result};
