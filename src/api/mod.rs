pub mod exporter;

pub use exporter::{exporter_router, ExporterState};
