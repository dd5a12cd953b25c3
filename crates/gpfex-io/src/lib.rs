//! # gpfex I/O
//!
//! GDS-II flat-snapshot reading and writing, the ASCII GPF container
//! writer, and the export pipeline tying them to the fracturing core.

pub mod gds;
pub mod container;
pub mod export;

pub use gds::{FlatGds, FlatCell, GdsSnapshotReader, GdsSnapshotWriter, GdsError};
pub use container::{ContainerHeader, render_container, write_container, PAYLOAD_MARKER};
pub use export::{
    export, select_export_path, utc_timestamp, ExportError, ExportOptions, ExportOutcome,
    ExportPath, ExportSummary, FileSource, GeometrySource,
};
