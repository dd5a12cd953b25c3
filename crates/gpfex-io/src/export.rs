//! The export pipeline: path selection, snapshot acquisition, fracturing,
//! aggregation, and container writing.
//!
//! Two mutually exclusive strategies produce the container:
//!
//! * **fast path** — the caller's original snapshot file is reused
//!   verbatim, both as fracturing input and as the embedded payload;
//! * **general path** — a filtered snapshot is rebuilt from the geometry
//!   source (selected layers only, healed where requested), serialized
//!   fresh, then fractured and embedded.
//!
//! Whenever both paths are admissible they produce byte-identical
//! fractured records, because both fracture the same snapshot bytes and
//! scale with the unit declared inside them.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use gpfex_core::fracture::{fracture_polygon, FractureConfig};
use gpfex_core::geometry::{LayerKey, Polygon};
use gpfex_core::layers::{LayerAggregator, LayerRecord, LayerSelection, DOSE_MAX, DOSE_MIN};
use gpfex_core::units;

use crate::container::{write_container, ContainerHeader};
use crate::gds::{FlatGds, GdsError};

// ── Errors ────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("no layers selected")]
    NoLayersSelected,

    #[error("no polygons available on any selected layer")]
    NoGeometry,

    #[error("relative dose {dose} for layer '{label}' is outside {DOSE_MIN}..={DOSE_MAX}")]
    InvalidDose { label: String, dose: f64 },

    #[error("GDS snapshot error: {0}")]
    Gds(#[from] GdsError),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path, source: io::Error) -> ExportError {
    ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ── Geometry source capability ────────────────────────────────────────

/// Capability injected by the caller: something that can enumerate layers
/// and yield their polygons in user units. The UI (or a file, or a test
/// fixture) stands behind this trait; the pipeline never reaches into
/// ambient application state.
pub trait GeometrySource {
    /// Keys of the layers the source can provide, first-appearance order.
    fn layer_keys(&self) -> Vec<LayerKey>;

    /// Ordered polygons for one layer, in user units. `heal` asks the
    /// source to pre-merge touching polygons; sources without a merge
    /// capability may degrade to unhealed output.
    fn polygons(&self, key: LayerKey, heal: bool) -> Result<Vec<Polygon>, ExportError>;

    /// Database unit in user units (GDS UNITS[0]).
    fn dbu_user(&self) -> f64;

    /// Database unit in meters (GDS UNITS[1]).
    fn dbu_meters(&self) -> f64;

    /// GDS library name the snapshot should carry. A rebuilt snapshot
    /// must reuse the source's library name, or its bytes diverge from a
    /// verbatim copy of the original file.
    fn lib_name(&self) -> &str;

    /// Name of the top cell the snapshot should carry.
    fn top_cell(&self) -> &str;

    /// Path of the original snapshot file, when the source is backed by
    /// one. Required for the fast path.
    fn source_path(&self) -> Option<&Path>;

    /// The original file bytes, when the source retained them from its
    /// initial read. The fast path embeds these verbatim instead of
    /// reading the file a second time, so an export always reflects the
    /// geometry the layer keys were enumerated from.
    fn source_bytes(&self) -> Option<&[u8]> {
        None
    }
}

/// A geometry source backed by a flat GDS snapshot file. The bytes are
/// read once at open time and kept for the fast path.
pub struct FileSource {
    path: PathBuf,
    bytes: Vec<u8>,
    snapshot: FlatGds,
    top: String,
}

impl FileSource {
    /// Read and parse the file once, fully, into memory.
    pub fn open(path: &Path) -> Result<Self, ExportError> {
        let bytes = fs::read(path).map_err(|e| io_err(path, e))?;
        let snapshot = FlatGds::from_bytes(&bytes)?;
        let top = snapshot
            .cells
            .first()
            .map(|c| c.name.clone())
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            snapshot,
            top,
        })
    }

    fn top_polygons(&self) -> &[(LayerKey, Polygon)] {
        match self.snapshot.top_cell(&self.top) {
            Some(cell) => &cell.polygons,
            None => &[],
        }
    }
}

impl GeometrySource for FileSource {
    fn layer_keys(&self) -> Vec<LayerKey> {
        let mut keys = Vec::new();
        for (key, _) in self.top_polygons() {
            if !keys.contains(key) {
                keys.push(*key);
            }
        }
        keys
    }

    fn polygons(&self, key: LayerKey, heal: bool) -> Result<Vec<Polygon>, ExportError> {
        if heal {
            log::warn!(
                "healing requested for layer {} but a file-backed source cannot merge; exporting unhealed",
                key
            );
        }
        Ok(self
            .top_polygons()
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, p)| p.clone())
            .collect())
    }

    fn dbu_user(&self) -> f64 {
        self.snapshot.dbu_user
    }

    fn dbu_meters(&self) -> f64 {
        self.snapshot.dbu_meters
    }

    fn lib_name(&self) -> &str {
        &self.snapshot.lib_name
    }

    fn top_cell(&self) -> &str {
        &self.top
    }

    fn source_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn source_bytes(&self) -> Option<&[u8]> {
        Some(&self.bytes)
    }
}

// ── Path selection ────────────────────────────────────────────────────

/// Which snapshot feeds the fracturer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPath {
    /// Reuse the original file verbatim.
    Fast,
    /// Rebuild a filtered snapshot first.
    General,
}

/// The fast path is admissible only when the original file exists, every
/// available layer is selected, and no layer requests healing. Healing or
/// partial selection change the geometry relative to the original file,
/// so reusing it would embed stale geometry; this check is a correctness
/// invariant, not an optimization.
pub fn select_export_path(
    source_file_available: bool,
    all_layers_selected: bool,
    any_heal_requested: bool,
) -> ExportPath {
    if source_file_available && all_layers_selected && !any_heal_requested {
        ExportPath::Fast
    } else {
        ExportPath::General
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────

/// Export tuning knobs.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Maximum vertex count per fractured polygon.
    pub max_vertices: usize,
    /// Fixed export timestamp (ISO-8601 UTC, trailing `Z`). `None` uses
    /// the current time.
    pub exported_at: Option<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            max_vertices: 4,
            exported_at: None,
        }
    }
}

/// What a successful export did.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub output: PathBuf,
    pub layer_count: usize,
    pub polygon_count: usize,
    pub path_taken: ExportPath,
}

/// Summary plus the layer records the container was written from, so the
/// caller can feed the same data to the simulation report.
#[derive(Debug)]
pub struct ExportOutcome {
    pub summary: ExportSummary,
    pub records: Vec<LayerRecord>,
    pub top_cell: String,
    pub exported_at: String,
}

/// Current UTC time in the container's timestamp form.
pub fn utc_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}

/// Run one export: decide the path, acquire the snapshot, fracture,
/// aggregate, and write the container. Nothing is written unless at least
/// one polygon survives selection.
pub fn export(
    source: &dyn GeometrySource,
    selections: &[LayerSelection],
    output: &Path,
    options: &ExportOptions,
) -> Result<ExportOutcome, ExportError> {
    if selections.is_empty() {
        return Err(ExportError::NoLayersSelected);
    }
    for selection in selections {
        if !selection.dose_in_range() {
            return Err(ExportError::InvalidDose {
                label: selection.label.clone(),
                dose: selection.relative_dose,
            });
        }
    }

    let available = source.layer_keys();
    let available_set: BTreeSet<LayerKey> = available.iter().copied().collect();

    // Layers that vanished from the source since selection are skipped,
    // not fatal; partial coverage is expected.
    let retained: Vec<LayerSelection> = selections
        .iter()
        .filter(|s| {
            let present = available_set.contains(&s.key);
            if !present {
                log::warn!("selected layer {} not present in source; skipping", s.key);
            }
            present
        })
        .cloned()
        .collect();
    if retained.is_empty() {
        return Err(ExportError::NoGeometry);
    }

    let selected_set: BTreeSet<LayerKey> = selections.iter().map(|s| s.key).collect();
    let all_selected = selected_set == available_set;
    let any_heal = selections.iter().any(|s| s.heal);
    let source_file = source
        .source_path()
        .filter(|p| p.exists())
        .map(Path::to_path_buf);

    let path_taken = select_export_path(source_file.is_some(), all_selected, any_heal);
    log::info!(
        "export path: {:?} (all_selected={}, heal={}, source_file={})",
        path_taken,
        all_selected,
        any_heal,
        source_file.is_some()
    );

    let snapshot_bytes = match path_taken {
        ExportPath::Fast => match (source.source_bytes(), &source_file) {
            (Some(bytes), _) => bytes.to_vec(),
            (None, Some(path)) => fs::read(path).map_err(|e| io_err(path, e))?,
            // the selector only picks the fast path with a source file
            (None, None) => return Err(ExportError::NoGeometry),
        },
        ExportPath::General => {
            let mut polygons: Vec<(LayerKey, Polygon)> = Vec::new();
            for selection in &retained {
                for polygon in source.polygons(selection.key, selection.heal)? {
                    polygons.push((selection.key, polygon));
                }
            }
            crate::gds::snapshot_to_bytes(
                source.lib_name(),
                source.top_cell(),
                &polygons,
                source.dbu_user(),
                source.dbu_meters(),
            )?
        }
    };

    // Fracture from the snapshot that will be embedded, scaling with the
    // unit it declares, so both paths agree bit for bit.
    let snapshot = FlatGds::from_bytes(&snapshot_bytes)?;
    let cell = match snapshot.top_cell(source.top_cell()) {
        Some(cell) => cell,
        None => return Err(ExportError::NoGeometry),
    };

    let config = FractureConfig::new(options.max_vertices, snapshot.dbu_user);
    let unit = snapshot.unit();

    let mut aggregator = LayerAggregator::new(&retained);
    for (key, polygon) in &cell.polygons {
        if !aggregator.is_selected(*key) {
            continue;
        }
        for piece in fracture_polygon(polygon, &config) {
            aggregator.push(*key, units::polygon_to_microns(&piece, unit));
        }
    }

    let polygon_count = aggregator.total_polygons();
    if polygon_count == 0 {
        return Err(ExportError::NoGeometry);
    }

    let exported_at = options
        .exported_at
        .clone()
        .unwrap_or_else(utc_timestamp);
    let header = ContainerHeader {
        dbu_um: snapshot.dbu_um(),
        source_name: cell.name.clone(),
        exported_at: exported_at.clone(),
    };
    let top_cell = cell.name.clone();

    let records = aggregator.into_records();
    write_container(output, &header, &records, &snapshot_bytes)
        .map_err(|e| io_err(output, e))?;

    log::info!(
        "wrote {} ({} layers, {} polygons)",
        output.display(),
        records.len(),
        polygon_count
    );

    Ok(ExportOutcome {
        summary: ExportSummary {
            output: output.to_path_buf(),
            layer_count: records.len(),
            polygon_count,
            path_taken,
        },
        records,
        top_cell,
        exported_at,
    })
}
