//! # gpfex Core
//!
//! Geometry primitives, unit scaling, bounded-vertex polygon fracturing,
//! layer selection/aggregation, and the beam-write simulation report.
//!
//! This crate is pure computation: no file I/O, no UI. The export pipeline
//! in `gpfex-io` drives it.

pub mod geometry;
pub mod units;
pub mod fracture;
pub mod layers;
pub mod report;

pub use geometry::{Point, Polygon, LayerKey, BBox};
pub use fracture::{FractureConfig, fracture_polygon};
pub use layers::{LayerSelection, LayerRecord, LayerAggregator, DOSE_MIN, DOSE_MAX};
pub use report::simulation_report;
