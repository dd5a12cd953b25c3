//! Human-readable beam-write simulation report.
//!
//! Diagnostic sibling of the container writer: renders the same layer
//! records as an ordered write-path summary. No downstream tool parses
//! this text, so the layout here is not a format contract.

use std::fmt::Write;

use crate::layers::LayerRecord;

/// Render the ordered write-path summary for a set of layer records.
/// Coordinates are expected in microns and printed with 3 decimals.
pub fn simulation_report(exported_at: &str, records: &[LayerRecord], top_cell: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Beam write simulation for cell '{}'", top_cell);
    let _ = writeln!(out, "Generated at {}", exported_at);
    let _ = writeln!(out);

    let total: usize = records.iter().map(|r| r.polygons.len()).sum();
    if total == 0 {
        let _ = writeln!(out, "No polygons selected for writing.");
        return out;
    }

    for (idx, record) in records.iter().enumerate() {
        let _ = writeln!(
            out,
            "Layer {} ({}): {} polygons, dose {}",
            idx + 1,
            record.selection.label,
            record.polygons.len(),
            record.selection.relative_dose
        );
        for (p_idx, polygon) in record.polygons.iter().enumerate() {
            let path = polygon
                .vertices
                .iter()
                .map(|v| format!("({:.3}, {:.3})", v.x, v.y))
                .collect::<Vec<_>>()
                .join(" -> ");
            let _ = writeln!(
                out,
                "  Polygon {} with {} vertices: {}",
                p_idx + 1,
                polygon.vertex_count(),
                path
            );
        }
        let _ = writeln!(out);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{LayerKey, Point, Polygon};
    use crate::layers::LayerSelection;

    fn square(x0: f64, y0: f64) -> Polygon {
        Polygon::new(vec![
            Point::new(x0, y0),
            Point::new(x0 + 1.0, y0),
            Point::new(x0 + 1.0, y0 + 1.0),
            Point::new(x0, y0 + 1.0),
        ])
    }

    #[test]
    fn test_report_summarizes_polygons() {
        let records = vec![LayerRecord {
            selection: LayerSelection::new(LayerKey::new(1, 0), "RECT", false, 1.0),
            polygons: vec![square(0.0, 0.0), square(2.0, 2.0)],
        }];

        let report = simulation_report("2024-01-01T00:00:00Z", &records, "TOP");

        assert!(report.contains("Beam write simulation"));
        assert!(report.contains("Layer 1 (RECT)"));
        assert!(report.contains("2 polygons"));
        assert!(report.contains("Polygon 2 with 4 vertices"));
        assert!(report.contains("(2.000, 2.000)"));
    }

    #[test]
    fn test_empty_selection_states_so() {
        let records = vec![LayerRecord {
            selection: LayerSelection::new(LayerKey::new(1, 0), "EMPTY", false, 1.0),
            polygons: vec![],
        }];
        let report = simulation_report("2024-01-01T00:00:00Z", &records, "TOP");
        assert!(report.contains("No polygons selected for writing."));
        assert!(!report.contains("Layer 1"));
    }
}
