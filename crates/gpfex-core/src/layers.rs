//! Layer selection and per-layer aggregation of fractured polygons.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::geometry::{LayerKey, Polygon};

/// Lowest accepted relative dose.
pub const DOSE_MIN: f64 = 0.01;
/// Highest accepted relative dose.
pub const DOSE_MAX: f64 = 1000.0;

/// One layer the caller wants exported: its key, display label, whether the
/// source should pre-merge ("heal") its polygons, and the relative dose.
/// Immutable once an export begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSelection {
    pub key: LayerKey,
    pub label: String,
    #[serde(default)]
    pub heal: bool,
    pub relative_dose: f64,
}

impl LayerSelection {
    pub fn new(key: LayerKey, label: &str, heal: bool, relative_dose: f64) -> Self {
        Self {
            key,
            label: label.to_string(),
            heal,
            relative_dose,
        }
    }

    pub fn dose_in_range(&self) -> bool {
        self.relative_dose >= DOSE_MIN && self.relative_dose <= DOSE_MAX
    }
}

/// A selected layer together with its fractured polygons, in write order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub selection: LayerSelection,
    pub polygons: Vec<Polygon>,
}

impl LayerRecord {
    pub fn key(&self) -> LayerKey {
        self.selection.key
    }
}

/// Routes fractured pieces into the record matching their layer key.
/// Pieces with an unselected key are dropped silently (selection is a
/// filter, not an error), and polygon order within a layer follows the
/// order pieces arrive in.
#[derive(Debug)]
pub struct LayerAggregator {
    records: Vec<LayerRecord>,
    index: HashMap<LayerKey, usize>,
}

impl LayerAggregator {
    /// One empty record per selection, preserving selection order. A
    /// duplicate key keeps the first selection (later duplicates get no
    /// polygons routed to them).
    pub fn new(selections: &[LayerSelection]) -> Self {
        let mut records = Vec::with_capacity(selections.len());
        let mut index = HashMap::with_capacity(selections.len());
        for selection in selections {
            index.entry(selection.key).or_insert(records.len());
            records.push(LayerRecord {
                selection: selection.clone(),
                polygons: Vec::new(),
            });
        }
        Self { records, index }
    }

    /// Route one piece. Returns whether the key was selected.
    pub fn push(&mut self, key: LayerKey, polygon: Polygon) -> bool {
        match self.index.get(&key) {
            Some(&slot) => {
                self.records[slot].polygons.push(polygon);
                true
            }
            None => false,
        }
    }

    pub fn is_selected(&self, key: LayerKey) -> bool {
        self.index.contains_key(&key)
    }

    pub fn total_polygons(&self) -> usize {
        self.records.iter().map(|r| r.polygons.len()).sum()
    }

    pub fn into_records(self) -> Vec<LayerRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    fn tri(x: f64) -> Polygon {
        Polygon::new(vec![
            Point::new(x, 0.0),
            Point::new(x + 1.0, 0.0),
            Point::new(x + 1.0, 1.0),
        ])
    }

    #[test]
    fn test_routes_by_key_in_selection_order() {
        let selections = vec![
            LayerSelection::new(LayerKey::new(2, 0), "M2", false, 1.0),
            LayerSelection::new(LayerKey::new(1, 0), "M1", false, 2.0),
        ];
        let mut agg = LayerAggregator::new(&selections);
        assert!(agg.push(LayerKey::new(1, 0), tri(0.0)));
        assert!(agg.push(LayerKey::new(2, 0), tri(1.0)));
        assert!(agg.push(LayerKey::new(1, 0), tri(2.0)));

        let records = agg.into_records();
        assert_eq!(records[0].selection.label, "M2");
        assert_eq!(records[0].polygons.len(), 1);
        assert_eq!(records[1].polygons.len(), 2);
        // arrival order preserved within the layer
        assert_eq!(records[1].polygons[0].vertices[0].x, 0.0);
        assert_eq!(records[1].polygons[1].vertices[0].x, 2.0);
    }

    #[test]
    fn test_unselected_key_dropped_silently() {
        let selections = vec![LayerSelection::new(LayerKey::new(1, 0), "M1", false, 1.0)];
        let mut agg = LayerAggregator::new(&selections);
        assert!(!agg.push(LayerKey::new(7, 1), tri(0.0)));
        assert_eq!(agg.total_polygons(), 0);
    }

    #[test]
    fn test_dose_range() {
        let key = LayerKey::new(1, 0);
        assert!(LayerSelection::new(key, "a", false, 0.01).dose_in_range());
        assert!(LayerSelection::new(key, "a", false, 1000.0).dose_in_range());
        assert!(!LayerSelection::new(key, "a", false, 0.0).dose_in_range());
        assert!(!LayerSelection::new(key, "a", false, 1000.5).dose_in_range());
    }

    #[test]
    fn test_selection_json_roundtrip() {
        let selections = vec![
            LayerSelection::new(LayerKey::new(1, 0), "metal", true, 2.5),
            LayerSelection::new(LayerKey::new(3, 2), "via", false, 1.0),
        ];
        let json = serde_json::to_string(&selections).unwrap();
        let back: Vec<LayerSelection> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, selections);
    }
}
