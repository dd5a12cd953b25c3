//! ASCII GPF container writer.
//!
//! The container is line oriented: a comment header, one block per layer
//! (`LAYER`/`DOSE`/`POLY.../ENDLAYER`), an `END` terminator, then the
//! source snapshot embedded as a base64 tail. For a fixed timestamp and
//! input the byte sequence is fully deterministic; the fast/general export
//! paths are compared on exactly these bytes.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use gpfex_core::layers::LayerRecord;

/// Marker comment preceding the embedded payload.
pub const PAYLOAD_MARKER: &str = "# GDS payload base64";

/// Everything the container needs besides the layer records themselves.
#[derive(Debug, Clone)]
pub struct ContainerHeader {
    /// Original database unit of the source snapshot, in microns.
    pub dbu_um: f64,
    /// Source cell or file name recorded in the header comment.
    pub source_name: String,
    /// ISO-8601 UTC timestamp, trailing `Z`. Caller supplied so output
    /// stays reproducible.
    pub exported_at: String,
}

/// Render the full container: header, layer blocks in record order, `END`,
/// payload marker, and the base64-encoded payload.
///
/// Layer indices are 1-based positions in the output, not CAD layer
/// numbers. Coordinates must already be in microns; they are printed with
/// fixed 6-decimal precision. Dose and dbu use the default float form.
pub fn render_container(
    header: &ContainerHeader,
    records: &[LayerRecord],
    payload: &[u8],
) -> Vec<u8> {
    let mut text = String::new();

    text.push_str("# Raith Generic Pattern Format (GPF)\n");
    let _ = writeln!(
        text,
        "# Generated by gpfex {}",
        env!("CARGO_PKG_VERSION")
    );
    let _ = writeln!(text, "# Exported at {}", header.exported_at);
    let _ = writeln!(text, "# Source: {}", header.source_name);
    let _ = writeln!(text, "# Original database unit: {}um", header.dbu_um);
    text.push_str("VERSION 1.0\n");
    text.push_str("UNITS 1.0um\n");

    for (idx, record) in records.iter().enumerate() {
        let key = record.key();
        let _ = writeln!(
            text,
            "LAYER {} {} {} LABEL \"{}\"",
            idx + 1,
            key.layer,
            key.datatype,
            record.selection.label
        );
        let _ = writeln!(text, "DOSE {}", record.selection.relative_dose);
        for polygon in &record.polygons {
            let _ = write!(text, "POLY {}", polygon.vertex_count());
            for v in &polygon.vertices {
                let _ = write!(text, " {:.6} {:.6}", v.x, v.y);
            }
            text.push('\n');
        }
        text.push_str("ENDLAYER\n");
    }
    text.push_str("END\n");

    let mut bytes = text.into_bytes();
    bytes.extend_from_slice(PAYLOAD_MARKER.as_bytes());
    bytes.push(b'\n');
    bytes.extend_from_slice(STANDARD.encode(payload).as_bytes());
    bytes.push(b'\n');
    bytes
}

/// Render and write the container in one shot. The bytes are fully built
/// in memory first, so a failure leaves no half-written container behind
/// a successful-looking path.
pub fn write_container(
    path: &Path,
    header: &ContainerHeader,
    records: &[LayerRecord],
    payload: &[u8],
) -> io::Result<()> {
    let bytes = render_container(header, records, payload);
    fs::write(path, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpfex_core::geometry::{LayerKey, Point, Polygon};
    use gpfex_core::layers::LayerSelection;

    fn one_layer() -> Vec<LayerRecord> {
        vec![LayerRecord {
            selection: LayerSelection::new(LayerKey::new(1, 0), "L1", false, 2.5),
            polygons: vec![Polygon::new(vec![
                Point::new(0.0, 0.0),
                Point::new(1.0, 0.0),
                Point::new(1.0, 1.0),
            ])],
        }]
    }

    #[test]
    fn test_container_grammar() {
        let header = ContainerHeader {
            dbu_um: 0.001,
            source_name: "TOP".into(),
            exported_at: "2024-01-01T00:00:00Z".into(),
        };
        let payload = b"snapshot-bytes";
        let bytes = render_container(&header, &one_layer(), payload);
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines.contains(&"VERSION 1.0"));
        assert!(lines.contains(&"UNITS 1.0um"));
        assert!(lines.contains(&"# Original database unit: 0.001um"));
        assert!(lines.contains(&"LAYER 1 1 0 LABEL \"L1\""));
        assert!(lines.contains(&"DOSE 2.5"));
        assert!(lines.contains(
            &"POLY 3 0.000000 0.000000 1.000000 0.000000 1.000000 1.000000"
        ));
        assert!(lines.contains(&"ENDLAYER"));
        assert!(lines.contains(&"END"));
        assert!(lines.contains(&PAYLOAD_MARKER));
        assert_eq!(*lines.last().unwrap(), STANDARD.encode(payload));
    }

    #[test]
    fn test_layer_index_is_output_position() {
        let mut records = one_layer();
        records.push(LayerRecord {
            selection: LayerSelection::new(LayerKey::new(42, 7), "L42", false, 1.0),
            polygons: vec![],
        });
        let header = ContainerHeader {
            dbu_um: 0.001,
            source_name: "TOP".into(),
            exported_at: "2024-01-01T00:00:00Z".into(),
        };
        let text = String::from_utf8(render_container(&header, &records, b"")).unwrap();
        assert!(text.contains("LAYER 1 1 0 LABEL \"L1\""));
        assert!(text.contains("LAYER 2 42 7 LABEL \"L42\""));
    }

    #[test]
    fn test_deterministic_for_fixed_input() {
        let header = ContainerHeader {
            dbu_um: 0.001,
            source_name: "TOP".into(),
            exported_at: "2024-01-01T00:00:00Z".into(),
        };
        let records = one_layer();
        let a = render_container(&header, &records, b"payload");
        let b = render_container(&header, &records, b"payload");
        assert_eq!(a, b);
    }

    #[test]
    fn test_write_container_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gpf");
        let header = ContainerHeader {
            dbu_um: 0.001,
            source_name: "TOP".into(),
            exported_at: "2024-01-01T00:00:00Z".into(),
        };
        write_container(&path, &header, &one_layer(), b"payload").unwrap();
        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, render_container(&header, &one_layer(), b"payload"));
    }
}
