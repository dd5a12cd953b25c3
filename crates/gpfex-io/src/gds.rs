//! GDS-II flat snapshot reader and writer.
//!
//! The export pipeline treats a GDS-II stream as a flat snapshot: one or
//! more structures holding BOUNDARY elements tagged with layer/datatype.
//! Hierarchy records (SREF/AREF) and non-boundary elements are skipped —
//! snapshots are produced pre-flattened.
//!
//! Record framing: [2-byte length][2-byte record type][payload], big
//! endian. UNITS carries two excess-64 reals: the database unit expressed
//! in user units and in meters.

use std::io::{self, Read, Write};
use thiserror::Error;

use gpfex_core::geometry::{LayerKey, Point, Polygon};

#[allow(dead_code)]
mod record_type {
    pub const HEADER: u16 = 0x0002;
    pub const BGNLIB: u16 = 0x0102;
    pub const LIBNAME: u16 = 0x0206;
    pub const UNITS: u16 = 0x0305;
    pub const ENDLIB: u16 = 0x0400;
    pub const BGNSTR: u16 = 0x0502;
    pub const STRNAME: u16 = 0x0606;
    pub const ENDSTR: u16 = 0x0700;
    pub const BOUNDARY: u16 = 0x0800;
    pub const PATH: u16 = 0x0900;
    pub const SREF: u16 = 0x0A00;
    pub const AREF: u16 = 0x0B00;
    pub const TEXT: u16 = 0x0C00;
    pub const LAYER: u16 = 0x0D02;
    pub const DATATYPE: u16 = 0x0E02;
    pub const XY: u16 = 0x1003;
    pub const ENDEL: u16 = 0x1100;
    pub const NODE: u16 = 0x1500;
    pub const BOX: u16 = 0x2D00;
}

// ── Errors ────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum GdsError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid GDS-II record at offset {offset}: {message}")]
    InvalidRecord { offset: u64, message: String },

    #[error("unexpected record type 0x{record_type:04X}, expected 0x{expected:04X}")]
    UnexpectedRecord { record_type: u16, expected: u16 },

    #[error("GDS-II stream contains no structures")]
    EmptyLibrary,
}

// ── Excess-64 real codec ──────────────────────────────────────────────

/// Convert a GDS-II excess-64 real to IEEE 754.
fn real8_to_f64(bytes: &[u8; 8]) -> f64 {
    if bytes.iter().all(|&b| b == 0) {
        return 0.0;
    }

    let sign = if bytes[0] & 0x80 != 0 { -1.0 } else { 1.0 };
    let exponent = (bytes[0] & 0x7F) as i32 - 64;

    let mut mantissa: u64 = 0;
    for &b in &bytes[1..] {
        mantissa = (mantissa << 8) | b as u64;
    }

    sign * (mantissa as f64 / (1u64 << 56) as f64) * 16.0_f64.powi(exponent)
}

/// Convert IEEE 754 to GDS-II excess-64. The mantissa is rounded rather
/// than truncated so that `real8_to_f64(f64_to_real8(x)) == x` for every
/// finite f64 in range; the snapshot writer relies on this when it
/// re-emits units parsed from a source stream.
fn f64_to_real8(value: f64) -> [u8; 8] {
    if value == 0.0 {
        return [0u8; 8];
    }

    let sign_bit: u8 = if value < 0.0 { 0x80 } else { 0x00 };
    let mut val = value.abs();

    let mut exponent: i32 = 0;
    while val >= 1.0 && exponent < 63 {
        val /= 16.0;
        exponent += 1;
    }
    while val < 1.0 / 16.0 && exponent > -64 {
        val *= 16.0;
        exponent -= 1;
    }

    let mantissa = (val * (1u64 << 56) as f64).round() as u64;

    let mut out = [0u8; 8];
    out[0] = sign_bit | ((exponent + 64) as u8 & 0x7F);
    for (i, byte) in out[1..].iter_mut().enumerate() {
        *byte = ((mantissa >> (8 * (6 - i))) & 0xFF) as u8;
    }
    out
}

// ── Flat snapshot model ───────────────────────────────────────────────

/// One structure's polygons, tagged with their layer keys, in stream
/// order. Coordinates are in user units.
#[derive(Debug, Clone)]
pub struct FlatCell {
    pub name: String,
    pub polygons: Vec<(LayerKey, Polygon)>,
}

/// A parsed flat GDS-II snapshot.
#[derive(Debug, Clone)]
pub struct FlatGds {
    pub lib_name: String,
    /// Database unit expressed in user units (UNITS[0]).
    pub dbu_user: f64,
    /// Database unit expressed in meters (UNITS[1]).
    pub dbu_meters: f64,
    pub cells: Vec<FlatCell>,
}

impl FlatGds {
    /// Parse a complete GDS-II byte stream.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GdsError> {
        GdsSnapshotReader::new(bytes).read()
    }

    /// Meters per user unit.
    pub fn unit(&self) -> f64 {
        self.dbu_meters / self.dbu_user
    }

    /// Database unit in microns (the value recorded in the container
    /// header).
    pub fn dbu_um(&self) -> f64 {
        self.dbu_meters * 1e6
    }

    /// The structure named `preferred`, falling back to the first one in
    /// the stream when no name matches.
    pub fn top_cell(&self, preferred: &str) -> Option<&FlatCell> {
        self.cells
            .iter()
            .find(|c| c.name == preferred)
            .or_else(|| self.cells.first())
    }
}

// ── Reader ────────────────────────────────────────────────────────────

struct RawRecord {
    record_type: u16,
    data: Vec<u8>,
}

impl RawRecord {
    fn as_i16_vec(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|c| i16::from_be_bytes([c[0], c[1]]))
            .collect()
    }

    fn as_i32_vec(&self) -> Vec<i32> {
        self.data
            .chunks_exact(4)
            .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn as_string(&self) -> String {
        let s: String = self.data.iter().map(|&b| b as char).collect();
        s.trim_end_matches('\0').to_string()
    }

    fn as_real8_vec(&self) -> Vec<f64> {
        self.data
            .chunks_exact(8)
            .map(|c| real8_to_f64(c.try_into().unwrap()))
            .collect()
    }
}

/// Streaming reader for flat GDS-II snapshots.
pub struct GdsSnapshotReader<R: Read> {
    reader: R,
    offset: u64,
}

impl<R: Read> GdsSnapshotReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }

    /// Read the whole stream into a flat snapshot.
    pub fn read(mut self) -> Result<FlatGds, GdsError> {
        let mut snapshot = FlatGds {
            lib_name: String::new(),
            dbu_user: 0.001,
            dbu_meters: 1e-9,
            cells: Vec::new(),
        };

        self.read_header()?;

        loop {
            let rec = match self.next_record()? {
                Some(r) => r,
                None => break,
            };

            match rec.record_type {
                record_type::BGNLIB => {
                    // modification timestamps, not needed
                }
                record_type::LIBNAME => {
                    snapshot.lib_name = rec.as_string();
                }
                record_type::UNITS => {
                    let units = rec.as_real8_vec();
                    if units.len() >= 2 {
                        snapshot.dbu_user = units[0];
                        snapshot.dbu_meters = units[1];
                        log::debug!(
                            "snapshot units: {} user units, {} m per dbu",
                            snapshot.dbu_user,
                            snapshot.dbu_meters
                        );
                    }
                }
                record_type::BGNSTR => {
                    let cell = self.read_structure(snapshot.dbu_user)?;
                    snapshot.cells.push(cell);
                }
                record_type::ENDLIB => break,
                _ => {}
            }
        }

        if snapshot.cells.is_empty() {
            return Err(GdsError::EmptyLibrary);
        }
        Ok(snapshot)
    }

    fn read_header(&mut self) -> Result<(), GdsError> {
        let rec = self.next_record()?.ok_or(GdsError::InvalidRecord {
            offset: 0,
            message: "empty stream".into(),
        })?;
        if rec.record_type != record_type::HEADER {
            return Err(GdsError::UnexpectedRecord {
                record_type: rec.record_type,
                expected: record_type::HEADER,
            });
        }
        Ok(())
    }

    fn read_structure(&mut self, dbu_user: f64) -> Result<FlatCell, GdsError> {
        let mut cell = FlatCell {
            name: String::new(),
            polygons: Vec::new(),
        };

        loop {
            let rec = match self.next_record()? {
                Some(r) => r,
                None => break,
            };

            match rec.record_type {
                record_type::STRNAME => {
                    cell.name = rec.as_string();
                }
                record_type::BOUNDARY => {
                    if let Some(entry) = self.read_boundary(dbu_user)? {
                        cell.polygons.push(entry);
                    }
                }
                record_type::PATH
                | record_type::SREF
                | record_type::AREF
                | record_type::TEXT
                | record_type::NODE
                | record_type::BOX => {
                    log::debug!(
                        "skipping non-boundary element 0x{:04X} in '{}'",
                        rec.record_type,
                        cell.name
                    );
                    self.skip_to_endel()?;
                }
                record_type::ENDSTR => break,
                _ => {}
            }
        }

        Ok(cell)
    }

    fn read_boundary(&mut self, dbu_user: f64) -> Result<Option<(LayerKey, Polygon)>, GdsError> {
        let mut layer: i16 = 0;
        let mut datatype: i16 = 0;
        let mut points: Vec<Point> = Vec::new();

        loop {
            let rec = match self.next_record()? {
                Some(r) => r,
                None => break,
            };

            match rec.record_type {
                record_type::LAYER => {
                    if let Some(&v) = rec.as_i16_vec().first() {
                        layer = v;
                    }
                }
                record_type::DATATYPE => {
                    if let Some(&v) = rec.as_i16_vec().first() {
                        datatype = v;
                    }
                }
                record_type::XY => {
                    for pair in rec.as_i32_vec().chunks_exact(2) {
                        points.push(Point::new(
                            pair[0] as f64 * dbu_user,
                            pair[1] as f64 * dbu_user,
                        ));
                    }
                }
                record_type::ENDEL => break,
                _ => {}
            }
        }

        // Boundaries repeat the first point as the last; drop it.
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }

        if points.len() < 3 {
            log::warn!(
                "dropping boundary with {} vertices on layer {}/{}",
                points.len(),
                layer,
                datatype
            );
            return Ok(None);
        }

        Ok(Some((LayerKey::new(layer, datatype), Polygon::new(points))))
    }

    fn skip_to_endel(&mut self) -> Result<(), GdsError> {
        loop {
            match self.next_record()? {
                Some(rec) if rec.record_type == record_type::ENDEL => break,
                Some(_) => {}
                None => break,
            }
        }
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<RawRecord>, GdsError> {
        let mut len_buf = [0u8; 2];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(GdsError::Io(e)),
        }

        let total_len = u16::from_be_bytes(len_buf) as usize;
        if total_len < 4 {
            return Err(GdsError::InvalidRecord {
                offset: self.offset,
                message: format!("record length {} is too small", total_len),
            });
        }

        let mut type_buf = [0u8; 2];
        self.reader.read_exact(&mut type_buf)?;
        let record_type = u16::from_be_bytes(type_buf);

        let mut data = vec![0u8; total_len - 4];
        if !data.is_empty() {
            self.reader.read_exact(&mut data)?;
        }

        self.offset += total_len as u64;
        Ok(Some(RawRecord { record_type, data }))
    }
}

// ── Writer ────────────────────────────────────────────────────────────

/// Serializes a flat single-cell snapshot. Library timestamps are zeroed
/// so identical geometry always produces identical bytes, which the
/// fast/general export-path equivalence depends on.
pub struct GdsSnapshotWriter<W: Write> {
    writer: W,
    dbu_user: f64,
    dbu_meters: f64,
}

impl<W: Write> GdsSnapshotWriter<W> {
    pub fn new(writer: W, dbu_user: f64, dbu_meters: f64) -> Self {
        Self {
            writer,
            dbu_user,
            dbu_meters,
        }
    }

    /// Write a library holding one structure with the given boundaries.
    /// Polygon coordinates are in user units and are snapped to the
    /// database grid on output.
    pub fn write(
        &mut self,
        lib_name: &str,
        cell_name: &str,
        polygons: &[(LayerKey, Polygon)],
    ) -> Result<(), GdsError> {
        self.write_i16(record_type::HEADER, &[600])?;
        self.write_i16(record_type::BGNLIB, &[0i16; 12])?;
        self.write_str(record_type::LIBNAME, lib_name)?;
        self.write_real8(record_type::UNITS, &[self.dbu_user, self.dbu_meters])?;

        self.write_i16(record_type::BGNSTR, &[0i16; 12])?;
        self.write_str(record_type::STRNAME, cell_name)?;
        for (key, polygon) in polygons {
            self.write_boundary(*key, polygon)?;
        }
        self.write_record(record_type::ENDSTR, &[])?;

        self.write_record(record_type::ENDLIB, &[])?;
        Ok(())
    }

    fn write_boundary(&mut self, key: LayerKey, polygon: &Polygon) -> Result<(), GdsError> {
        self.write_record(record_type::BOUNDARY, &[])?;
        self.write_i16(record_type::LAYER, &[key.layer])?;
        self.write_i16(record_type::DATATYPE, &[key.datatype])?;

        let to_dbu = |v: f64| (v / self.dbu_user).round() as i32;
        let mut coords: Vec<i32> = polygon
            .vertices
            .iter()
            .flat_map(|p| [to_dbu(p.x), to_dbu(p.y)])
            .collect();
        // Close the ring.
        if let Some(first) = polygon.vertices.first() {
            coords.push(to_dbu(first.x));
            coords.push(to_dbu(first.y));
        }

        self.write_i32(record_type::XY, &coords)?;
        self.write_record(record_type::ENDEL, &[])
    }

    fn write_record(&mut self, record_type: u16, data: &[u8]) -> Result<(), GdsError> {
        let total_len = (data.len() + 4) as u16;
        self.writer.write_all(&total_len.to_be_bytes())?;
        self.writer.write_all(&record_type.to_be_bytes())?;
        if !data.is_empty() {
            self.writer.write_all(data)?;
        }
        Ok(())
    }

    fn write_i16(&mut self, record_type: u16, values: &[i16]) -> Result<(), GdsError> {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.write_record(record_type, &data)
    }

    fn write_i32(&mut self, record_type: u16, values: &[i32]) -> Result<(), GdsError> {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.write_record(record_type, &data)
    }

    fn write_str(&mut self, record_type: u16, s: &str) -> Result<(), GdsError> {
        let mut data: Vec<u8> = s.bytes().collect();
        // GDS strings must have even length
        if data.len() % 2 != 0 {
            data.push(0);
        }
        self.write_record(record_type, &data)
    }

    fn write_real8(&mut self, record_type: u16, values: &[f64]) -> Result<(), GdsError> {
        let data: Vec<u8> = values.iter().flat_map(|v| f64_to_real8(*v)).collect();
        self.write_record(record_type, &data)
    }
}

/// Serialize a flat single-cell snapshot into a byte buffer.
pub fn snapshot_to_bytes(
    lib_name: &str,
    cell_name: &str,
    polygons: &[(LayerKey, Polygon)],
    dbu_user: f64,
    dbu_meters: f64,
) -> Result<Vec<u8>, GdsError> {
    let mut buffer = Vec::new();
    GdsSnapshotWriter::new(&mut buffer, dbu_user, dbu_meters).write(lib_name, cell_name, polygons)?;
    Ok(buffer)
}
