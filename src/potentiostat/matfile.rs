//! Reader for the MATLAB level 5 exports written while scanning.
//!
//! Only the subset the vendor produces is understood: little-endian files
//! holding numeric matrices, optionally wrapped in zlib-compressed elements.
//! Each trace is stored as a variable
//!
//! ```text
//! Trace_<group>_<series>_<sweep>_<trace>   n×2 [time, value], column-major
//! ```
//!
//! Trace 1 is the current and trace 2 the voltage.

use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use log::debug;

use super::error::PotentiostatError;
use super::export::ExportedTrace;

const HEADER_LEN: usize = 128;

const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT16: u32 = 3;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_SINGLE: u32 = 7;
const MI_DOUBLE: u32 = 9;
const MI_INT64: u32 = 12;
const MI_UINT64: u32 = 13;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;

/// Numeric array classes, `mxDOUBLE_CLASS` through `mxUINT64_CLASS`.
const NUMERIC_CLASSES: std::ops::RangeInclusive<u8> = 6..=15;

/// One numeric variable.
#[derive(Debug, Clone, PartialEq)]
pub struct MatVariable {
    /// Variable name
    pub name: String,
    /// Dimensions
    pub dims: Vec<usize>,
    /// Real part, column-major
    pub data: Vec<f64>,
}

impl MatVariable {
    /// Column `c` of a two-dimensional variable.
    pub fn column(&self, c: usize) -> Option<&[f64]> {
        let rows = *self.dims.first()?;
        let start = c.checked_mul(rows)?;
        self.data.get(start..start + rows)
    }
}

fn invalid(msg: impl Into<String>) -> PotentiostatError {
    PotentiostatError::InvalidExport(msg.into())
}

/// Parse every numeric variable of a MAT file.
pub fn parse_mat(bytes: &[u8]) -> Result<Vec<MatVariable>, PotentiostatError> {
    if bytes.len() < HEADER_LEN {
        return Err(invalid("file shorter than the MAT header"));
    }
    match &bytes[126..128] {
        b"IM" => {}
        b"MI" => return Err(invalid("big-endian MAT files are not supported")),
        _ => return Err(invalid("missing MAT endian indicator")),
    }
    let mut variables = Vec::new();
    parse_elements(&bytes[HEADER_LEN..], &mut variables)?;
    Ok(variables)
}

/// Read a MAT file from disk.
pub fn read_mat<P: AsRef<Path>>(path: P) -> Result<Vec<MatVariable>, PotentiostatError> {
    parse_mat(&fs::read(path)?)
}

/// Tag of a data element: (type, byte count, header length).
fn read_tag(cursor: &mut Cursor<&[u8]>) -> Result<(u32, usize, usize), PotentiostatError> {
    let first = cursor.read_u32::<LittleEndian>()?;
    if first >> 16 != 0 {
        // small element: size and type share the first word
        Ok((first & 0xffff, (first >> 16) as usize, 4))
    } else {
        let size = cursor.read_u32::<LittleEndian>()? as usize;
        Ok((first, size, 8))
    }
}

fn take<'a>(data: &'a [u8], start: usize, len: usize) -> Result<&'a [u8], PotentiostatError> {
    start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| invalid(format!("element of {} bytes runs past the end", len)))
}

fn padded(len: usize, header: usize) -> usize {
    if header == 4 {
        4
    } else {
        len.div_ceil(8) * 8
    }
}

fn parse_elements(data: &[u8], out: &mut Vec<MatVariable>) -> Result<(), PotentiostatError> {
    let mut pos = 0;
    while pos + 8 <= data.len() {
        let mut cursor = Cursor::new(&data[pos..]);
        let (kind, size, header) = read_tag(&mut cursor)?;
        let body = take(data, pos + header, size)?;
        match kind {
            MI_COMPRESSED => {
                let mut inflated = Vec::new();
                ZlibDecoder::new(body).read_to_end(&mut inflated)?;
                parse_elements(&inflated, out)?;
                pos += header + size;
                continue;
            }
            MI_MATRIX => {
                if let Some(variable) = parse_matrix(body)? {
                    out.push(variable);
                }
            }
            other => debug!("skipping MAT element of type {}", other),
        }
        pos += header + padded(size, header);
    }
    Ok(())
}

fn parse_matrix(body: &[u8]) -> Result<Option<MatVariable>, PotentiostatError> {
    let mut parts = Vec::with_capacity(4);
    let mut pos = 0;
    while pos + 8 <= body.len() && parts.len() < 4 {
        let mut cursor = Cursor::new(&body[pos..]);
        let (kind, size, header) = read_tag(&mut cursor)?;
        parts.push((kind, take(body, pos + header, size)?));
        pos += header + padded(size, header);
    }
    let [(_, flags), (_, dims), (_, name), (real_kind, real)] = parts[..] else {
        return Err(invalid("matrix element is missing sub-elements"));
    };

    let class = flags.first().copied().unwrap_or(0);
    let name = String::from_utf8_lossy(name).trim_end_matches('\0').to_string();
    if !NUMERIC_CLASSES.contains(&class) {
        debug!("skipping non-numeric MAT variable '{}' (class {})", name, class);
        return Ok(None);
    }

    let dims: Vec<usize> = numbers(MI_INT32, dims)?
        .into_iter()
        .map(|d| if d < 0.0 { 0 } else { d as usize })
        .collect();
    let data = numbers(real_kind, real)?;
    let expected = dims
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| invalid(format!("variable '{}' has oversized dimensions {:?}", name, dims)))?;
    if data.len() != expected {
        return Err(invalid(format!(
            "variable '{}' holds {} values for dimensions {:?}",
            name,
            data.len(),
            dims
        )));
    }
    Ok(Some(MatVariable { name, dims, data }))
}

fn numbers(kind: u32, bytes: &[u8]) -> Result<Vec<f64>, PotentiostatError> {
    let mut cursor = Cursor::new(bytes);
    let width = match kind {
        MI_INT8 | MI_UINT8 => 1,
        MI_INT16 | MI_UINT16 => 2,
        MI_INT32 | MI_UINT32 | MI_SINGLE => 4,
        MI_DOUBLE | MI_INT64 | MI_UINT64 => 8,
        other => return Err(invalid(format!("unsupported MAT data type {}", other))),
    };
    let count = bytes.len() / width;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let value = match kind {
            MI_INT8 => cursor.read_i8()? as f64,
            MI_UINT8 => cursor.read_u8()? as f64,
            MI_INT16 => cursor.read_i16::<LittleEndian>()? as f64,
            MI_UINT16 => cursor.read_u16::<LittleEndian>()? as f64,
            MI_INT32 => cursor.read_i32::<LittleEndian>()? as f64,
            MI_UINT32 => cursor.read_u32::<LittleEndian>()? as f64,
            MI_SINGLE => cursor.read_f32::<LittleEndian>()? as f64,
            MI_INT64 => cursor.read_i64::<LittleEndian>()? as f64,
            MI_UINT64 => cursor.read_u64::<LittleEndian>()? as f64,
            _ => cursor.read_f64::<LittleEndian>()?,
        };
        values.push(value);
    }
    Ok(values)
}

/// `(group, series, sweep, trace)` of a `Trace_*` variable name.
fn trace_index(name: &str) -> Option<[u32; 4]> {
    let mut parts = name.strip_prefix("Trace_")?.split('_').map(|p| p.parse::<u32>().ok());
    let index = [parts.next()??, parts.next()??, parts.next()??, parts.next()??];
    parts.next().is_none().then_some(index)
}

/// Reassemble the sweeps of a MAT export into one time series.
pub fn traces_from_mat(variables: &[MatVariable]) -> Result<ExportedTrace, PotentiostatError> {
    let mut traces: Vec<([u32; 4], &MatVariable)> = variables
        .iter()
        .filter_map(|v| trace_index(&v.name).map(|idx| (idx, v)))
        .collect();
    traces.sort_by_key(|(idx, _)| *idx);

    let mut result = ExportedTrace::default();
    for sweep in traces.chunk_by(|(a, _), (b, _)| a[..3] == b[..3]) {
        let find = |trace: u32| sweep.iter().find(|(idx, _)| idx[3] == trace).map(|(_, v)| *v);
        let (Some(current), Some(voltage)) = (find(1), find(2)) else {
            return Err(invalid(format!(
                "sweep {:?} lacks a current or voltage trace",
                &sweep[0].0[..3]
            )));
        };
        let columns = (current.column(0), current.column(1), voltage.column(1));
        let (Some(t), Some(i), Some(v)) = columns else {
            return Err(invalid(format!("trace '{}' is not n×2", current.name)));
        };
        result.append_sweep(t, v, i);
    }

    if result.is_empty() {
        return Err(invalid("no Trace_* variables in MAT export"));
    }
    Ok(result)
}

/// Read a MAT export and reassemble it.
pub fn read_mat_trace<P: AsRef<Path>>(path: P) -> Result<ExportedTrace, PotentiostatError> {
    traces_from_mat(&read_mat(path)?)
}
