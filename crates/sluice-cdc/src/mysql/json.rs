//! MySQL binary JSON (`JSON` column storage format)
//!
//! Layout, with all integers little-endian:
//!
//! ```text
//! value   := type:u8 body
//! object  := count size key-entry* value-entry* keys values
//! array   := count size value-entry* values
//! key-entry   := offset:u16|u32 length:u16
//! value-entry := type:u8 (inline-value | offset):u16|u32
//! ```
//!
//! `count`, `size` and offsets are 2 bytes in the small format and 4 bytes in
//! the large one. Offsets are relative to the start of the enclosing object
//! or array. Literals and 16-bit integers (plus 32-bit integers in the large
//! format) are stored inline in the value entry.

use serde_json::Value as Json;

use super::decoder::{decode_decimal, ColumnType};
use super::reader::ByteReader;
use crate::common::{CdcError, Result};

const TYPE_SMALL_OBJECT: u8 = 0x00;
const TYPE_LARGE_OBJECT: u8 = 0x01;
const TYPE_SMALL_ARRAY: u8 = 0x02;
const TYPE_LARGE_ARRAY: u8 = 0x03;
const TYPE_LITERAL: u8 = 0x04;
const TYPE_INT16: u8 = 0x05;
const TYPE_UINT16: u8 = 0x06;
const TYPE_INT32: u8 = 0x07;
const TYPE_UINT32: u8 = 0x08;
const TYPE_INT64: u8 = 0x09;
const TYPE_UINT64: u8 = 0x0A;
const TYPE_DOUBLE: u8 = 0x0B;
const TYPE_STRING: u8 = 0x0C;
const TYPE_OPAQUE: u8 = 0x0F;

const LITERAL_NULL: u8 = 0x00;
const LITERAL_TRUE: u8 = 0x01;
const LITERAL_FALSE: u8 = 0x02;

/// Decode a binary JSON document.
///
/// An empty payload is JSON `null` (MySQL writes it for `NULL`-ish JSON
/// values in some partial updates). Payloads that fail binary decoding but
/// are valid JSON text are accepted as text; anything else is a decode
/// error.
pub fn decode_json_binary(data: &[u8]) -> Result<Json> {
    let Some((&type_byte, body)) = data.split_first() else {
        return Ok(Json::Null);
    };
    match parse_typed(type_byte, body) {
        Ok(value) => Ok(value),
        Err(binary_err) => serde_json::from_slice(data).map_err(|_| {
            CdcError::decode(format!("invalid binary JSON: {}", binary_err))
        }),
    }
}

fn slice(data: &[u8], start: usize, len: usize) -> Result<&[u8]> {
    start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| CdcError::decode("binary JSON offset out of bounds"))
}

fn parse_typed(type_byte: u8, data: &[u8]) -> Result<Json> {
    let mut r = ByteReader::new(data);
    match type_byte {
        TYPE_SMALL_OBJECT => parse_object(data, false),
        TYPE_LARGE_OBJECT => parse_object(data, true),
        TYPE_SMALL_ARRAY => parse_array(data, false),
        TYPE_LARGE_ARRAY => parse_array(data, true),
        TYPE_LITERAL => literal(r.u8()?),
        TYPE_INT16 => Ok(Json::from(r.u16_le()? as i16)),
        TYPE_UINT16 => Ok(Json::from(r.u16_le()?)),
        TYPE_INT32 => Ok(Json::from(r.u32_le()? as i32)),
        TYPE_UINT32 => Ok(Json::from(r.u32_le()?)),
        TYPE_INT64 => Ok(Json::from(r.u64_le()? as i64)),
        TYPE_UINT64 => Ok(Json::from(r.u64_le()?)),
        TYPE_DOUBLE => Ok(Json::from(r.f64_le()?)),
        TYPE_STRING => {
            let len = read_variable_length(&mut r)?;
            Ok(Json::String(String::from_utf8_lossy(r.bytes(len)?).into_owned()))
        }
        TYPE_OPAQUE => {
            let field_type = r.u8()?;
            let len = read_variable_length(&mut r)?;
            opaque(field_type, r.bytes(len)?)
        }
        other => Err(CdcError::decode(format!(
            "unknown binary JSON type 0x{:02x}",
            other
        ))),
    }
}

fn literal(code: u8) -> Result<Json> {
    match code {
        LITERAL_NULL => Ok(Json::Null),
        LITERAL_TRUE => Ok(Json::Bool(true)),
        LITERAL_FALSE => Ok(Json::Bool(false)),
        other => Err(CdcError::decode(format!(
            "unknown binary JSON literal 0x{:02x}",
            other
        ))),
    }
}

/// Read `count` and `size` of a container and check `size` against the buffer.
fn container_header(data: &[u8], large: bool) -> Result<(usize, ByteReader<'_>)> {
    let mut r = ByteReader::new(data);
    let (count, size) = if large {
        (r.u32_le()? as usize, r.u32_le()? as usize)
    } else {
        (r.u16_le()? as usize, r.u16_le()? as usize)
    };
    if size > data.len() {
        return Err(CdcError::decode(format!(
            "binary JSON container claims {} bytes, only {} available",
            size,
            data.len()
        )));
    }
    Ok((count, r))
}

fn parse_object(data: &[u8], large: bool) -> Result<Json> {
    let offset_size = if large { 4 } else { 2 };
    let (count, mut r) = container_header(data, large)?;

    let mut keys = Vec::with_capacity(count.min(data.len()));
    for _ in 0..count {
        let key_offset = r.uint_le(offset_size)? as usize;
        let key_len = r.u16_le()? as usize;
        keys.push(String::from_utf8_lossy(slice(data, key_offset, key_len)?).into_owned());
    }

    let mut map = serde_json::Map::with_capacity(keys.len());
    for key in keys {
        let value = value_entry(data, &mut r, large)?;
        map.insert(key, value);
    }
    Ok(Json::Object(map))
}

fn parse_array(data: &[u8], large: bool) -> Result<Json> {
    let (count, mut r) = container_header(data, large)?;
    let mut values = Vec::with_capacity(count.min(data.len()));
    for _ in 0..count {
        values.push(value_entry(data, &mut r, large)?);
    }
    Ok(Json::Array(values))
}

/// Resolve one value entry: inline scalar or offset into `container`.
fn value_entry(container: &[u8], r: &mut ByteReader<'_>, large: bool) -> Result<Json> {
    let offset_size = if large { 4 } else { 2 };
    let type_byte = r.u8()?;
    let raw = r.uint_le(offset_size)?;

    match type_byte {
        TYPE_LITERAL => literal(raw as u8),
        TYPE_INT16 => Ok(Json::from(raw as u16 as i16)),
        TYPE_UINT16 => Ok(Json::from(raw as u16)),
        TYPE_INT32 if large => Ok(Json::from(raw as u32 as i32)),
        TYPE_UINT32 if large => Ok(Json::from(raw as u32)),
        _ => {
            let offset = raw as usize;
            if offset >= container.len() {
                return Err(CdcError::decode("binary JSON value offset out of bounds"));
            }
            parse_typed(type_byte, &container[offset..])
        }
    }
}

/// Lengths of strings and opaque values: 7 bits per byte, high bit continues.
fn read_variable_length(r: &mut ByteReader<'_>) -> Result<usize> {
    let mut length = 0usize;
    for i in 0..5 {
        let b = r.u8()?;
        length |= ((b & 0x7F) as usize) << (7 * i);
        if b & 0x80 == 0 {
            return Ok(length);
        }
    }
    Err(CdcError::decode("binary JSON length longer than 5 bytes"))
}

/// Render an opaque value (a MySQL scalar stored inside JSON).
fn opaque(field_type: u8, data: &[u8]) -> Result<Json> {
    match ColumnType::try_from(field_type) {
        Ok(ColumnType::NewDecimal) => {
            let mut r = ByteReader::new(data);
            let precision = r.u8()? as usize;
            let scale = r.u8()? as usize;
            let text = decode_decimal(&mut r, precision, scale)?;
            // Keep exact digits: a JSON number would round through f64
            Ok(Json::String(text))
        }
        Ok(ColumnType::Date) => Ok(Json::String(packed_date(data)?)),
        Ok(ColumnType::DateTime | ColumnType::Timestamp) => {
            Ok(Json::String(packed_datetime(data)?))
        }
        Ok(ColumnType::Time) => Ok(Json::String(packed_time(data)?)),
        _ => match std::str::from_utf8(data) {
            Ok(s) => Ok(Json::String(s.to_string())),
            Err(_) => {
                use base64::Engine;
                Ok(Json::String(
                    base64::engine::general_purpose::STANDARD.encode(data),
                ))
            }
        },
    }
}

/// MySQL "packed" temporal layout used inside JSON: an i64 holding
/// `(ymd << 17 | hms) << 24 | microseconds`.
fn packed_i64(data: &[u8]) -> Result<i64> {
    Ok(ByteReader::new(data).u64_le()? as i64)
}

fn split_packed_datetime(packed: i64) -> (u64, u64, u64, u64, u64, u64, u64) {
    let packed = packed.unsigned_abs();
    let micros = packed % (1 << 24);
    let int_part = packed >> 24;
    let ymd = int_part >> 17;
    let hms = int_part % (1 << 17);
    let ym = ymd >> 5;
    (
        ym / 13,
        ym % 13,
        ymd % (1 << 5),
        hms >> 12,
        (hms >> 6) % (1 << 6),
        hms % (1 << 6),
        micros,
    )
}

fn packed_date(data: &[u8]) -> Result<String> {
    let (year, month, day, ..) = split_packed_datetime(packed_i64(data)?);
    Ok(format!("{:04}-{:02}-{:02}", year, month, day))
}

fn packed_datetime(data: &[u8]) -> Result<String> {
    let (year, month, day, hour, minute, second, micros) =
        split_packed_datetime(packed_i64(data)?);
    let mut text = format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year, month, day, hour, minute, second
    );
    if micros > 0 {
        text.push_str(&format!(".{:06}", micros));
    }
    Ok(text)
}

fn packed_time(data: &[u8]) -> Result<String> {
    let packed = packed_i64(data)?;
    let sign = if packed < 0 { "-" } else { "" };
    let abs = packed.unsigned_abs();
    let micros = abs % (1 << 24);
    let hms = abs >> 24;
    let mut text = format!(
        "{}{:02}:{:02}:{:02}",
        sign,
        (hms >> 12) % (1 << 10),
        (hms >> 6) % (1 << 6),
        hms % (1 << 6)
    );
    if micros > 0 {
        text.push_str(&format!(".{:06}", micros));
    }
    Ok(text)
}
