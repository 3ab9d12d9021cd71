//! Binary KeyValues decoding for rich-presence attribute bags.
//!
//! Rich presence arrives as a binary KeyValues blob with a single root
//! section (usually `RP`). Nested sections are flattened into dotted keys
//! relative to that root.

use std::fmt;

use bytes::Buf;

use crate::common::error::{ProtocolError, ProtocolResult};

/// Deepest section nesting accepted below the root.
const MAX_DEPTH: usize = 32;

mod kv_type {
    pub const SECTION: u8 = 0;
    pub const STRING: u8 = 1;
    pub const INT32: u8 = 2;
    pub const FLOAT32: u8 = 3;
    pub const POINTER: u8 = 4;
    pub const COLOR: u8 = 6;
    pub const UINT64: u8 = 7;
    pub const END: u8 = 8;
    pub const INT64: u8 = 10;
    pub const ALT_END: u8 = 11;
}

/// A typed KeyValues leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum KvValue {
    String(String),
    Int32(i32),
    Float32(f32),
    Pointer(u32),
    Color(u32),
    UInt64(u64),
    Int64(i64),
}

impl fmt::Display for KvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvValue::String(s) => write!(f, "{}", s),
            KvValue::Int32(v) => write!(f, "{}", v),
            KvValue::Float32(v) => write!(f, "{}", v),
            KvValue::Pointer(v) | KvValue::Color(v) => write!(f, "{}", v),
            KvValue::UInt64(v) => write!(f, "{}", v),
            KvValue::Int64(v) => write!(f, "{}", v),
        }
    }
}

/// Decode a binary KeyValues blob into flattened `(key, value)` pairs.
pub fn parse_binary_kv(data: &[u8]) -> ProtocolResult<Vec<(String, KvValue)>> {
    let mut buf = data;
    let mut out = Vec::new();

    if !buf.has_remaining() {
        return Ok(out);
    }

    if buf[0] == kv_type::SECTION {
        buf.advance(1);
        // Root section name is not part of the flattened keys
        read_cstring(&mut buf)?;
        parse_section(&mut buf, "", 0, &mut out)?;
    } else {
        parse_section(&mut buf, "", 0, &mut out)?;
    }

    Ok(out)
}

fn parse_section(
    buf: &mut &[u8],
    prefix: &str,
    depth: usize,
    out: &mut Vec<(String, KvValue)>,
) -> ProtocolResult<()> {
    if depth > MAX_DEPTH {
        return Err(ProtocolError::InvalidPacket {
            message: format!("KeyValues nested deeper than {} sections", MAX_DEPTH),
        });
    }
    loop {
        if !buf.has_remaining() {
            // Some producers omit the trailing end marker
            return Ok(());
        }

        let value_type = buf.get_u8();
        if value_type == kv_type::END || value_type == kv_type::ALT_END {
            return Ok(());
        }

        let name = read_cstring(buf)?;
        let key = if prefix.is_empty() {
            name
        } else {
            format!("{}.{}", prefix, name)
        };

        let value = match value_type {
            kv_type::SECTION => {
                parse_section(buf, &key, depth + 1, out)?;
                continue;
            }
            kv_type::STRING => KvValue::String(read_cstring(buf)?),
            kv_type::INT32 => KvValue::Int32(read_fixed(buf, 4)?.get_i32_le()),
            kv_type::FLOAT32 => KvValue::Float32(read_fixed(buf, 4)?.get_f32_le()),
            kv_type::POINTER => KvValue::Pointer(read_fixed(buf, 4)?.get_u32_le()),
            kv_type::COLOR => KvValue::Color(read_fixed(buf, 4)?.get_u32_le()),
            kv_type::UINT64 => KvValue::UInt64(read_fixed(buf, 8)?.get_u64_le()),
            kv_type::INT64 => KvValue::Int64(read_fixed(buf, 8)?.get_i64_le()),
            other => {
                return Err(ProtocolError::InvalidPacket {
                    message: format!("unsupported KeyValues type {} for key '{}'", other, key),
                })
            }
        };
        out.push((key, value));
    }
}

fn read_fixed<'a>(buf: &mut &'a [u8], len: usize) -> ProtocolResult<&'a [u8]> {
    if buf.remaining() < len {
        return Err(ProtocolError::PacketTooShort {
            needed: len,
            got: buf.remaining(),
        });
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn read_cstring(buf: &mut &[u8]) -> ProtocolResult<String> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ProtocolError::InvalidString {
            message: "unterminated KeyValues string".to_string(),
        })?;
    let s = String::from_utf8_lossy(&buf[..end]).into_owned();
    *buf = &buf[end + 1..];
    Ok(s)
}

/// Encode flat string pairs as a binary KeyValues blob under `root`.
#[cfg(test)]
pub fn encode_string_kv(root: &str, pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut out = vec![kv_type::SECTION];
    out.extend_from_slice(root.as_bytes());
    out.push(0);
    for (key, value) in pairs {
        out.push(kv_type::STRING);
        out.extend_from_slice(key.as_bytes());
        out.push(0);
        out.extend_from_slice(value.as_bytes());
        out.push(0);
    }
    out.push(kv_type::END);
    out.push(kv_type::END);
    out
}
