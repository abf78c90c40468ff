//! Binary object record codec.
//!
//! One self-describing record per object. Every property payload is
//! length-prefixed, so a reader can skip payloads whose type tag it does not
//! know and carry them through read-modify-write untouched. Strings are
//! UTF-8, integers and float bits little-endian. Decode failures classify as
//! `CorruptRecord` and are never retried.

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::object::{Beacon, Kind, Object, PropertyValue, RefClassification, Reference};

pub const CODEC_VERSION: u8 = 1;

const TAG_STRING: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_NUMBER: u8 = 3;
const TAG_BOOL: u8 = 4;
const TAG_DATE: u8 = 5;
const TAG_GEO: u8 = 6;
const TAG_TEXT: u8 = 7;
const TAG_PHONE: u8 = 8;
const TAG_SINGLE_REF: u8 = 9;
const TAG_MULTI_REF: u8 = 10;

const REF_FLAG_CLASSIFIED: u8 = 1 << 0;
const REF_FLAG_HAS_LOSING: u8 = 1 << 1;

fn corrupt(msg: impl Into<String>) -> Error {
    Error::CorruptRecord(msg.into())
}

fn read_u8(raw: &[u8], cursor: &mut usize) -> Result<u8> {
    let Some(b) = raw.get(*cursor).copied() else {
        return Err(corrupt("decode buffer underflow for u8"));
    };
    *cursor += 1;
    Ok(b)
}

fn read_u16(raw: &[u8], cursor: &mut usize) -> Result<u16> {
    let end = cursor.saturating_add(2);
    let Some(bytes) = raw.get(*cursor..end) else {
        return Err(corrupt("decode buffer underflow for u16"));
    };
    let mut arr = [0u8; 2];
    arr.copy_from_slice(bytes);
    *cursor = end;
    Ok(u16::from_le_bytes(arr))
}

fn read_u32(raw: &[u8], cursor: &mut usize) -> Result<u32> {
    let end = cursor.saturating_add(4);
    let Some(bytes) = raw.get(*cursor..end) else {
        return Err(corrupt("decode buffer underflow for u32"));
    };
    let mut arr = [0u8; 4];
    arr.copy_from_slice(bytes);
    *cursor = end;
    Ok(u32::from_le_bytes(arr))
}

fn read_i64(raw: &[u8], cursor: &mut usize) -> Result<i64> {
    let end = cursor.saturating_add(8);
    let Some(bytes) = raw.get(*cursor..end) else {
        return Err(corrupt("decode buffer underflow for i64"));
    };
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    *cursor = end;
    Ok(i64::from_le_bytes(arr))
}

fn read_f32(raw: &[u8], cursor: &mut usize) -> Result<f32> {
    Ok(f32::from_bits(read_u32(raw, cursor)?))
}

fn read_f64(raw: &[u8], cursor: &mut usize) -> Result<f64> {
    let end = cursor.saturating_add(8);
    let Some(bytes) = raw.get(*cursor..end) else {
        return Err(corrupt("decode buffer underflow for f64"));
    };
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    *cursor = end;
    Ok(f64::from_bits(u64::from_le_bytes(arr)))
}

fn read_bytes<'a>(raw: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = cursor.saturating_add(len);
    let Some(bytes) = raw.get(*cursor..end) else {
        return Err(corrupt("decode buffer underflow for bytes"));
    };
    *cursor = end;
    Ok(bytes)
}

fn read_str<'a>(raw: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a str> {
    std::str::from_utf8(read_bytes(raw, cursor, len)?).map_err(|_| corrupt("invalid utf-8"))
}

fn push_str_u16(out: &mut Vec<u8>, s: &str, what: &str) -> Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| Error::invalid_input(format!("{what} longer than u16: {}", s.len())))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

pub fn encode(obj: &Object) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64 + obj.vector.len() * 4);
    out.push(CODEC_VERSION);
    out.push(obj.kind.as_byte());
    push_str_u16(&mut out, &obj.class, "class name")?;
    out.extend_from_slice(obj.uuid.as_bytes());
    out.extend_from_slice(&obj.created_at.to_le_bytes());
    out.extend_from_slice(&obj.updated_at.to_le_bytes());

    let dim = u16::try_from(obj.vector.len())
        .map_err(|_| Error::invalid_input(format!("vector dim exceeds u16: {}", obj.vector.len())))?;
    out.extend_from_slice(&dim.to_le_bytes());
    for value in &obj.vector {
        out.extend_from_slice(&value.to_bits().to_le_bytes());
    }

    let prop_count = u32::try_from(obj.properties.len())
        .map_err(|_| Error::invalid_input("property count exceeds u32".to_string()))?;
    out.extend_from_slice(&prop_count.to_le_bytes());
    for (name, value) in &obj.properties {
        push_str_u16(&mut out, name, "property name")?;
        encode_property(&mut out, value)?;
    }
    Ok(out)
}

fn encode_property(out: &mut Vec<u8>, value: &PropertyValue) -> Result<()> {
    let (tag, payload) = encode_payload(value)?;
    out.push(tag);
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::invalid_input("property payload exceeds u32".to_string()))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(())
}

fn encode_payload(value: &PropertyValue) -> Result<(u8, Vec<u8>)> {
    let pair = match value {
        PropertyValue::String(s) => (TAG_STRING, s.as_bytes().to_vec()),
        PropertyValue::Int(v) => (TAG_INT, v.to_le_bytes().to_vec()),
        PropertyValue::Number(v) => (TAG_NUMBER, v.to_bits().to_le_bytes().to_vec()),
        PropertyValue::Bool(v) => (TAG_BOOL, vec![u8::from(*v)]),
        PropertyValue::Date(v) => (TAG_DATE, v.to_le_bytes().to_vec()),
        PropertyValue::Geo { lat, lon } => {
            let mut payload = Vec::with_capacity(8);
            payload.extend_from_slice(&lat.to_bits().to_le_bytes());
            payload.extend_from_slice(&lon.to_bits().to_le_bytes());
            (TAG_GEO, payload)
        }
        PropertyValue::Text(s) => (TAG_TEXT, s.as_bytes().to_vec()),
        PropertyValue::Phone(s) => (TAG_PHONE, s.as_bytes().to_vec()),
        PropertyValue::SingleRef(r) => {
            let mut payload = Vec::with_capacity(32);
            encode_reference(&mut payload, r);
            (TAG_SINGLE_REF, payload)
        }
        PropertyValue::MultiRef(refs) => {
            let mut payload = Vec::with_capacity(4 + refs.len() * 32);
            let count = u32::try_from(refs.len())
                .map_err(|_| Error::invalid_input("reference count exceeds u32".to_string()))?;
            payload.extend_from_slice(&count.to_le_bytes());
            for r in refs {
                encode_reference(&mut payload, r);
            }
            (TAG_MULTI_REF, payload)
        }
        PropertyValue::Unknown { tag, payload } => (*tag, payload.clone()),
    };
    Ok(pair)
}

fn encode_reference(out: &mut Vec<u8>, r: &Reference) {
    out.push(r.beacon.kind.as_byte());
    out.extend_from_slice(r.beacon.uuid.as_bytes());
    match r.classification {
        None => out.push(0),
        Some(meta) => {
            let mut flags = REF_FLAG_CLASSIFIED;
            if meta.losing_distance.is_some() {
                flags |= REF_FLAG_HAS_LOSING;
            }
            out.push(flags);
            out.extend_from_slice(&meta.winning_distance.to_bits().to_le_bytes());
            if let Some(losing) = meta.losing_distance {
                out.extend_from_slice(&losing.to_bits().to_le_bytes());
            }
        }
    }
}

pub fn decode(raw: &[u8]) -> Result<Object> {
    let mut cursor = 0usize;
    let version = read_u8(raw, &mut cursor)?;
    if version != CODEC_VERSION {
        return Err(corrupt(format!("unsupported record version {version}")));
    }
    let kind_byte = read_u8(raw, &mut cursor)?;
    let kind =
        Kind::from_byte(kind_byte).ok_or_else(|| corrupt(format!("unknown kind {kind_byte}")))?;
    let class_len = read_u16(raw, &mut cursor)? as usize;
    let class = read_str(raw, &mut cursor, class_len)?.to_string();
    let uuid = Uuid::from_slice(read_bytes(raw, &mut cursor, 16)?)
        .map_err(|_| corrupt("invalid uuid bytes"))?;
    let created_at = read_i64(raw, &mut cursor)?;
    let updated_at = read_i64(raw, &mut cursor)?;

    let dim = read_u16(raw, &mut cursor)? as usize;
    let mut vector = Vec::with_capacity(dim);
    for _ in 0..dim {
        vector.push(read_f32(raw, &mut cursor)?);
    }

    let prop_count = read_u32(raw, &mut cursor)? as usize;
    let mut obj = Object::new(kind, class, uuid);
    obj.created_at = created_at;
    obj.updated_at = updated_at;
    obj.vector = vector;
    for _ in 0..prop_count {
        let name_len = read_u16(raw, &mut cursor)? as usize;
        let name = read_str(raw, &mut cursor, name_len)?.to_string();
        let tag = read_u8(raw, &mut cursor)?;
        let payload_len = read_u32(raw, &mut cursor)? as usize;
        let payload = read_bytes(raw, &mut cursor, payload_len)?;
        obj.properties.insert(name, decode_payload(tag, payload)?);
    }
    if cursor != raw.len() {
        return Err(corrupt("record trailing bytes"));
    }
    Ok(obj)
}

fn decode_payload(tag: u8, payload: &[u8]) -> Result<PropertyValue> {
    let mut cursor = 0usize;
    let value = match tag {
        TAG_STRING => PropertyValue::String(read_str(payload, &mut cursor, payload.len())?.into()),
        TAG_INT => PropertyValue::Int(read_i64(payload, &mut cursor)?),
        TAG_NUMBER => PropertyValue::Number(read_f64(payload, &mut cursor)?),
        TAG_BOOL => match read_u8(payload, &mut cursor)? {
            0 => PropertyValue::Bool(false),
            1 => PropertyValue::Bool(true),
            other => return Err(corrupt(format!("invalid bool byte {other}"))),
        },
        TAG_DATE => PropertyValue::Date(read_i64(payload, &mut cursor)?),
        TAG_GEO => {
            let lat = read_f32(payload, &mut cursor)?;
            let lon = read_f32(payload, &mut cursor)?;
            PropertyValue::Geo { lat, lon }
        }
        TAG_TEXT => PropertyValue::Text(read_str(payload, &mut cursor, payload.len())?.into()),
        TAG_PHONE => PropertyValue::Phone(read_str(payload, &mut cursor, payload.len())?.into()),
        TAG_SINGLE_REF => PropertyValue::SingleRef(decode_reference(payload, &mut cursor)?),
        TAG_MULTI_REF => {
            let count = read_u32(payload, &mut cursor)? as usize;
            let mut refs = Vec::with_capacity(count);
            for _ in 0..count {
                refs.push(decode_reference(payload, &mut cursor)?);
            }
            PropertyValue::MultiRef(refs)
        }
        // Forward compatibility: preserve the payload opaquely.
        unknown => {
            return Ok(PropertyValue::Unknown {
                tag: unknown,
                payload: payload.to_vec(),
            })
        }
    };
    if cursor != payload.len() {
        return Err(corrupt("property payload trailing bytes"));
    }
    Ok(value)
}

fn decode_reference(raw: &[u8], cursor: &mut usize) -> Result<Reference> {
    let kind_byte = read_u8(raw, cursor)?;
    let kind = Kind::from_byte(kind_byte)
        .ok_or_else(|| corrupt(format!("unknown reference kind {kind_byte}")))?;
    let uuid =
        Uuid::from_slice(read_bytes(raw, cursor, 16)?).map_err(|_| corrupt("invalid ref uuid"))?;
    let flags = read_u8(raw, cursor)?;
    let classification = if flags & REF_FLAG_CLASSIFIED != 0 {
        let winning_distance = read_f32(raw, cursor)?;
        let losing_distance = if flags & REF_FLAG_HAS_LOSING != 0 {
            Some(read_f32(raw, cursor)?)
        } else {
            None
        };
        Some(RefClassification {
            winning_distance,
            losing_distance,
        })
    } else {
        None
    };
    Ok(Reference {
        beacon: Beacon::new(kind, uuid),
        classification,
    })
}
