//! Decode/encode an item's raw bytes according to its declared
//! [`PrimitiveType`], falling back to [`Value::Raw`] for anything this
//! codec does not yet understand (vendor extensions, array-of-compound
//! types) rather than rejecting the read.

use bmx_klv::Uuid;
use bmx_model::{PrimitiveType, Rational, Timestamp, Value};

pub fn decode(ty: &PrimitiveType, bytes: &[u8]) -> Value {
    match ty {
        PrimitiveType::UInt8 if bytes.len() == 1 => Value::UInt8(bytes[0]),
        PrimitiveType::UInt16 if bytes.len() == 2 => {
            Value::UInt16(u16::from_be_bytes([bytes[0], bytes[1]]))
        }
        PrimitiveType::UInt32 if bytes.len() == 4 => {
            Value::UInt32(u32::from_be_bytes(bytes[0..4].try_into().unwrap()))
        }
        PrimitiveType::UInt64 if bytes.len() == 8 => {
            Value::UInt64(u64::from_be_bytes(bytes[0..8].try_into().unwrap()))
        }
        PrimitiveType::Int8 if bytes.len() == 1 => Value::Int8(bytes[0] as i8),
        PrimitiveType::Int16 if bytes.len() == 2 => {
            Value::Int16(i16::from_be_bytes([bytes[0], bytes[1]]))
        }
        PrimitiveType::Int32 if bytes.len() == 4 => {
            Value::Int32(i32::from_be_bytes(bytes[0..4].try_into().unwrap()))
        }
        PrimitiveType::Int64 if bytes.len() == 8 => {
            Value::Int64(i64::from_be_bytes(bytes[0..8].try_into().unwrap()))
        }
        PrimitiveType::Rational if bytes.len() == 8 => Value::Rational(Rational::new(
            i32::from_be_bytes(bytes[0..4].try_into().unwrap()),
            i32::from_be_bytes(bytes[4..8].try_into().unwrap()),
        )),
        PrimitiveType::Uuid if bytes.len() == 16 => {
            let mut b = [0u8; 16];
            b.copy_from_slice(bytes);
            Value::Uuid(Uuid(b))
        }
        PrimitiveType::StrongReference if bytes.len() == 16 => {
            let mut b = [0u8; 16];
            b.copy_from_slice(bytes);
            Value::StrongReference(Uuid(b))
        }
        PrimitiveType::WeakReference if bytes.len() == 16 => {
            let mut b = [0u8; 16];
            b.copy_from_slice(bytes);
            Value::WeakReference(Uuid(b))
        }
        PrimitiveType::Timestamp if bytes.len() == 8 => Value::Timestamp(Timestamp {
            year: u16::from_be_bytes([bytes[0], bytes[1]]),
            month: bytes[2],
            day: bytes[3],
            hour: bytes[4],
            min: bytes[5],
            sec: bytes[6],
            qmsec: bytes[7],
        }),
        PrimitiveType::Utf16String => {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .take_while(|&u| u != 0)
                .collect();
            Value::String(String::from_utf16_lossy(&units))
        }
        PrimitiveType::Utf8String => {
            Value::String(String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string())
        }
        PrimitiveType::Iso7String => Value::String(
            bytes
                .iter()
                .take_while(|&&b| b != 0)
                .map(|&b| b as char)
                .collect(),
        ),
        PrimitiveType::Array(inner) => {
            if bytes.len() < 8 {
                return Value::Raw(bytes.to_vec());
            }
            let count = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
            let element_len = u32::from_be_bytes(bytes[4..8].try_into().unwrap()) as usize;
            let mut out = Vec::with_capacity(count);
            let mut offset = 8;
            for _ in 0..count {
                if offset + element_len > bytes.len() {
                    break;
                }
                out.push(decode(inner, &bytes[offset..offset + element_len]));
                offset += element_len;
            }
            Value::Array(out)
        }
        _ => Value::Raw(bytes.to_vec()),
    }
}

pub fn encode(value: &Value) -> Vec<u8> {
    match value {
        Value::UInt8(v) => vec![*v],
        Value::UInt16(v) => v.to_be_bytes().to_vec(),
        Value::UInt32(v) => v.to_be_bytes().to_vec(),
        Value::UInt64(v) => v.to_be_bytes().to_vec(),
        Value::Int8(v) => vec![*v as u8],
        Value::Int16(v) => v.to_be_bytes().to_vec(),
        Value::Int32(v) => v.to_be_bytes().to_vec(),
        Value::Int64(v) => v.to_be_bytes().to_vec(),
        Value::Rational(r) => {
            let mut out = r.numerator.to_be_bytes().to_vec();
            out.extend_from_slice(&r.denominator.to_be_bytes());
            out
        }
        Value::Uuid(u) | Value::StrongReference(u) | Value::WeakReference(u) => u.0.to_vec(),
        Value::Timestamp(t) => {
            let mut out = t.year.to_be_bytes().to_vec();
            out.extend_from_slice(&[t.month, t.day, t.hour, t.min, t.sec, t.qmsec]);
            out
        }
        Value::String(s) => {
            let mut out = Vec::with_capacity(s.len() * 2 + 2);
            for unit in s.encode_utf16() {
                out.extend_from_slice(&unit.to_be_bytes());
            }
            out.extend_from_slice(&[0, 0]);
            out
        }
        Value::Array(items) => {
            let encoded: Vec<Vec<u8>> = items.iter().map(encode).collect();
            let element_len = encoded.first().map(|e| e.len()).unwrap_or(0);
            let mut out = (encoded.len() as u32).to_be_bytes().to_vec();
            out.extend_from_slice(&(element_len as u32).to_be_bytes());
            for e in encoded {
                out.extend_from_slice(&e);
            }
            out
        }
        Value::Umid(bmx_model::Umid::Basic(b)) => b.to_vec(),
        Value::Umid(bmx_model::Umid::Extended(b)) => b.to_vec(),
        Value::ProductVersion(p) => {
            let mut out = Vec::with_capacity(10);
            for v in [p.major, p.minor, p.patch, p.build, p.release] {
                out.extend_from_slice(&v.to_be_bytes());
            }
            out
        }
        Value::RgbaLayout(components) => components
            .iter()
            .flat_map(|c| [c.code, c.depth])
            .collect(),
        Value::Raw(bytes) => bytes.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint32_round_trips() {
        let v = Value::UInt32(0xdead_beef);
        let bytes = encode(&v);
        assert_eq!(decode(&PrimitiveType::UInt32, &bytes), v);
    }

    #[test]
    fn rational_round_trips() {
        let v = Value::Rational(Rational::new(30000, 1001));
        let bytes = encode(&v);
        assert_eq!(decode(&PrimitiveType::Rational, &bytes), v);
    }

    #[test]
    fn utf16_string_decodes_null_terminated() {
        let mut bytes = Vec::new();
        for unit in "hi".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        bytes.extend_from_slice(&[0, 0, 0xAA, 0xBB]);
        if let Value::String(s) = decode(&PrimitiveType::Utf16String, &bytes) {
            assert_eq!(s, "hi");
        } else {
            panic!("expected string");
        }
    }
}
