// AMF3 value
//
// Only reachable via an AMF0 "switch to AMF3" marker (0x11) inside an
// otherwise-AMF0 command payload; RTMP command messages never use AMF3 as
// their outer encoding. Array/Object are represented but not decoded further
// since no command this crate handles carries one.

use byteorder::{BigEndian, ByteOrder};

use super::AMFDecodingCursor;
use crate::error::AmfError;

const AMF3_TYPE_UNDEFINED: u8 = 0x00;
const AMF3_TYPE_NULL: u8 = 0x01;
const AMF3_TYPE_FALSE: u8 = 0x02;
const AMF3_TYPE_TRUE: u8 = 0x03;
const AMF3_TYPE_INTEGER: u8 = 0x04;
const AMF3_TYPE_DOUBLE: u8 = 0x05;
const AMF3_TYPE_STRING: u8 = 0x06;
const AMF3_TYPE_XML_DOC: u8 = 0x07;
const AMF3_TYPE_DATE: u8 = 0x08;
const AMF3_TYPE_ARRAY: u8 = 0x09;
const AMF3_TYPE_OBJECT: u8 = 0x0A;
const AMF3_TYPE_XML: u8 = 0x0B;
const AMF3_TYPE_BYTE_ARRAY: u8 = 0x0C;

/// AMF3 compatible value
#[derive(Clone, Debug)]
pub enum AMF3Value {
    Undefined,
    Null,
    False,
    True,
    Integer { value: i32 },
    Double { value: f64 },
    String { value: String },
    XmlDocument { content: String },
    Date { timestamp: f64 },
    Array,
    Object,
    Xml { value: String },
    ByteArray { value: Vec<u8> },
}

impl AMF3Value {
    /// Obtains a string representation of the value
    /// Used for debug logging purposes
    pub fn to_debug_string(&self, _tabs: &str) -> String {
        match self {
            AMF3Value::Undefined => "Undefined".to_string(),
            AMF3Value::Null => "Null".to_string(),
            AMF3Value::False => "False".to_string(),
            AMF3Value::True => "True".to_string(),
            AMF3Value::Integer { value } => format!("Integer({})", value),
            AMF3Value::Double { value } => format!("Double({})", value),
            AMF3Value::String { value } => format!("'{}'", value),
            AMF3Value::XmlDocument { content } => format!("XML_DOC'{}'", content),
            AMF3Value::Date { timestamp } => format!("DATE({})", timestamp),
            AMF3Value::Array => "Array(Unsupported)".to_string(),
            AMF3Value::Object => "Object(Unsupported)".to_string(),
            AMF3Value::Xml { value } => format!("XML'{}'", value),
            AMF3Value::ByteArray { value } => format!("Bytes({})", hex::encode(value)),
        }
    }

    pub fn get_bool(&self) -> bool {
        matches!(self, AMF3Value::True)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, AMF3Value::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AMF3Value::Null)
    }

    pub fn get_integer(&self) -> i64 {
        match self {
            AMF3Value::Integer { value } => *value as i64,
            AMF3Value::Double { value } => *value as i64,
            _ => 0,
        }
    }

    pub fn get_float(&self) -> f64 {
        match self {
            AMF3Value::Integer { value } => *value as f64,
            AMF3Value::Double { value } => *value,
            _ => 0.0,
        }
    }

    pub fn get_string(&self) -> &str {
        match self {
            AMF3Value::String { value } => value.as_str(),
            AMF3Value::XmlDocument { content } => content.as_str(),
            AMF3Value::Xml { value } => value.as_str(),
            _ => "",
        }
    }

    pub fn get_byte_array(&self) -> Option<&Vec<u8>> {
        match self {
            AMF3Value::ByteArray { value } => Some(value),
            _ => None,
        }
    }

    /// Reads a U29 variable-length integer (AMF3's packed integer encoding:
    /// up to 3 bytes with the high bit as a continuation flag, a 4th byte
    /// contributing a full 8 bits)
    fn read_u29(cursor: &mut AMFDecodingCursor, buffer: &[u8]) -> Result<u32, AmfError> {
        let mut result: u32 = 0;

        for i in 0..4 {
            let byte = cursor.read_u8(buffer)?;
            if i == 3 {
                result = (result << 8) | byte as u32;
                break;
            }

            result = (result << 7) | (byte & 0x7f) as u32;
            if byte & 0x80 == 0 {
                break;
            }
        }

        Ok(result)
    }

    fn read_utf8_vr(cursor: &mut AMFDecodingCursor, buffer: &[u8]) -> Result<String, AmfError> {
        let header = Self::read_u29(cursor, buffer)?;
        let len = (header >> 1) as usize;
        let bytes = cursor.read(buffer, len)?;
        Ok(String::from_utf8_lossy(bytes).to_string())
    }

    /// Reads one AMF3 value, assuming the AMF3 type marker byte has not yet
    /// been consumed
    pub fn read(cursor: &mut AMFDecodingCursor, buffer: &[u8]) -> Result<AMF3Value, AmfError> {
        let marker = cursor.read_u8(buffer)?;

        match marker {
            AMF3_TYPE_UNDEFINED => Ok(AMF3Value::Undefined),
            AMF3_TYPE_NULL => Ok(AMF3Value::Null),
            AMF3_TYPE_FALSE => Ok(AMF3Value::False),
            AMF3_TYPE_TRUE => Ok(AMF3Value::True),
            AMF3_TYPE_INTEGER => {
                let raw = Self::read_u29(cursor, buffer)?;
                // U29 is a 29-bit two's complement value
                let value = if raw & 0x1000_0000 != 0 {
                    (raw | 0xE000_0000) as i32
                } else {
                    raw as i32
                };
                Ok(AMF3Value::Integer { value })
            }
            AMF3_TYPE_DOUBLE => {
                let bytes = cursor.read(buffer, 8)?;
                Ok(AMF3Value::Double {
                    value: BigEndian::read_f64(bytes),
                })
            }
            AMF3_TYPE_STRING => Ok(AMF3Value::String {
                value: Self::read_utf8_vr(cursor, buffer)?,
            }),
            AMF3_TYPE_XML_DOC => Ok(AMF3Value::XmlDocument {
                content: Self::read_utf8_vr(cursor, buffer)?,
            }),
            AMF3_TYPE_DATE => {
                let header = Self::read_u29(cursor, buffer)?;
                if header & 0x01 != 0 {
                    let bytes = cursor.read(buffer, 8)?;
                    Ok(AMF3Value::Date {
                        timestamp: BigEndian::read_f64(bytes),
                    })
                } else {
                    Ok(AMF3Value::Date { timestamp: 0.0 })
                }
            }
            AMF3_TYPE_ARRAY => Ok(AMF3Value::Array),
            AMF3_TYPE_OBJECT => Ok(AMF3Value::Object),
            AMF3_TYPE_XML => Ok(AMF3Value::Xml {
                value: Self::read_utf8_vr(cursor, buffer)?,
            }),
            AMF3_TYPE_BYTE_ARRAY => {
                let header = Self::read_u29(cursor, buffer)?;
                let len = (header >> 1) as usize;
                let bytes = cursor.read(buffer, len)?;
                Ok(AMF3Value::ByteArray { value: bytes.to_vec() })
            }
            other => Err(AmfError::UnknownMarker(other)),
        }
    }

    /// Encodes the AMF0 "switch to AMF3" marker followed by this value
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0x11];

        match self {
            AMF3Value::Undefined => buf.push(AMF3_TYPE_UNDEFINED),
            AMF3Value::Null => buf.push(AMF3_TYPE_NULL),
            AMF3Value::False => buf.push(AMF3_TYPE_FALSE),
            AMF3Value::True => buf.push(AMF3_TYPE_TRUE),
            AMF3Value::Integer { value } => {
                buf.push(AMF3_TYPE_INTEGER);
                buf.extend(Self::encode_u29((*value as u32) & 0x1FFF_FFFF));
            }
            AMF3Value::Double { value } => {
                buf.push(AMF3_TYPE_DOUBLE);
                let mut bytes = [0u8; 8];
                BigEndian::write_f64(&mut bytes, *value);
                buf.extend_from_slice(&bytes);
            }
            AMF3Value::String { value } => {
                buf.push(AMF3_TYPE_STRING);
                buf.extend(Self::encode_utf8_vr(value));
            }
            AMF3Value::XmlDocument { content } => {
                buf.push(AMF3_TYPE_XML_DOC);
                buf.extend(Self::encode_utf8_vr(content));
            }
            AMF3Value::Date { timestamp } => {
                buf.push(AMF3_TYPE_DATE);
                buf.extend(Self::encode_u29(0x01));
                let mut bytes = [0u8; 8];
                BigEndian::write_f64(&mut bytes, *timestamp);
                buf.extend_from_slice(&bytes);
            }
            AMF3Value::Array => buf.push(AMF3_TYPE_ARRAY),
            AMF3Value::Object => buf.push(AMF3_TYPE_OBJECT),
            AMF3Value::Xml { value } => {
                buf.push(AMF3_TYPE_XML);
                buf.extend(Self::encode_utf8_vr(value));
            }
            AMF3Value::ByteArray { value } => {
                buf.push(AMF3_TYPE_BYTE_ARRAY);
                buf.extend(Self::encode_u29((value.len() as u32) << 1 | 1));
                buf.extend_from_slice(value);
            }
        }

        buf
    }

    fn encode_u29(value: u32) -> Vec<u8> {
        if value < 0x80 {
            vec![value as u8]
        } else if value < 0x4000 {
            vec![(value >> 7) as u8 | 0x80, (value & 0x7f) as u8]
        } else if value < 0x20_0000 {
            vec![
                (value >> 14) as u8 | 0x80,
                (value >> 7) as u8 | 0x80,
                (value & 0x7f) as u8,
            ]
        } else {
            vec![
                (value >> 22) as u8 | 0x80,
                (value >> 15) as u8 | 0x80,
                (value >> 8) as u8 | 0x80,
                value as u8,
            ]
        }
    }

    fn encode_utf8_vr(value: &str) -> Vec<u8> {
        let bytes = value.as_bytes();
        let mut out = Self::encode_u29(((bytes.len() as u32) << 1) | 1);
        out.extend_from_slice(bytes);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: AMF3Value) -> AMF3Value {
        let encoded = value.encode();
        // skip the leading 0x11 switch marker to read back the AMF3 payload
        let mut cursor = AMFDecodingCursor::new(&encoded[1..]);
        AMF3Value::read(&mut cursor, &encoded[1..]).unwrap()
    }

    #[test]
    fn test_integer_round_trips_through_u29() {
        let decoded = round_trip(AMF3Value::Integer { value: 12345 });
        assert_eq!(decoded.get_integer(), 12345);
    }

    #[test]
    fn test_negative_integer_round_trips() {
        let decoded = round_trip(AMF3Value::Integer { value: -1 });
        assert_eq!(decoded.get_integer(), -1);
    }

    #[test]
    fn test_string_round_trips() {
        let decoded = round_trip(AMF3Value::String { value: "hello".to_string() });
        assert_eq!(decoded.get_string(), "hello");
    }

    #[test]
    fn test_byte_array_round_trips() {
        let decoded = round_trip(AMF3Value::ByteArray { value: vec![1, 2, 3] });
        assert_eq!(decoded.get_byte_array().unwrap(), &vec![1, 2, 3]);
    }
}
