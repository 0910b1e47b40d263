//! DataValue — a Variant plus quality and timing, behind a presence mask.

use bytes::{BufMut, BytesMut};

use super::{DateTime, StatusCode, Variant};
use crate::codec::{BinaryDecode, BinaryEncode, BinaryReader, CodecError};

const HAS_VALUE: u8 = 0x01;
const HAS_STATUS: u8 = 0x02;
const HAS_SOURCE_TIMESTAMP: u8 = 0x04;
const HAS_SERVER_TIMESTAMP: u8 = 0x08;
const HAS_SOURCE_PICOSECONDS: u8 = 0x10;
const HAS_SERVER_PICOSECONDS: u8 = 0x20;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    pub value: Option<Variant>,
    /// Absent means Good.
    pub status: Option<StatusCode>,
    pub source_timestamp: Option<DateTime>,
    /// Sub-tick precision, 0–9999.
    pub source_picoseconds: Option<u16>,
    pub server_timestamp: Option<DateTime>,
    pub server_picoseconds: Option<u16>,
}

impl DataValue {
    pub fn new(value: impl Into<Variant>) -> Self {
        DataValue {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// Effective quality: the carried status, or Good when omitted.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::GOOD)
    }
}

impl BinaryEncode for DataValue {
    fn encode(&self, out: &mut BytesMut) {
        let mut mask = 0u8;
        if self.value.is_some() {
            mask |= HAS_VALUE;
        }
        if self.status.is_some() {
            mask |= HAS_STATUS;
        }
        if self.source_timestamp.is_some() {
            mask |= HAS_SOURCE_TIMESTAMP;
        }
        if self.source_picoseconds.is_some() {
            mask |= HAS_SOURCE_PICOSECONDS;
        }
        if self.server_timestamp.is_some() {
            mask |= HAS_SERVER_TIMESTAMP;
        }
        if self.server_picoseconds.is_some() {
            mask |= HAS_SERVER_PICOSECONDS;
        }
        out.put_u8(mask);
        if let Some(value) = &self.value {
            value.encode(out);
        }
        if let Some(status) = self.status {
            status.encode(out);
        }
        if let Some(ts) = self.source_timestamp {
            ts.encode(out);
        }
        if let Some(pico) = self.source_picoseconds {
            out.put_u16_le(pico);
        }
        if let Some(ts) = self.server_timestamp {
            ts.encode(out);
        }
        if let Some(pico) = self.server_picoseconds {
            out.put_u16_le(pico);
        }
    }
}

impl BinaryDecode for DataValue {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        let mask = input.read_u8()?;
        if mask & 0xc0 != 0 {
            return Err(CodecError::UnknownByte {
                field: "DataValue mask",
                value: mask,
            });
        }
        input.enter_nested()?;
        let value = if mask & HAS_VALUE != 0 {
            Some(Variant::decode(input)?)
        } else {
            None
        };
        input.leave_nested();
        let status = if mask & HAS_STATUS != 0 {
            Some(StatusCode::decode(input)?)
        } else {
            None
        };
        let source_timestamp = if mask & HAS_SOURCE_TIMESTAMP != 0 {
            Some(DateTime::decode(input)?)
        } else {
            None
        };
        let source_picoseconds = if mask & HAS_SOURCE_PICOSECONDS != 0 {
            Some(read_picoseconds(input)?)
        } else {
            None
        };
        let server_timestamp = if mask & HAS_SERVER_TIMESTAMP != 0 {
            Some(DateTime::decode(input)?)
        } else {
            None
        };
        let server_picoseconds = if mask & HAS_SERVER_PICOSECONDS != 0 {
            Some(read_picoseconds(input)?)
        } else {
            None
        };
        Ok(DataValue {
            value,
            status,
            source_timestamp,
            source_picoseconds,
            server_timestamp,
            server_picoseconds,
        })
    }
}

fn read_picoseconds(input: &mut BinaryReader<'_>) -> Result<u16, CodecError> {
    let pico = input.read_u16()?;
    if pico > 9999 {
        return Err(CodecError::OutOfRange {
            field: "picoseconds",
        });
    }
    Ok(pico)
}
