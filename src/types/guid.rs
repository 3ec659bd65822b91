//! 16-byte GUID values.

use bytes::{Buf, BufMut, BytesMut};
use rand::RngCore;
use std::fmt;

use super::encoding::{BinaryDecode, BinaryEncode, DecodingLimits, EncodingResult};
use super::status::StatusCode;

/// A GUID in the OPC UA wire layout: `(u32, u16, u16, [u8; 8])`, the first
/// three fields little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    /// A fresh random (version 4) GUID.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        // Stamp the RFC 4122 version and variant bits.
        bytes[7] = (bytes[7] & 0x0F) | 0x40;
        bytes[8] = (bytes[8] & 0x3F) | 0x80;
        Self {
            data1: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            data2: u16::from_le_bytes([bytes[4], bytes[5]]),
            data3: u16::from_le_bytes([bytes[6], bytes[7]]),
            data4: bytes[8..16].try_into().unwrap_or_default(),
        }
    }

    pub fn is_null(&self) -> bool {
        *self == Guid::default()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7],
        )
    }
}

impl BinaryEncode for Guid {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        buf.put_u32_le(self.data1);
        buf.put_u16_le(self.data2);
        buf.put_u16_le(self.data3);
        buf.put_slice(&self.data4);
        Ok(())
    }
}

impl BinaryDecode for Guid {
    fn decode<B: Buf>(buf: &mut B, _limits: &DecodingLimits) -> EncodingResult<Self> {
        if buf.remaining() < 16 {
            return Err(StatusCode::BAD_DECODING_ERROR);
        }
        let data1 = buf.get_u32_le();
        let data2 = buf.get_u16_le();
        let data3 = buf.get_u16_le();
        let mut data4 = [0u8; 8];
        buf.copy_to_slice(&mut data4);
        Ok(Self {
            data1,
            data2,
            data3,
            data4,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let guid = Guid::random();
        let mut buf = BytesMut::new();
        guid.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), 16);
        let decoded = Guid::decode(&mut buf.freeze(), &DecodingLimits::default()).unwrap();
        assert_eq!(guid, decoded);
    }

    #[test]
    fn random_guids_differ() {
        assert_ne!(Guid::random(), Guid::random());
    }
}
