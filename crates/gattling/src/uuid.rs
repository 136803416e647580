//! Bluetooth UUIDs in their 16-bit and 128-bit wire forms.
//!
//! Attributes on the wire carry either a 16-bit SIG-assigned number or a full
//! 128-bit UUID, both little-endian. The two forms compare equal when the
//! long form is the short form expanded onto the Bluetooth base UUID
//! `00000000-0000-1000-8000-00805F9B34FB`.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// The Bluetooth base UUID in little-endian byte order.
const BASE_UUID_BYTES: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Offset within the base UUID where the 16-bit value is inserted.
const BASE_OFFSET: usize = 12;

/// A Bluetooth UUID, immutable once constructed.
#[derive(Clone, Copy, Eq)]
pub enum Uuid {
    /// 16-bit SIG-assigned short form.
    Uuid16(u16),
    /// Full 128-bit form, stored little-endian as it appears on the wire.
    Uuid128([u8; 16]),
}

impl Uuid {
    /// Creates a UUID from a 16-bit SIG-assigned value.
    pub const fn from_u16(uuid16: u16) -> Self {
        Uuid::Uuid16(uuid16)
    }

    /// Creates a 128-bit UUID from 16 little-endian bytes.
    pub const fn from_bytes_le(bytes: [u8; 16]) -> Self {
        Uuid::Uuid128(bytes)
    }

    /// Tries to create a UUID from a little-endian byte slice.
    ///
    /// Accepts slices of length 2 (16-bit) or 16 (128-bit); anything else
    /// returns `None`.
    pub fn try_from_slice_le(slice: &[u8]) -> Option<Self> {
        match slice.len() {
            2 => Some(Uuid::Uuid16(u16::from_le_bytes([slice[0], slice[1]]))),
            16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(slice);
                Some(Uuid::Uuid128(bytes))
            }
            _ => None,
        }
    }

    /// Returns the canonical 128-bit little-endian representation, expanding
    /// the short form onto the base UUID.
    pub fn canonical_bytes_le(&self) -> [u8; 16] {
        match self {
            Uuid::Uuid16(uuid16) => {
                let mut bytes = BASE_UUID_BYTES;
                bytes[BASE_OFFSET] = *uuid16 as u8;
                bytes[BASE_OFFSET + 1] = (*uuid16 >> 8) as u8;
                bytes
            }
            Uuid::Uuid128(bytes) => *bytes,
        }
    }

    /// Returns the bytes this UUID occupies on the wire: 2 for the short
    /// form, 16 for the long form, little-endian.
    pub fn as_bytes_le(&self) -> Vec<u8> {
        match self {
            Uuid::Uuid16(uuid16) => uuid16.to_le_bytes().to_vec(),
            Uuid::Uuid128(bytes) => bytes.to_vec(),
        }
    }

    /// Tries to represent the UUID as a 16-bit value.
    ///
    /// Succeeds for the short form, and for a long form that is a
    /// SIG-assigned value expanded onto the base UUID.
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Uuid::Uuid16(uuid16) => Some(*uuid16),
            Uuid::Uuid128(bytes) => {
                if bytes[0..BASE_OFFSET] == BASE_UUID_BYTES[0..BASE_OFFSET]
                    && bytes[BASE_OFFSET + 2] == 0
                    && bytes[BASE_OFFSET + 3] == 0
                {
                    Some(u16::from_le_bytes([bytes[BASE_OFFSET], bytes[BASE_OFFSET + 1]]))
                } else {
                    None
                }
            }
        }
    }
}

impl PartialEq for Uuid {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_bytes_le() == other.canonical_bytes_le()
    }
}

impl Hash for Uuid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical_bytes_le().hash(state);
    }
}

impl From<u16> for Uuid {
    fn from(uuid16: u16) -> Self {
        Uuid::Uuid16(uuid16)
    }
}

impl From<[u8; 16]> for Uuid {
    /// Assumes bytes are in little-endian order.
    fn from(bytes: [u8; 16]) -> Self {
        Uuid::Uuid128(bytes)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(uuid16) = self.as_u16() {
            return write!(f, "{:04x}", uuid16);
        }
        // Standard hyphenated format is big-endian
        let mut b = self.canonical_bytes_le();
        b.reverse();
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(uuid16) = self.as_u16() {
            write!(f, "Uuid(0x{:04X})", uuid16)
        } else {
            write!(f, "Uuid({})", self)
        }
    }
}

#[derive(Debug, Error)]
pub enum UuidParseError {
    #[error("UUID must be 4 or 32 hex digits, got {0}")]
    InvalidLength(usize),
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.chars().filter(|c| *c != '-').collect();

        match cleaned.len() {
            4 => {
                let mut bytes = [0u8; 2];
                hex::decode_to_slice(&cleaned, &mut bytes)?;
                Ok(Uuid::Uuid16(u16::from_be_bytes(bytes)))
            }
            32 => {
                let mut bytes = [0u8; 16];
                hex::decode_to_slice(&cleaned, &mut bytes)?;
                bytes.reverse(); // text is big-endian, storage little-endian
                Ok(Uuid::Uuid128(bytes))
            }
            n => Err(UuidParseError::InvalidLength(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_and_expanded_forms_compare_equal() {
        let short = Uuid::from_u16(0x2902);
        let long = Uuid::from_bytes_le(short.canonical_bytes_le());
        assert_eq!(short, long);
        assert_eq!(long.as_u16(), Some(0x2902));
    }

    #[test]
    fn vendor_uuid_is_not_a_short_form() {
        let mut bytes = [0u8; 16];
        bytes[15] = 0xAB;
        let uuid = Uuid::from_bytes_le(bytes);
        assert_eq!(uuid.as_u16(), None);
        assert_ne!(uuid, Uuid::from_u16(0x0000));
    }

    #[test]
    fn wire_bytes_round_trip() {
        let short = Uuid::from_u16(0x180D);
        assert_eq!(short.as_bytes_le(), vec![0x0D, 0x18]);
        assert_eq!(Uuid::try_from_slice_le(&short.as_bytes_le()), Some(short));

        let long = Uuid::from_bytes_le([7u8; 16]);
        assert_eq!(Uuid::try_from_slice_le(&long.as_bytes_le()), Some(long));
        assert_eq!(Uuid::try_from_slice_le(&[1, 2, 3]), None);
    }

    #[test]
    fn parse_and_display() {
        let uuid: Uuid = "180A".parse().unwrap();
        assert_eq!(uuid, Uuid::from_u16(0x180A));
        assert_eq!(uuid.to_string(), "180a");

        let long: Uuid = "0000180a-0000-1000-8000-00805f9b34fb".parse().unwrap();
        assert_eq!(long, uuid);

        let vendor: Uuid = "4a650040-b7e4-4b91-a032-5f6c9a1d7e3a".parse().unwrap();
        assert_eq!(vendor.to_string(), "4a650040-b7e4-4b91-a032-5f6c9a1d7e3a");

        assert!("nope".parse::<Uuid>().is_err());
    }
}
