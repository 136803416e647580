//! ATT PDU codec
//!
//! Encoders build request PDUs as owned byte vectors; decoders are typed,
//! zero-copy views over a received buffer. A view validates the frame shape
//! once at construction, after which the per-element accessors are plain
//! offset arithmetic. Indexed accessors expect `i < num_elements()`.
//!
//! All multi-byte fields are little-endian.

use super::constants::*;
use super::error::DecodeError;
use crate::uuid::Uuid;
use byteorder::{ByteOrder, LittleEndian};

type Result<T> = std::result::Result<T, DecodeError>;

fn require_len(data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn require_opcode(data: &[u8], opcode: u8) -> Result<()> {
    require_len(data, 1)?;
    if data[0] != opcode {
        return Err(DecodeError::UnexpectedOpcode(data[0]));
    }
    Ok(())
}

// --- Encoders ---

fn range_request(opcode: u8, start: u16, end: u16, attribute_type: &Uuid) -> Vec<u8> {
    let uuid_bytes = attribute_type.as_bytes_le();
    let mut packet = Vec::with_capacity(5 + uuid_bytes.len());
    packet.push(opcode);
    packet.extend_from_slice(&start.to_le_bytes());
    packet.extend_from_slice(&end.to_le_bytes());
    packet.extend_from_slice(&uuid_bytes);
    packet
}

/// Read By Type request over `[start, end]` for attributes of the given type.
pub fn read_by_type_req(start: u16, end: u16, attribute_type: &Uuid) -> Vec<u8> {
    range_request(ATT_READ_BY_TYPE_REQ, start, end, attribute_type)
}

/// Read By Group Type request over `[start, end]` for the given group type.
pub fn read_by_group_req(start: u16, end: u16, group_type: &Uuid) -> Vec<u8> {
    range_request(ATT_READ_BY_GROUP_TYPE_REQ, start, end, group_type)
}

/// Find Information request over `[start, end]`.
pub fn find_information_req(start: u16, end: u16) -> Vec<u8> {
    let mut packet = Vec::with_capacity(5);
    packet.push(ATT_FIND_INFO_REQ);
    packet.extend_from_slice(&start.to_le_bytes());
    packet.extend_from_slice(&end.to_le_bytes());
    packet
}

fn write_packet(opcode: u8, handle: u16, value: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(3 + value.len());
    packet.push(opcode);
    packet.extend_from_slice(&handle.to_le_bytes());
    packet.extend_from_slice(value);
    packet
}

/// Write request; the peer acknowledges with a write response.
pub fn write_req(handle: u16, value: &[u8]) -> Vec<u8> {
    write_packet(ATT_WRITE_REQ, handle, value)
}

/// Write command; the peer sends no response.
pub fn write_cmd(handle: u16, value: &[u8]) -> Vec<u8> {
    write_packet(ATT_WRITE_CMD, handle, value)
}

/// Confirmation owed to the peer for every received indication.
pub fn handle_value_confirmation() -> Vec<u8> {
    vec![ATT_HANDLE_VALUE_CONF]
}

// --- Request views ---

/// View over a Read By Type or Read By Group Type request.
pub struct RangeRequest<'a> {
    data: &'a [u8],
    wide: bool,
}

impl<'a> RangeRequest<'a> {
    fn parse_with_opcode(data: &'a [u8], opcode: u8) -> Result<Self> {
        require_opcode(data, opcode)?;
        let wide = match data.len() {
            7 => false,
            21 => true,
            n if n < 7 => {
                return Err(DecodeError::Truncated {
                    expected: 7,
                    actual: n,
                })
            }
            n => return Err(DecodeError::BadValueWidth(n - 5)),
        };
        Ok(Self { data, wide })
    }

    /// Parses a Read By Type request (opcode 0x08).
    pub fn parse_read_by_type(data: &'a [u8]) -> Result<Self> {
        Self::parse_with_opcode(data, ATT_READ_BY_TYPE_REQ)
    }

    /// Parses a Read By Group Type request (opcode 0x10).
    pub fn parse_read_by_group(data: &'a [u8]) -> Result<Self> {
        Self::parse_with_opcode(data, ATT_READ_BY_GROUP_TYPE_REQ)
    }

    pub fn start_handle(&self) -> u16 {
        LittleEndian::read_u16(&self.data[1..3])
    }

    pub fn end_handle(&self) -> u16 {
        LittleEndian::read_u16(&self.data[3..5])
    }

    pub fn attribute_type(&self) -> Uuid {
        uuid_at(&self.data[5..], self.wide)
    }
}

// --- Response views ---

/// Builds a UUID from a validated 2- or 16-byte region.
fn uuid_at(bytes: &[u8], wide: bool) -> Uuid {
    if wide {
        let mut b = [0u8; 16];
        b.copy_from_slice(&bytes[..16]);
        Uuid::Uuid128(b)
    } else {
        Uuid::Uuid16(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

/// Error Response view.
pub struct ErrorResponse<'a> {
    data: &'a [u8],
}

impl<'a> ErrorResponse<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        require_opcode(data, ATT_ERROR_RSP)?;
        require_len(data, 5)?;
        Ok(Self { data })
    }

    /// Opcode of the request that failed.
    pub fn request_opcode(&self) -> u8 {
        self.data[1]
    }

    /// Handle the error refers to.
    pub fn handle(&self) -> u16 {
        LittleEndian::read_u16(&self.data[2..4])
    }

    pub fn error_code(&self) -> super::error::AttErrorCode {
        self.data[4].into()
    }
}

/// Read By Type response: a run of `(handle, value)` elements of one fixed
/// size, announced by the leading element-size byte.
pub struct ReadByTypeResponse<'a> {
    elements: &'a [u8],
    element_size: usize,
}

impl<'a> ReadByTypeResponse<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        require_opcode(data, ATT_READ_BY_TYPE_RSP)?;
        require_len(data, 2)?;
        let element_size = data[1] as usize;
        // 2 handle bytes plus at least one value byte
        if element_size < 3 {
            return Err(DecodeError::BadElementSize(data[1]));
        }
        let elements = &data[2..];
        require_len(data, 2 + element_size)?;
        // A frame carries one element size; a leftover tail means the peer
        // mixed widths or truncated an element.
        if elements.len() % element_size != 0 {
            return Err(DecodeError::RaggedPayload {
                len: elements.len(),
                element_size,
            });
        }
        Ok(Self {
            elements,
            element_size,
        })
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Bytes of value per element.
    pub fn value_size(&self) -> usize {
        self.element_size - 2
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len() / self.element_size
    }

    pub fn handle(&self, i: usize) -> u16 {
        LittleEndian::read_u16(&self.elements[i * self.element_size..])
    }

    pub fn value(&self, i: usize) -> &'a [u8] {
        &self.elements[i * self.element_size + 2..(i + 1) * self.element_size]
    }
}

/// Read By Group Type response: `(start, end, value)` elements where the
/// value is a 16-bit or 128-bit group UUID.
pub struct ReadByGroupResponse<'a> {
    elements: &'a [u8],
    element_size: usize,
    wide: bool,
}

impl<'a> ReadByGroupResponse<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        require_opcode(data, ATT_READ_BY_GROUP_TYPE_RSP)?;
        require_len(data, 2)?;
        let element_size = data[1] as usize;
        if element_size < 5 {
            return Err(DecodeError::BadElementSize(data[1]));
        }
        let wide = match element_size - 4 {
            2 => false,
            16 => true,
            width => return Err(DecodeError::BadValueWidth(width)),
        };
        let elements = &data[2..];
        require_len(data, 2 + element_size)?;
        if elements.len() % element_size != 0 {
            return Err(DecodeError::RaggedPayload {
                len: elements.len(),
                element_size,
            });
        }
        Ok(Self {
            elements,
            element_size,
            wide,
        })
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len() / self.element_size
    }

    pub fn start_handle(&self, i: usize) -> u16 {
        LittleEndian::read_u16(&self.elements[i * self.element_size..])
    }

    pub fn end_handle(&self, i: usize) -> u16 {
        LittleEndian::read_u16(&self.elements[i * self.element_size + 2..])
    }

    pub fn uuid(&self, i: usize) -> Uuid {
        uuid_at(&self.elements[i * self.element_size + 4..], self.wide)
    }
}

/// Find Information response: `(handle, uuid)` pairs in the format named by
/// the leading format byte.
pub struct FindInformationResponse<'a> {
    pairs: &'a [u8],
    pair_size: usize,
    wide: bool,
}

impl<'a> FindInformationResponse<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        require_opcode(data, ATT_FIND_INFO_RSP)?;
        require_len(data, 2)?;
        let (pair_size, wide) = match data[1] {
            ATT_FIND_INFO_FORMAT_16BIT => (4, false),
            ATT_FIND_INFO_FORMAT_128BIT => (18, true),
            format => return Err(DecodeError::BadFormat(format)),
        };
        let pairs = &data[2..];
        require_len(data, 2 + pair_size)?;
        if pairs.len() % pair_size != 0 {
            return Err(DecodeError::RaggedPayload {
                len: pairs.len(),
                element_size: pair_size,
            });
        }
        Ok(Self {
            pairs,
            pair_size,
            wide,
        })
    }

    pub fn format(&self) -> u8 {
        if self.wide {
            ATT_FIND_INFO_FORMAT_128BIT
        } else {
            ATT_FIND_INFO_FORMAT_16BIT
        }
    }

    pub fn num_elements(&self) -> usize {
        self.pairs.len() / self.pair_size
    }

    pub fn handle(&self, i: usize) -> u16 {
        LittleEndian::read_u16(&self.pairs[i * self.pair_size..])
    }

    pub fn uuid(&self, i: usize) -> Uuid {
        uuid_at(&self.pairs[i * self.pair_size + 2..], self.wide)
    }
}

/// A Read By Type response reinterpreted as characteristic declarations:
/// each value is `flags (1) | value handle (2) | uuid (2 or 16)`.
pub struct CharacteristicDeclarations<'a> {
    inner: ReadByTypeResponse<'a>,
    wide: bool,
}

impl<'a> CharacteristicDeclarations<'a> {
    pub fn from_response(inner: ReadByTypeResponse<'a>) -> Result<Self> {
        let wide = match inner.value_size() {
            5 => false,
            19 => true,
            width => return Err(DecodeError::BadValueWidth(width)),
        };
        Ok(Self { inner, wide })
    }

    pub fn num_elements(&self) -> usize {
        self.inner.num_elements()
    }

    /// Handle of the declaration attribute itself.
    pub fn handle(&self, i: usize) -> u16 {
        self.inner.handle(i)
    }

    /// The raw property flag byte.
    pub fn flags(&self, i: usize) -> u8 {
        self.inner.value(i)[0]
    }

    /// Handle at which the characteristic's value lives.
    pub fn value_handle(&self, i: usize) -> u16 {
        LittleEndian::read_u16(&self.inner.value(i)[1..3])
    }

    pub fn uuid(&self, i: usize) -> Uuid {
        uuid_at(&self.inner.value(i)[3..], self.wide)
    }
}

/// A Read By Type response reinterpreted as Client Characteristic
/// Configuration reads: each value is exactly the 16-bit CCC bitmask.
pub struct CccValues<'a> {
    inner: ReadByTypeResponse<'a>,
}

impl<'a> CccValues<'a> {
    pub fn from_response(inner: ReadByTypeResponse<'a>) -> Result<Self> {
        if inner.value_size() != 2 {
            return Err(DecodeError::BadValueWidth(inner.value_size()));
        }
        Ok(Self { inner })
    }

    pub fn num_elements(&self) -> usize {
        self.inner.num_elements()
    }

    /// Handle of the descriptor attribute.
    pub fn handle(&self, i: usize) -> u16 {
        self.inner.handle(i)
    }

    /// The configuration bitmask currently stored at the descriptor.
    pub fn ccc(&self, i: usize) -> u16 {
        LittleEndian::read_u16(self.inner.value(i))
    }
}

/// A server-pushed value: Handle Value Notification or Indication.
pub struct ValuePush<'a> {
    data: &'a [u8],
}

impl<'a> ValuePush<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        require_len(data, 3)?;
        if data[0] != ATT_HANDLE_VALUE_NTF && data[0] != ATT_HANDLE_VALUE_IND {
            return Err(DecodeError::UnexpectedOpcode(data[0]));
        }
        Ok(Self { data })
    }

    /// Handle of the characteristic value that was pushed.
    pub fn handle(&self) -> u16 {
        LittleEndian::read_u16(&self.data[1..3])
    }

    pub fn value(&self) -> &'a [u8] {
        &self.data[3..]
    }

    /// True for a notification; an indication additionally demands a
    /// confirmation PDU from us.
    pub fn is_notification(&self) -> bool {
        self.data[0] == ATT_HANDLE_VALUE_NTF
    }
}
