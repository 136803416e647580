//! Attribute Protocol (ATT) client pieces
//!
//! This module holds the wire-level half of the library: opcode and error
//! constants, and the PDU codec that encodes requests and lends typed views
//! over received response buffers.

pub mod constants;
pub mod error;
pub mod pdu;


pub use self::constants::*;
pub use self::error::{AttErrorCode, DecodeError};
