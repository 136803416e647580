//! Transport for framed ATT PDUs
//!
//! The state machine only needs two operations from its transport: send one
//! PDU and block until one PDU arrives. [`AttTransport`] captures that
//! contract; [`L2capStream`] implements it over the kernel's connection-
//! oriented L2CAP socket bound to the ATT fixed channel.

use crate::att::constants::ATT_CID;
use crate::error::Error;
use log::trace;
use std::fmt;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::str::FromStr;
use thiserror::Error as ThisError;

// Bluetooth socket constants
const AF_BLUETOOTH: i32 = 31;
const BTPROTO_L2CAP: i32 = 0;
const BDADDR_LE_PUBLIC: u8 = 0x01;
const BDADDR_LE_RANDOM: u8 = 0x02;

/// A single framed-PDU endpoint.
///
/// Implementations transfer whole PDUs: one `send` is one PDU on the wire,
/// one `recv` yields exactly one PDU. The adapter is single-owner; it must
/// not be shared across concurrent senders.
pub trait AttTransport {
    /// Transmits one PDU atomically.
    fn send(&mut self, pdu: &[u8]) -> Result<(), Error>;

    /// Blocks until one PDU is available, fills `buf` and returns the
    /// occupied prefix. The first byte is the ATT opcode.
    fn recv<'a>(&mut self, buf: &'a mut [u8]) -> Result<&'a [u8], Error>;
}

/// Peer address type carried in the LE socket address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Public,
    Random,
}

impl From<AddressType> for u8 {
    fn from(value: AddressType) -> Self {
        match value {
            AddressType::Public => BDADDR_LE_PUBLIC,
            AddressType::Random => BDADDR_LE_RANDOM,
        }
    }
}

/// A Bluetooth device address, stored little-endian as the kernel expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BdAddr {
    pub bytes: [u8; 6],
}

impl BdAddr {
    pub fn new(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

#[derive(Debug, ThisError)]
#[error("expected a device address like AA:BB:CC:DD:EE:FF")]
pub struct AddrParseError;

impl FromStr for BdAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut count = 0;
        for part in s.split(':') {
            if count == 6 || part.len() != 2 {
                return Err(AddrParseError);
            }
            // Text is big-endian, storage little-endian
            bytes[5 - count] = u8::from_str_radix(part, 16).map_err(|_| AddrParseError)?;
            count += 1;
        }
        if count != 6 {
            return Err(AddrParseError);
        }
        Ok(BdAddr { bytes })
    }
}

// The kernel's sockaddr for L2CAP sockets
#[repr(C)]
struct SockaddrL2 {
    l2_family: libc::sa_family_t,
    l2_psm: u16,
    l2_bdaddr: [u8; 6],
    l2_cid: u16,
    l2_bdaddr_type: u8,
}

/// A connected L2CAP channel on the ATT fixed CID.
#[derive(Debug)]
pub struct L2capStream {
    fd: RawFd,
}

impl L2capStream {
    /// Opens an LE L2CAP socket on the ATT channel and connects it to the
    /// peer. Blocks until the link is up or the kernel gives up.
    pub fn connect(addr: BdAddr, addr_type: AddressType) -> Result<Self, Error> {
        let fd = unsafe { libc::socket(AF_BLUETOOTH, libc::SOCK_SEQPACKET, BTPROTO_L2CAP) };
        if fd < 0 {
            return Err(Error::Transport(io::Error::last_os_error()));
        }

        // Bind the local end to the ATT channel before connecting
        let local = SockaddrL2 {
            l2_family: AF_BLUETOOTH as libc::sa_family_t,
            l2_psm: 0,
            l2_bdaddr: [0u8; 6],
            l2_cid: ATT_CID.to_le(),
            l2_bdaddr_type: BDADDR_LE_PUBLIC,
        };

        let result = unsafe {
            libc::bind(
                fd,
                &local as *const _ as *const libc::sockaddr,
                std::mem::size_of::<SockaddrL2>() as libc::socklen_t,
            )
        };
        if result < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Transport(err));
        }

        let remote = SockaddrL2 {
            l2_family: AF_BLUETOOTH as libc::sa_family_t,
            l2_psm: 0,
            l2_bdaddr: addr.bytes,
            l2_cid: ATT_CID.to_le(),
            l2_bdaddr_type: addr_type.into(),
        };

        let result = unsafe {
            libc::connect(
                fd,
                &remote as *const _ as *const libc::sockaddr,
                std::mem::size_of::<SockaddrL2>() as libc::socklen_t,
            )
        };
        if result < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Transport(err));
        }

        trace!("connected L2CAP CID {:#06x} to {}", ATT_CID, addr);
        Ok(L2capStream { fd })
    }
}

impl AttTransport for L2capStream {
    fn send(&mut self, pdu: &[u8]) -> Result<(), Error> {
        let written =
            unsafe { libc::write(self.fd, pdu.as_ptr() as *const libc::c_void, pdu.len()) };
        if written < 0 {
            return Err(Error::Transport(io::Error::last_os_error()));
        }
        if written as usize != pdu.len() {
            return Err(Error::Transport(io::Error::new(
                io::ErrorKind::WriteZero,
                "short write on L2CAP socket",
            )));
        }
        trace!("sent {} byte PDU, opcode {:#04x}", pdu.len(), pdu[0]);
        Ok(())
    }

    fn recv<'a>(&mut self, buf: &'a mut [u8]) -> Result<&'a [u8], Error> {
        let read =
            unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if read < 0 {
            return Err(Error::Transport(io::Error::last_os_error()));
        }
        if read == 0 {
            return Err(Error::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the L2CAP channel",
            )));
        }
        trace!("received {} byte PDU, opcode {:#04x}", read, buf[0]);
        Ok(&buf[..read as usize])
    }
}

impl AsRawFd for L2capStream {
    /// The descriptor, for callers multiplexing with their own readiness
    /// loop.
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for L2capStream {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
