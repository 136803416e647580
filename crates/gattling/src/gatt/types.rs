//! The in-memory view of a peer's attribute database
//!
//! A flat, ordered tree: services in ascending handle order, each holding its
//! characteristics in ascending handle order. Lookups are linear scans gated
//! on handle-range containment; peers expose tens of attributes, not
//! thousands, so no index is kept.

use crate::uuid::Uuid;
use std::fmt;

/// Characteristic property flags, decoded from the declaration's flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicProps(pub u8);

impl CharacteristicProps {
    pub const BROADCAST: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const WRITE_WITHOUT_RESPONSE: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
    pub const INDICATE: u8 = 0x20;
    pub const AUTHENTICATED_SIGNED_WRITES: u8 = 0x40;
    pub const EXTENDED_PROPERTIES: u8 = 0x80;

    pub fn can_broadcast(&self) -> bool {
        (self.0 & Self::BROADCAST) != 0
    }

    pub fn can_read(&self) -> bool {
        (self.0 & Self::READ) != 0
    }

    pub fn can_write_without_response(&self) -> bool {
        (self.0 & Self::WRITE_WITHOUT_RESPONSE) != 0
    }

    pub fn can_write(&self) -> bool {
        (self.0 & Self::WRITE) != 0
    }

    pub fn can_notify(&self) -> bool {
        (self.0 & Self::NOTIFY) != 0
    }

    pub fn can_indicate(&self) -> bool {
        (self.0 & Self::INDICATE) != 0
    }

    pub fn can_authenticated_signed_write(&self) -> bool {
        (self.0 & Self::AUTHENTICATED_SIGNED_WRITES) != 0
    }

    pub fn has_extended_properties(&self) -> bool {
        (self.0 & Self::EXTENDED_PROPERTIES) != 0
    }
}

impl fmt::Display for CharacteristicProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::BROADCAST, "broadcast"),
            (Self::READ, "read"),
            (Self::WRITE_WITHOUT_RESPONSE, "write-without-response"),
            (Self::WRITE, "write"),
            (Self::NOTIFY, "notify"),
            (Self::INDICATE, "indicate"),
            (Self::AUTHENTICATED_SIGNED_WRITES, "authenticated-signed-writes"),
            (Self::EXTENDED_PROPERTIES, "extended-properties"),
        ];
        let mut first = true;
        for (bit, name) in names {
            if (self.0 & bit) != 0 {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// One characteristic discovered inside a service.
#[derive(Debug, Clone)]
pub struct Characteristic {
    /// What the characteristic represents semantically.
    pub uuid: Uuid,
    /// Property flags from the declaration.
    pub props: CharacteristicProps,
    /// Handle at which the value is read and written, and at which
    /// notifications and indications for this characteristic arrive.
    pub value_handle: u16,
    /// Handle of the declaration attribute itself.
    pub first_handle: u16,
    /// Upper bound of the handle range belonging to this characteristic.
    /// Starts at the owning service's end handle and is pulled back to just
    /// before the next declaration once one is appended.
    pub last_handle: u16,
    /// Handle of the Client Characteristic Configuration descriptor, or 0 if
    /// none was discovered.
    pub ccc_handle: u16,
    /// Last value read from or written to the configuration descriptor.
    pub ccc_last_known_value: u16,
}

impl Characteristic {
    /// Whether `handle` is a member attribute of this characteristic. The
    /// declaration itself, at `first_handle`, is not a member.
    pub fn owns_handle(&self, handle: u16) -> bool {
        self.first_handle < handle && handle <= self.last_handle
    }
}

/// A primary service: a contiguous handle range grouping related attributes.
#[derive(Debug, Clone)]
pub struct PrimaryService {
    /// First handle of the range, where the service declaration lives.
    pub start_handle: u16,
    /// Last handle of the range, inclusive.
    pub end_handle: u16,
    pub uuid: Uuid,
    /// Characteristics in ascending handle order.
    pub characteristics: Vec<Characteristic>,
}

impl PrimaryService {
    /// Whether `handle` is a member attribute of this service. The service
    /// declaration itself, at `start_handle`, is not a member.
    pub fn owns_handle(&self, handle: u16) -> bool {
        self.start_handle < handle && handle <= self.end_handle
    }
}
