//! gattling - a Bluetooth Low Energy ATT/GATT client library
//!
//! This library connects to a BLE peripheral over an L2CAP socket, walks its
//! attribute database (primary services, characteristics and their client
//! configuration descriptors) with an event-driven state machine, and
//! dispatches notifications and indications to user callbacks.

pub mod assigned;
pub mod att;
pub mod error;
pub mod gatt;
pub mod transport;
pub mod uuid;

// Re-export common types for convenience
pub use error::Error;
pub use gatt::{Characteristic, CharacteristicProps, GattClient, PrimaryService, State};
pub use transport::{AddressType, AttTransport, BdAddr, L2capStream};
pub use uuid::Uuid;
