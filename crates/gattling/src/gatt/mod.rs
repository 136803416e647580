//! GATT (Generic Attribute Profile) client
//!
//! Layers service/characteristic semantics on top of the ATT codec: the
//! discovery state machine, the in-memory attribute database it builds, and
//! the subscription operations.

pub mod client;
pub mod types;

#[cfg(test)]
mod tests;

pub use client::{GattClient, State};
pub use types::{Characteristic, CharacteristicProps, PrimaryService};
