#![no_std]
#![warn(missing_docs)]
//! A `no_std` implementation of a USB Power Delivery sink-role Policy Engine,
//! Protocol Layer and supporting wire types.

mod fmt;

pub mod counters;
pub mod protocol_layer;
pub mod sink;
pub mod timers;

#[cfg(test)]
extern crate std;

#[cfg(test)]
pub mod dummy;

#[macro_use]
extern crate uom;

/// The CGS unit system used throughout the protocol layer for electrical quantities.
pub use protocol_layer::message::units;

/// The power role negotiated for a USB PD port.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerRole {
    Source,
    Sink,
}

impl From<bool> for PowerRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Sink,
            true => Self::Source,
        }
    }
}

impl From<PowerRole> for bool {
    fn from(role: PowerRole) -> bool {
        match role {
            PowerRole::Sink => false,
            PowerRole::Source => true,
        }
    }
}

#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataRole {
    Ufp,
    Dfp,
}

impl From<bool> for DataRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Ufp,
            true => Self::Dfp,
        }
    }
}

impl From<DataRole> for bool {
    fn from(role: DataRole) -> bool {
        match role {
            DataRole::Ufp => false,
            DataRole::Dfp => true,
        }
    }
}
