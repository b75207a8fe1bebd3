//! Definitions and implementations of extended messages.
//!
//! See [6.5].
use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;
use proc_bitfield::bitfield;

pub mod chunked;
pub mod extended_control;

use super::data::sink_capabilities::SinkPowerDataObject;
use super::data::source_capabilities::PowerDataObject;

/// Maximum number of PDOs carried in an EPR (Sink or Source) Capabilities message.
///
/// Per USB PD Spec R3.2 Section 6.5.15.1, an EPR Capabilities message carries up to
/// 7 SPR (A)PDOs followed by up to 4 EPR (A)PDOs.
pub const MAX_EPR_PDOS: usize = 11;

bitfield! {
    /// The extended message header.
    ///
    /// See [6.2.1.2]. Present in every extended message, immediately following the
    /// standard message [`super::header::Header`].
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ExtendedHeader(pub u16): Debug, FromStorage, IntoStorage {
        /// Indicates that the message is chunked.
        pub chunked: bool @ 15,
        /// The number of this chunk.
        pub chunk_number: u8 @ 11..=14,
        /// Set by the chunk requester to ask for the next chunk.
        pub request_chunk: bool @ 10,
        /// Total size of the unchunked message, in bytes.
        pub data_size: u16 @ 0..=8,
    }
}

impl ExtendedHeader {
    /// Create a new extended header for a message of the given total size.
    pub fn new(data_size: u16) -> Self {
        Self(0).with_chunked(true).with_data_size(data_size)
    }

    /// Serialize the extended header.
    pub fn to_bytes(self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u16(buf, self.0);
        2
    }

    /// Parse an extended header from bytes.
    pub fn from_bytes(buf: &[u8]) -> Self {
        assert!(buf.len() >= 2);
        Self(LittleEndian::read_u16(buf))
    }
}

impl Default for ExtendedHeader {
    fn default() -> Self {
        Self(0).with_chunked(true)
    }
}

/// Types of extended messages.
///
/// TODO: Add missing types as per [6.5] and [Table 6.53].
#[derive(Debug, Clone)]
#[non_exhaustive]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(unused)]
pub enum Extended {
    /// An extended control message.
    ExtendedControl(extended_control::ExtendedControl),
    /// EPR source capabilities, received from a source operating in EPR mode.
    EprSourceCapabilities(Vec<PowerDataObject, MAX_EPR_PDOS>),
    /// EPR sink capabilities, sent to a source operating in EPR mode.
    EprSinkCapabilities(Vec<SinkPowerDataObject, 7>),
    /// Unknown data type.
    Unknown,
}

impl Extended {
    /// Serialize message data to a slice, returning the number of written bytes.
    pub fn to_bytes(&self, payload: &mut [u8]) -> usize {
        match self {
            Self::Unknown => 0,
            Self::ExtendedControl(control) => control.to_bytes(payload),
            Self::EprSinkCapabilities(pdos) => {
                let mut offset = 0;
                for pdo in pdos {
                    let raw = pdo.to_raw();
                    LittleEndian::write_u32(&mut payload[offset..offset + 4], raw);
                    offset += 4;
                }
                offset
            }
            Self::EprSourceCapabilities(_) => unimplemented!(),
        }
    }
}
