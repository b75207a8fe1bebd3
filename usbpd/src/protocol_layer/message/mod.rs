//! Definitions of message content.
//!
//! See [6].

#[allow(missing_docs)]
pub mod header;

#[allow(missing_docs)]
pub mod data;

#[allow(missing_docs)]
pub mod extended;


/// This module defines the CGS (centimeter-gram-second) unit system
/// for use in the USB Power Delivery Protocol layer. These units are
/// defined using the `uom` (units of measurement) library and are
/// expressed as `u32` values for milliamps, millivolts, and microwatts.
pub mod units {
    ISQ!(
        uom::si,
        u32,
        (millimeter, kilogram, second, milliampere, kelvin, mole, candela)
    );
}


use data::Data;
use extended::Extended;
use extended::extended_control::ExtendedControlMessageType;
use header::{ExtendedMessageType, Header, MessageType};

pub(super) mod _50milliamperes_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_current;

        @_50milliamperes: 0.05; "_50mA", "_50milliamps", "_50milliamps";
    }
}

pub(super) mod _50millivolts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_potential;

        @_50millivolts: 0.05; "_50mV", "_50millivolts", "_50millivolts";
    }
}

pub(super) mod _20millivolts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_potential;

        @_20millivolts: 0.02; "_20mV", "_20millivolts", "_20millivolts";
    }
}

pub(super) mod _250milliwatts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::power;

        @_250milliwatts: 0.25; "_250mW", "_250milliwatts", "_250milliwatts";
    }
}

/// The decoded content of a message, beyond its header.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Payload {
    /// Data message content.
    Data(Data),
    /// Extended message content.
    Extended(Extended),
}

/// A USB PD message.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    /// The message header.
    pub header: Header,
    /// Optional payload data (for data and extended messages).
    pub payload: Option<Payload>,
}

impl Message {
    /// Create a new message from a message header.
    pub fn new(header: Header) -> Self {
        Self { header, payload: None }
    }

    /// Create a new message from a message header and payload data.
    pub fn new_with_data(header: Header, data: Data) -> Self {
        Self {
            header,
            payload: Some(Payload::Data(data)),
        }
    }

    /// Serialize a message to a slice, returning the number of written bytes.
    pub fn to_bytes(&self, buffer: &mut [u8]) -> usize {
        let mut size = self.header.to_bytes(buffer);

        match self.payload.as_ref() {
            Some(Payload::Data(data)) => size += data.to_bytes(&mut buffer[2..]),
            Some(Payload::Extended(extended)) => size += extended.to_bytes(&mut buffer[4..]),
            None => (),
        }

        size
    }

    /// Parse a non-extended message from a slice of bytes, with a PDO state used
    /// to disambiguate [`header::DataMessageType::Request`] object types.
    pub fn from_bytes_with_state<P: data::PdoState>(buf: &[u8], state: &P) -> Result<Self, ParseError> {
        if buf.len() < 2 {
            return Err(ParseError::InvalidLength {
                expected: 2,
                found: buf.len(),
            });
        }

        let header = Header::from_bytes(&buf[..2])?;
        let mut message = Self::new(header);

        match header.message_type() {
            MessageType::Control(_) => (),
            MessageType::Data(message_type) => {
                message = Data::parse_message(message, message_type, &buf[2..], state)?;
            }
            MessageType::Extended(_) => {
                // Extended messages require chunk reassembly, handled by the protocol layer.
                message.payload = Some(Payload::Extended(Extended::Unknown));
            }
        }

        Ok(message)
    }

    /// Parse a non-extended message from a slice of bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ParseError> {
        Self::from_bytes_with_state(buf, &())
    }

    /// Parse the header and extended header out of a single received chunk, returning the
    /// remaining chunk payload.
    pub fn parse_extended_chunk(buf: &[u8]) -> Result<(Header, extended::ExtendedHeader, &[u8]), ParseError> {
        if buf.len() < 4 {
            return Err(ParseError::InvalidLength {
                expected: 4,
                found: buf.len(),
            });
        }

        let header = Header::from_bytes(&buf[..2])?;
        let extended_header = extended::ExtendedHeader::from_bytes(&buf[2..4]);

        Ok((header, extended_header, &buf[4..]))
    }

    /// Parse a fully reassembled extended message payload, given its type.
    ///
    /// The input is assumed to already be validated (correct length for its type), since it
    /// has passed through chunk reassembly.
    pub fn parse_extended_payload(message_type: ExtendedMessageType, payload: &[u8]) -> Extended {
        match message_type {
            ExtendedMessageType::ExtendedControl if payload.len() >= 2 => {
                Extended::ExtendedControl(extended::extended_control::ExtendedControl::from_bytes(payload))
            }
            ExtendedMessageType::EprSourceCapabilities => {
                let pdos = payload
                    .chunks_exact(4)
                    .map(|chunk| {
                        let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                        data::source_capabilities::parse_raw_pdo(raw)
                    })
                    .filter(|pdo| !pdo.is_zero_padding())
                    .take(extended::MAX_EPR_PDOS)
                    .collect();
                Extended::EprSourceCapabilities(pdos)
            }
            _ => Extended::Unknown,
        }
    }

    /// Check whether an extended control message carries the given type.
    pub fn is_extended_control(extended: &Extended, message_type: ExtendedControlMessageType) -> bool {
        matches!(extended, Extended::ExtendedControl(control) if control.message_type() == message_type)
    }
}

/// Errors that can occur during message/header parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// The input buffer has an invalid length.
    InvalidLength {
        /// The expected length.
        expected: usize,
        /// The actual length found.
        found: usize,
    },
    /// The specification revision field was invalid.
    UnsupportedSpecificationRevision(u8),
    /// An unknown or reserved message type was encountered.
    InvalidMessageType(u8),
    /// An unknown or reserved data message type was encountered.
    InvalidDataMessageType(u8),
    /// An unknown or reserved control message type was encountered.
    InvalidControlMessageType(u8),
    /// A chunked message parser was reused without being reset.
    ParserReuse,
    /// A received chunk was larger than allowed.
    ChunkOverflow(usize, usize),
    /// Other parsing error with a message.
    Other(&'static str),
}
