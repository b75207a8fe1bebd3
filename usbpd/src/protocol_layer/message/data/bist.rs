//! BIST (Built-In Self Test) data objects.
//!
//! See [6.4.3] and [Table 6.38].
use byteorder::{ByteOrder, LittleEndian};
use proc_bitfield::bitfield;

bitfield! {
    /// The BIST data object, carried by a `Bist` data message.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct RawBistDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// BIST mode, see [`BistMode`].
        pub raw_mode: u8 @ 28..=31,
    }
}

impl Default for RawBistDataObject {
    fn default() -> Self {
        Self(0)
    }
}

/// The requested BIST mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BistMode {
    /// Receiver Mode. Used to test the physical layer's bit error rate.
    ReceiverMode,
    /// Transmitter Mode.
    TransmitterMode,
    /// Returned BIST Counters.
    ReturnedBistCounters,
    /// Carrier Mode 2. The port transmits a continuous JK carrier for compliance testing.
    CarrierMode2,
    /// Test Data. Puts the port into a quiescent test data mode until Hard Reset.
    TestData,
    /// Unknown or reserved mode.
    Unknown(u8),
}

impl From<u8> for BistMode {
    fn from(value: u8) -> Self {
        match value {
            0b0000 => Self::ReceiverMode,
            0b0001 => Self::TransmitterMode,
            0b0010 => Self::ReturnedBistCounters,
            0b0011 => Self::CarrierMode2,
            0b0100 => Self::TestData,
            other => Self::Unknown(other),
        }
    }
}

/// A parsed BIST data object.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BistDataObject(pub u32);

impl BistDataObject {
    /// The requested BIST mode.
    pub fn mode(&self) -> BistMode {
        RawBistDataObject(self.0).raw_mode().into()
    }

    /// Serialize this data object to `buf`, returning the number of bytes written.
    pub fn to_bytes(&self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u32(buf, self.0);
        4
    }
}
