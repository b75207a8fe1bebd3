//! Definitions of request data message content.
//!
//! A sink requests a particular power level from the source's advertised PDOs
//! using a Request Data Object (RDO). See [6.4.2].
use byteorder::{ByteOrder, LittleEndian};
use proc_bitfield::bitfield;
use uom::si::electric_current::{centiampere, milliampere};
use uom::si::electric_potential::millivolt;

use super::source_capabilities::{self, PowerDataObject, SourceCapabilities};
use crate::protocol_layer::message::_20millivolts_mod::_20millivolts;
use crate::protocol_layer::message::_50milliamperes_mod::_50milliamperes;
use crate::protocol_layer::message::_50millivolts_mod::_50millivolts;
use crate::units::{ElectricCurrent, ElectricPotential};

bitfield! {
    /// A raw request data object.
    ///
    /// Used to inspect the object position before the concrete RDO kind is known.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct RawDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// The 1-based position of the PDO that this request refers to.
        pub object_position: u8 @ 28..=31,
    }
}

bitfield! {
    /// Request data object for a fixed or variable supply.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct FixedVariableSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// The 1-based position of the requested PDO.
        pub object_position: u8 @ 28..=31,
        /// GiveBack flag.
        pub giveback_flag: bool @ 27,
        /// Capability mismatch.
        pub capability_mismatch: bool @ 26,
        /// USB communications capable.
        pub usb_communications_capable: bool @ 25,
        /// No USB suspend.
        pub no_usb_suspend: bool @ 24,
        /// Unchunked extended messages supported.
        pub unchunked_extended_messages_supported: bool @ 23,
        /// EPR mode capable.
        pub epr_mode_capable: bool @ 22,
        /// Operating current in 10 mA units.
        pub raw_operating_current: u16 @ 10..=19,
        /// Maximum operating current in 10 mA units.
        pub raw_max_operating_current: u16 @ 0..=9,
    }
}

impl FixedVariableSupply {
    pub fn to_bytes(self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u32(buf, self.0);
        4
    }

    pub fn operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_operating_current().into())
    }

    pub fn max_operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_operating_current().into())
    }
}

bitfield! {
    /// Request data object for a battery supply.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Battery(pub u32): Debug, FromStorage, IntoStorage {
        pub object_position: u8 @ 28..=31,
        pub giveback_flag: bool @ 27,
        pub capability_mismatch: bool @ 26,
        pub usb_communications_capable: bool @ 25,
        pub no_usb_suspend: bool @ 24,
        pub unchunked_extended_messages_supported: bool @ 23,
        pub epr_mode_capable: bool @ 22,
        pub raw_operating_power: u16 @ 10..=19,
        pub raw_max_operating_power: u16 @ 0..=9,
    }
}

bitfield! {
    /// Request data object for a PPS (programmable power supply) APDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Pps(pub u32): Debug, FromStorage, IntoStorage {
        pub object_position: u8 @ 28..=31,
        pub capability_mismatch: bool @ 26,
        pub usb_communications_capable: bool @ 25,
        pub no_usb_suspend: bool @ 24,
        pub unchunked_extended_messages_supported: bool @ 23,
        pub epr_mode_capable: bool @ 22,
        /// Output voltage in 20 mV units.
        pub raw_voltage: u16 @ 9..=19,
        /// Operating current in 50 mA units.
        pub raw_operating_current: u8 @ 0..=6,
    }
}

impl Pps {
    pub fn to_bytes(self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u32(buf, self.0);
        4
    }

    pub fn voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_20millivolts>(self.raw_voltage().into())
    }

    pub fn operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<_50milliamperes>(self.raw_operating_current().into())
    }
}

bitfield! {
    /// Request data object for an AVS (adjustable voltage supply) APDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Avs(pub u32): Debug, FromStorage, IntoStorage {
        pub object_position: u8 @ 28..=31,
        pub capability_mismatch: bool @ 26,
        pub usb_communications_capable: bool @ 25,
        pub no_usb_suspend: bool @ 24,
        pub unchunked_extended_messages_supported: bool @ 23,
        pub epr_mode_capable: bool @ 22,
        /// Requested voltage, in 25 mV units (bits 19:9 shifted to 20mV-equivalent for our unit system).
        pub raw_voltage: u16 @ 9..=19,
        /// Operating current, in 50 mA units.
        pub raw_operating_current: u8 @ 0..=6,
    }
}

/// Full EPR request: a Request Data Object paired with the EPR (A)PDO it refers to.
///
/// Per USB PD Spec R3.2 Section 6.4.2, an EPR Request message carries 2 Data
/// Objects: the RDO, followed by a copy of the requested Source PDO.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EprRequestDataObject {
    /// Raw bits of the Request Data Object.
    pub rdo: u32,
    /// The PDO being requested, echoed back to the source.
    pub pdo: PowerDataObject,
}

impl EprRequestDataObject {
    /// The 1-based object position this request refers to.
    pub fn object_position(&self) -> u8 {
        RawDataObject(self.rdo).object_position()
    }

    pub fn to_bytes(self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u32(buf, self.rdo);
        LittleEndian::write_u32(&mut buf[4..], self.pdo_raw());
        8
    }

    fn pdo_raw(&self) -> u32 {
        match self.pdo {
            PowerDataObject::FixedSupply(f) => f.0,
            PowerDataObject::Battery(b) => b.0,
            PowerDataObject::VariableSupply(v) => v.0,
            PowerDataObject::Augmented(source_capabilities::Augmented::Spr(s)) => s.0,
            PowerDataObject::Augmented(source_capabilities::Augmented::Epr(e)) => e.0,
            PowerDataObject::Augmented(source_capabilities::Augmented::Unknown(raw)) => raw,
            PowerDataObject::Unknown(raw) => raw.0,
        }
    }
}

/// A power source request, as sent from a sink to a source.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerSource {
    /// Request of a fixed or variable supply PDO.
    FixedVariableSupply(FixedVariableSupply),
    /// Request of a battery PDO.
    Battery(Battery),
    /// Request of an SPR PPS APDO.
    Pps(Pps),
    /// Request of an EPR AVS APDO.
    Avs(Avs),
    /// Request of an EPR (A)PDO in EPR mode.
    EprRequest(EprRequestDataObject),
    /// A request whose object kind could not be determined.
    Unknown(RawDataObject),
}

impl PowerSource {
    /// The data message type to use when sending this request.
    pub fn message_type(&self) -> super::super::header::DataMessageType {
        use super::super::header::DataMessageType;
        match self {
            Self::EprRequest(_) => DataMessageType::EprRequest,
            _ => DataMessageType::Request,
        }
    }

    /// The number of 32-bit data objects carried by this request.
    pub fn num_objects(&self) -> u8 {
        match self {
            Self::EprRequest(_) => 2,
            _ => 1,
        }
    }

    /// The 1-based object position this request refers to.
    pub fn object_position(&self) -> u8 {
        match self {
            Self::FixedVariableSupply(rdo) => rdo.object_position(),
            Self::Battery(rdo) => rdo.object_position(),
            Self::Pps(rdo) => rdo.object_position(),
            Self::Avs(rdo) => rdo.object_position(),
            Self::EprRequest(epr) => epr.object_position(),
            Self::Unknown(raw) => raw.object_position(),
        }
    }

    /// Construct a request for the highest-available or a specific fixed voltage.
    pub fn new_fixed(
        current: CurrentRequest,
        voltage: VoltageRequest,
        source_capabilities: &SourceCapabilities,
    ) -> Result<Self, RequestError> {
        let (position, fixed) = match voltage {
            VoltageRequest::Safe5V => find_specific_fixed_voltage(source_capabilities, ElectricPotential::new::<millivolt>(5000))?,
            VoltageRequest::Specific(voltage) => find_specific_fixed_voltage(source_capabilities, voltage)?,
            VoltageRequest::Highest => find_highest_fixed_voltage(source_capabilities)?,
        };

        let max_current = fixed.max_current();
        let operating_current = match current {
            CurrentRequest::Highest => max_current,
            CurrentRequest::Specific(current) if current.get::<centiampere>() < max_current.get::<centiampere>() => current,
            CurrentRequest::Specific(_) => max_current,
        };

        Ok(Self::FixedVariableSupply(
            FixedVariableSupply::default()
                .with_object_position(position)
                .with_no_usb_suspend(true)
                .with_usb_communications_capable(false)
                .with_raw_operating_current(operating_current.get::<centiampere>() as u16)
                .with_raw_max_operating_current(max_current.get::<centiampere>() as u16),
        ))
    }

    /// Construct a request for a specific PPS output voltage and current.
    pub fn new_pps(
        voltage: ElectricPotential,
        current: ElectricCurrent,
        source_capabilities: &SourceCapabilities,
    ) -> Result<Self, RequestError> {
        let (position, _pps) = find_pps_voltage(source_capabilities, voltage)?;

        Ok(Self::Pps(
            Pps::default()
                .with_object_position(position)
                .with_no_usb_suspend(true)
                .with_raw_voltage((voltage.get::<millivolt>() / 20) as u16)
                .with_raw_operating_current((current.get::<milliampere>() / 50) as u8),
        ))
    }
}

/// Errors that can occur while constructing a power request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestError {
    /// No matching PDO was advertised by the source.
    NoMatchingSupply,
}

/// Requested operating current.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CurrentRequest {
    /// Request the maximum current the selected PDO can provide.
    Highest,
    /// Request a specific current, clamped to the PDO's maximum.
    Specific(ElectricCurrent),
}

/// Requested fixed voltage.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VoltageRequest {
    /// The default vSafe5V supply.
    Safe5V,
    /// A specific fixed voltage.
    Specific(ElectricPotential),
    /// The highest fixed voltage offered by the source.
    Highest,
}

fn find_specific_fixed_voltage(
    source_capabilities: &SourceCapabilities,
    voltage: ElectricPotential,
) -> Result<(u8, source_capabilities::FixedSupply), RequestError> {
    source_capabilities
        .pdos()
        .iter()
        .enumerate()
        .find_map(|(index, pdo)| match pdo {
            PowerDataObject::FixedSupply(fixed) if fixed.voltage() == voltage => Some(((index + 1) as u8, *fixed)),
            _ => None,
        })
        .ok_or(RequestError::NoMatchingSupply)
}

fn find_highest_fixed_voltage(
    source_capabilities: &SourceCapabilities,
) -> Result<(u8, source_capabilities::FixedSupply), RequestError> {
    source_capabilities
        .pdos()
        .iter()
        .enumerate()
        .filter_map(|(index, pdo)| match pdo {
            PowerDataObject::FixedSupply(fixed) => Some(((index + 1) as u8, *fixed)),
            _ => None,
        })
        .max_by_key(|(_, fixed)| fixed.voltage().get::<_50millivolts>())
        .ok_or(RequestError::NoMatchingSupply)
}

fn find_pps_voltage(
    source_capabilities: &SourceCapabilities,
    voltage: ElectricPotential,
) -> Result<(u8, source_capabilities::SprProgrammablePowerSupply), RequestError> {
    source_capabilities
        .pdos()
        .iter()
        .enumerate()
        .find_map(|(index, pdo)| match pdo {
            PowerDataObject::Augmented(source_capabilities::Augmented::Spr(pps))
                if voltage >= pps.min_voltage() && voltage <= pps.max_voltage() =>
            {
                Some(((index + 1) as u8, *pps))
            }
            _ => None,
        })
        .ok_or(RequestError::NoMatchingSupply)
}

#[allow(clippy::derivable_impls)]
impl Default for FixedVariableSupply {
    fn default() -> Self {
        Self(0)
    }
}

#[allow(clippy::derivable_impls)]
impl Default for Battery {
    fn default() -> Self {
        Self(0)
    }
}

#[allow(clippy::derivable_impls)]
impl Default for Pps {
    fn default() -> Self {
        Self(0)
    }
}

#[allow(clippy::derivable_impls)]
impl Default for Avs {
    fn default() -> Self {
        Self(0)
    }
}

#[cfg(test)]
mod tests {
    use heapless::Vec;

    use super::*;
    use crate::protocol_layer::message::data::source_capabilities::FixedSupply;

    fn caps_5v_9v() -> SourceCapabilities {
        let mut pdos = Vec::<PowerDataObject, 16>::new();
        pdos.push(PowerDataObject::FixedSupply(
            FixedSupply::default().with_raw_voltage(100).with_raw_max_current(300),
        ))
        .unwrap();
        pdos.push(PowerDataObject::FixedSupply(
            FixedSupply::default().with_raw_voltage(180).with_raw_max_current(300),
        ))
        .unwrap();
        SourceCapabilities(pdos)
    }

    #[test]
    fn requests_highest_fixed_voltage() {
        let caps = caps_5v_9v();
        let request = PowerSource::new_fixed(CurrentRequest::Highest, VoltageRequest::Highest, &caps).unwrap();

        match request {
            PowerSource::FixedVariableSupply(rdo) => {
                assert_eq!(rdo.object_position(), 2);
                assert_eq!(rdo.raw_max_operating_current(), 300);
            }
            _ => panic!("expected fixed/variable supply request"),
        }
    }

    #[test]
    fn rejects_unavailable_fixed_voltage() {
        let caps = caps_5v_9v();
        let voltage = ElectricPotential::new::<millivolt>(12000);
        assert_eq!(
            PowerSource::new_fixed(CurrentRequest::Highest, VoltageRequest::Specific(voltage), &caps),
            Err(RequestError::NoMatchingSupply)
        );
    }
}
