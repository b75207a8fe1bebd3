//! The device policy manager (DPM) allows a device to control the policy engine, and be informed about status changes.
//!
//! For example, through the DPM, a device can request certain source capabilities (voltage, current),
//! or renegotiate the power contract.
use core::future::Future;

use bitflags::bitflags;

use crate::protocol_layer::message::data::epr_mode::DataEnterFailed;
use crate::protocol_layer::message::data::sink_capabilities::SinkCapabilities;
use crate::protocol_layer::message::data::{request, source_capabilities};
use crate::{DataRole, PowerRole, units};

bitflags! {
    /// Pending requests that the device policy manager raises towards the policy engine.
    ///
    /// Several bits may be set at once; the policy engine services them in priority order
    /// (highest bit first) and discards the others for the current pass, per spec 8.3.3.3.7.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DpmRequest: u16 {
        /// Exit EPR mode (sink-initiated). See spec Table 8.46.
        const EXIT_EPR_MODE = 1 << 0;
        /// Enter EPR mode at the operational PDP given by [`DevicePolicyManager::epr_operational_power`].
        /// See spec Table 8.39.
        const ENTER_EPR_MODE = 1 << 1;
        /// Request EPR source capabilities (when already in EPR mode). See spec 8.3.3.8.1.
        const REQUEST_EPR_SOURCE_CAPABILITIES = 1 << 2;
        /// Request SPR source capabilities.
        const REQUEST_SPR_SOURCE_CAPABILITIES = 1 << 3;
        /// Request a certain power level, given by [`DevicePolicyManager::request`].
        const REQUEST_POWER = 1 << 4;
        /// Request a data role swap. See spec 6.3.9 (Data_Role_Swap).
        const DR_SWAP = 1 << 5;
        /// Request a power role swap. See spec 8.3.3.4 (PRS_SNK_SRC).
        const PR_SWAP = 1 << 6;
    }
}

/// Trait for the device policy manager.
///
/// This entity commands the policy engine and enforces device policy.
pub trait DevicePolicyManager {
    /// Inform the device about source capabilities, e.g. after a request.
    fn inform(&mut self, _source_capabilities: &source_capabilities::SourceCapabilities) -> impl Future<Output = ()> {
        async {}
    }

    /// Request a power source.
    ///
    /// Defaults to 5 V at maximum current.
    fn request(
        &mut self,
        source_capabilities: &source_capabilities::SourceCapabilities,
    ) -> impl Future<Output = request::PowerSource> {
        async {
            request::PowerSource::new_fixed(
                request::CurrentRequest::Highest,
                request::VoltageRequest::Safe5V,
                source_capabilities,
            )
            .unwrap()
        }
    }

    /// Notify the device that it shall transition to a new power level.
    ///
    /// The device is informed about the request that was accepted by the source.
    fn transition_power(&mut self, _accepted: &request::PowerSource) -> impl Future<Output = ()> {
        async {}
    }

    /// The sink capabilities to advertise in response to Get_Sink_Cap or EPR_Get_Sink_Cap.
    ///
    /// Defaults to vSafe5V only.
    fn sink_capabilities(&self) -> SinkCapabilities {
        SinkCapabilities::new_vsafe5v_only()
    }

    /// Notify the device that EPR mode entry failed, and why.
    fn epr_mode_entry_failed(&mut self, _reason: DataEnterFailed) -> impl Future<Output = ()> {
        async {}
    }

    /// Evaluate whether a Data_Role_Swap request from the port partner is accepted.
    ///
    /// Defaults to rejecting the swap.
    fn evaluate_data_role_swap(&mut self) -> impl Future<Output = bool> {
        async { false }
    }

    /// Notify the device that the data role has changed, following a swap.
    fn data_role_changed(&mut self, _role: DataRole) -> impl Future<Output = ()> {
        async {}
    }

    /// Notify the device that a BIST Test Data mode has been entered.
    ///
    /// The port shall remain quiescent, performing no further message exchange, until
    /// a Hard Reset is observed.
    fn enter_bist_test_data(&mut self) -> impl Future<Output = ()> {
        async {}
    }

    /// Notify the device that a hard reset has occurred.
    ///
    /// Per USB PD Spec R3.2 Section 8.3.3.3.9, on entry to PE_SNK_Transition_to_default:
    /// - The sink shall transition to default power level (vSafe5V)
    /// - Local hardware should be reset
    /// - Port data role should be set to UFP
    ///
    /// The device should prepare for VBUS going to vSafe0V and then back to vSafe5V.
    /// This callback should return when the device has reached the default level.
    fn hard_reset(&mut self) -> impl Future<Output = ()> {
        async {}
    }

    /// The policy engine polls this for pending requests when ready.
    ///
    /// By default, this is a future that never resolves.
    ///
    /// <div class="warning">
    /// The function must be safe to cancel. To determine whether your own methods are cancellation safe,
    /// look for the location of uses of .await. This is because when an asynchronous method is cancelled,
    /// that always happens at an .await. If your function behaves correctly even if it is restarted while waiting
    /// at an .await, then it is cancellation safe.
    /// </div>
    fn dpm_request(
        &mut self,
        _source_capabilities: &source_capabilities::SourceCapabilities,
    ) -> impl Future<Output = DpmRequest> {
        async { core::future::pending().await }
    }

    /// The operational power to request when entering EPR mode, used when
    /// [`DpmRequest::ENTER_EPR_MODE`] is serviced.
    fn epr_operational_power(&self) -> units::Power {
        units::Power::new::<uom::si::power::watt>(0)
    }

    /// Evaluate whether a Power_Role_Swap request from the port partner is accepted.
    ///
    /// Defaults to rejecting the swap.
    fn evaluate_power_role_swap(&mut self) -> impl Future<Output = bool> {
        async { false }
    }

    /// Notify the device that the power role has changed, following a swap.
    fn power_role_changed(&mut self, _role: PowerRole) -> impl Future<Output = ()> {
        async {}
    }

    /// Notify the device that it must now assert Rp and drive VBUS as a source.
    ///
    /// Entered after a Power_Role_Swap or Fast Role Swap has transitioned power off.
    /// A full source-role policy engine is out of scope; the device is responsible for
    /// driving VBUS from this point on.
    fn assert_source_role(&mut self) -> impl Future<Output = ()> {
        async {}
    }
}
