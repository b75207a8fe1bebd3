//! Definition of timers, used to guard message reception and state transitions.
use core::future::Future;

/// A timer implementation, used to wait for a given duration.
///
/// Implementors back this with whatever async timer facility is available on the
/// target platform (e.g. an embassy-time `Timer::after_millis`).
pub trait Timer {
    /// Wait for the given number of milliseconds to elapse.
    fn after_millis(milliseconds: u64) -> impl Future<Output = ()>;
}

/// Named timers used throughout the protocol layer and policy engine.
///
/// See [Table 6.70] and [Table 8.71] for the timer values this enum represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerType {
    /// Time to wait for a GoodCRC response after transmitting a message.
    CRCReceive,
    /// Time to wait for Source_Capabilities after attach, before issuing a Hard Reset.
    SinkWaitCap,
    /// Time to wait for a response to a Request or control message.
    SenderResponse,
    /// Time to wait for PS_RDY after an SPR contract is accepted.
    PSTransitionSpr,
    /// Time to wait for PS_RDY after an EPR contract is accepted.
    PSTransitionEpr,
    /// Time to wait for EPR mode entry to complete, once acknowledged.
    SinkEPREnter,
    /// Interval at which EPR_KeepAlive must be sent to maintain EPR mode.
    SinkEPRKeepAlive,
    /// Interval at which a PPS request must be repeated to maintain a PPS contract.
    SinkPPSPeriodic,
    /// Minimum delay before re-requesting power after a Wait response.
    SinkRequest,
    /// Time to remain in BIST Carrier Mode 2 before transitioning back to default.
    BistContMode,
    /// Time to wait for PS_RDY while transitioning off power as a sink in a role swap.
    PSSourceOff,
}

impl TimerType {
    /// The duration represented by this timer, in milliseconds.
    pub fn duration_millis(self) -> u64 {
        match self {
            Self::CRCReceive => 1,
            Self::SinkWaitCap => 310,
            Self::SenderResponse => 30,
            Self::PSTransitionSpr => 500,
            Self::PSTransitionEpr => 925,
            Self::SinkEPREnter => 500,
            Self::SinkEPRKeepAlive => 980,
            Self::SinkPPSPeriodic => 10000,
            Self::SinkRequest => 100,
            Self::BistContMode => 45,
            Self::PSSourceOff => 835,
        }
    }

    /// Get a future that resolves once this timer has elapsed.
    pub fn get_timer<T: Timer>(self) -> impl Future<Output = ()> {
        T::after_millis(self.duration_millis())
    }
}
