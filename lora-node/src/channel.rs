//! Collision avoidance: listen before talk.
use log::{debug, trace};

use crate::device::Transceiver;

/// Poll period of the channel activity detection, in milliseconds.
pub const CAD_POLL_MS: u32 = 1;
/// Budget for the channel to free up before an acknowledgment is sent.
pub const ACK_CHANNEL_BUDGET_MS: u32 = 300;

/// Gate run before every transmission.
#[derive(Copy, Clone, Debug, Default)]
pub struct ChannelAccess;

impl ChannelAccess {
    /// Polls channel activity once per millisecond for at most `timeout_ms`
    /// milliseconds. Returns `true` as soon as the channel is idle, `false`
    /// if it stayed busy for the whole budget. A zero budget checks once.
    pub fn await_free<T: Transceiver>(&self, radio: &mut T, timeout_ms: u32) -> Result<bool, T::Error> {
        let mut waited = 0;
        loop {
            if !radio.channel_activity_detected()? {
                trace!("Channel free after {}ms.", waited);
                return Ok(true);
            }
            if waited >= timeout_ms {
                debug!("Channel still busy after {}ms, giving up.", timeout_ms);
                return Ok(false);
            }
            radio.delay_ms(CAD_POLL_MS);
            waited += CAD_POLL_MS;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockTransceiver;

    #[test]
    fn zero_budget_on_busy_channel_fails_immediately() {
        let mut radio = MockTransceiver::new();
        radio.always_busy = true;
        assert_eq!(ChannelAccess.await_free(&mut radio, 0), Ok(false));
        assert_eq!(radio.cad_checks, 1);
        assert_eq!(radio.clock_ms, 0);
        assert!(radio.transmitted.is_empty());
    }

    #[test]
    fn zero_budget_on_free_channel_passes() {
        let mut radio = MockTransceiver::new();
        assert_eq!(ChannelAccess.await_free(&mut radio, 0), Ok(true));
    }

    #[test]
    fn waits_for_channel_to_clear() {
        let mut radio = MockTransceiver::new();
        radio.busy_until_ms = 42;
        assert_eq!(ChannelAccess.await_free(&mut radio, 100), Ok(true));
        assert_eq!(radio.clock_ms, 42);
    }

    #[test]
    fn budget_is_a_hard_bound() {
        let mut radio = MockTransceiver::new();
        radio.always_busy = true;
        assert_eq!(ChannelAccess.await_free(&mut radio, ACK_CHANNEL_BUDGET_MS), Ok(false));
        assert_eq!(radio.clock_ms, ACK_CHANNEL_BUDGET_MS as u64);
    }
}
