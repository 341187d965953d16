//! Scripted transceiver with a virtual millisecond clock.
use embedded_hal::blocking::delay::DelayMs;
use std::collections::VecDeque;

use super::{Mode, RadioParams, Transceiver};

/// Fault raised by the mock, e.g. a bus error.
pub(crate) type MockError = &'static str;

#[derive(Default)]
pub(crate) struct MockTransceiver {
    pub clock_ms: u64,
    pub mode: Option<Mode>,
    pub params: Option<RadioParams>,
    pub armed: bool,
    /// Frames put on air, in order.
    pub transmitted: Vec<Vec<u8>>,
    /// Frames arriving at a given virtual time.
    pub incoming: VecDeque<(u64, Vec<u8>)>,
    /// One reply per transmission, delivered `reply_delay_ms` after it.
    pub replies: VecDeque<Vec<u8>>,
    pub reply_delay_ms: u64,
    /// Channel reported busy until this virtual time.
    pub busy_until_ms: u64,
    pub always_busy: bool,
    pub cad_checks: usize,
    pub transmit_fails: bool,
    /// Every transmission fails with this device error.
    pub transmit_error: Option<MockError>,
    pub arm_count: usize,
}

impl MockTransceiver {
    pub fn new() -> Self {
        Self {
            reply_delay_ms: 20,
            ..Default::default()
        }
    }

    pub fn push_incoming(&mut self, at_ms: u64, frame: Vec<u8>) {
        self.incoming.push_back((at_ms, frame));
    }
}

impl DelayMs<u32> for MockTransceiver {
    fn delay_ms(&mut self, ms: u32) {
        self.clock_ms += ms as u64;
    }
}

impl Transceiver for MockTransceiver {
    type Error = MockError;

    fn set_mode(&mut self, mode: Mode) -> Result<(), MockError> {
        self.mode = Some(mode);
        self.armed = false;
        Ok(())
    }

    fn configure(&mut self, params: &RadioParams) -> Result<(), MockError> {
        self.params = Some(*params);
        Ok(())
    }

    fn transmit(&mut self, data: &[u8]) -> Result<bool, MockError> {
        self.armed = false;
        self.mode = Some(Mode::Standby);
        if let Some(err) = self.transmit_error {
            return Err(err);
        }
        if self.transmit_fails {
            return Ok(false);
        }
        self.transmitted.push(data.to_vec());
        if let Some(reply) = self.replies.pop_front() {
            let at = self.clock_ms + self.reply_delay_ms;
            self.incoming.push_back((at, reply));
        }
        Ok(true)
    }

    fn arm_continuous_receive(&mut self) -> Result<(), MockError> {
        self.armed = true;
        self.arm_count += 1;
        Ok(())
    }

    fn data_ready(&mut self) -> Result<bool, MockError> {
        Ok(self.armed
            && self
                .incoming
                .front()
                .map_or(false, |(at, _)| *at <= self.clock_ms))
    }

    fn read_received(&mut self, buf: &mut [u8]) -> Result<usize, MockError> {
        match self.incoming.pop_front() {
            Some((_, frame)) => {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                Ok(len)
            }
            None => Ok(0),
        }
    }

    fn channel_activity_detected(&mut self) -> Result<bool, MockError> {
        self.cad_checks += 1;
        Ok(self.always_busy || self.clock_ms < self.busy_until_ms)
    }
}
