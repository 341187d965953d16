//! Everything needed to move frames through the physical radio module.
//!
//! The protocol layers only talk to a [Transceiver]: a blocking, half-duplex
//! packet radio with channel activity detection. [radio::HalTransceiver]
//! adapts drivers written against the `radio` HAL traits, [sim] provides an
//! in-process shared medium.

#[cfg(test)]
pub(crate) mod mock;
pub mod radio;
pub mod sim;

use embedded_hal::blocking::delay::DelayMs;
use std::fmt::Debug;

/// Transceiver idle modes. Transmit and receive modes are entered through
/// [Transceiver::transmit] and [Transceiver::arm_continuous_receive].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    /// Lowest power.
    Sleep,
    /// Ready to transmit or receive.
    Standby,
}

/// Packet radio used by the messenger.
///
/// Only one operation may be active at a time; the owner of the handle
/// serializes transmit, listen and channel sensing.
pub trait Transceiver: DelayMs<u32> {
    type Error: Debug;

    fn set_mode(&mut self, mode: Mode) -> Result<(), Self::Error>;

    /// Applies frequency, spreading factor, bandwidth, coding rate and power.
    fn configure(&mut self, params: &RadioParams) -> Result<(), Self::Error>;

    /// Puts `data` on air and blocks until the transmission completed
    /// (`Ok(true)`) or the airtime budget elapsed (`Ok(false)`). Ends in standby.
    fn transmit(&mut self, data: &[u8]) -> Result<bool, Self::Error>;

    /// Discards pending reception state and listens continuously.
    fn arm_continuous_receive(&mut self) -> Result<(), Self::Error>;

    /// Whether a complete packet waits to be read.
    fn data_ready(&mut self) -> Result<bool, Self::Error>;

    /// Copies the pending packet into `buf` (truncated to its length) and
    /// returns the byte count, 0 if the packet was dropped (e.g. CRC error).
    fn read_received(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Runs one channel activity detection, `true` if a preamble was heard.
    fn channel_activity_detected(&mut self) -> Result<bool, Self::Error>;
}

/// LoRa bandwidths selectable by bandwidth code, in kHz.
pub const BANDWIDTHS_KHZ: [f32; 10] = [7.8, 10.4, 15.6, 20.8, 31.25, 41.7, 62.5, 125.0, 250.0, 500.0];
/// Output power per power code 1..=5, in dBm.
pub const POWER_LEVELS_DBM: [i8; 5] = [7, 10, 13, 17, 20];
/// Preamble length in symbols.
pub const PREAMBLE_LEN: u32 = 8;

/// Radio parameters of a node.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RadioParams {
    /// Carrier frequency in MHz.
    pub frequency_mhz: f32,
    /// Spreading factor, 6..=12.
    pub spreading_factor: u8,
    /// Index in [BANDWIDTHS_KHZ], 0..=9.
    pub bandwidth: u8,
    /// Coding rate code 1..=4, meaning 4/5..=4/8.
    pub coding_rate: u8,
    /// Power code 1..=5, see [POWER_LEVELS_DBM].
    pub power: u8,
    /// Hardware payload CRC.
    pub payload_crc: bool,
}

impl Default for RadioParams {
    fn default() -> Self {
        RadioParams {
            frequency_mhz: 433.6,
            spreading_factor: 10,
            bandwidth: 8,
            coding_rate: 4,
            power: 2,
            payload_crc: false,
        }
    }
}

impl RadioParams {
    pub fn bandwidth_khz(&self) -> f32 {
        BANDWIDTHS_KHZ[(self.bandwidth as usize).min(BANDWIDTHS_KHZ.len() - 1)]
    }

    pub fn power_dbm(&self) -> i8 {
        POWER_LEVELS_DBM[(self.power.clamp(1, 5) - 1) as usize]
    }

    /// Raw bit rate: `sf * (bw / 2^sf) * 4 / (4 + cr)`.
    pub fn bit_rate(&self) -> f32 {
        let sf = self.spreading_factor.clamp(6, 12);
        let symbol_rate = self.bandwidth_khz() * 1000.0 / (1u32 << sf) as f32;
        let code_rate = 4.0 / (4.0 + self.coding_rate.clamp(1, 4) as f32);
        sf as f32 * code_rate * symbol_rate
    }

    /// Upper bound for the transmission of `len` bytes, in milliseconds.
    pub fn transmit_budget_ms(&self, len: usize) -> u32 {
        let symbols = (len as u32) * 2 + PREAMBLE_LEN + 8;
        (symbols as f32 * 10_000.0 / self.bit_rate()) as u32 + 40
    }

    pub fn is_valid(&self) -> bool {
        (6..=12).contains(&self.spreading_factor)
            && (self.bandwidth as usize) < BANDWIDTHS_KHZ.len()
            && (1..=4).contains(&self.coding_rate)
            && (1..=5).contains(&self.power)
            && self.frequency_mhz > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bit_rate() {
        // SF10, 250 kHz, 4/8
        let params = RadioParams::default();
        assert!((params.bit_rate() - 1220.7).abs() < 1.0);
        assert_eq!(params.power_dbm(), 10);
        assert_eq!(params.bandwidth_khz(), 250.0);
    }

    #[test]
    fn budget_grows_with_length() {
        let params = RadioParams::default();
        let short = params.transmit_budget_ms(18);
        let long = params.transmit_budget_ms(242);
        assert!(short > 40);
        assert!(long > short);
        // (18*2 + 16) * 10000 / 1220.7 + 40
        assert_eq!(short, 465);
    }

    #[test]
    fn validity() {
        assert!(RadioParams::default().is_valid());
        let bad = RadioParams {
            spreading_factor: 13,
            ..Default::default()
        };
        assert!(!bad.is_valid());
    }
}
