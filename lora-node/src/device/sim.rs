//! # Simulated air
//!
//! A shared half-duplex medium for running several nodes in one process
//! (demos, integration tests) without hardware.
//!
//! - Frames reach the stations that listen (continuous receive armed) on the
//!   same frequency, spreading factor and bandwidth when the transmission ends.
//! - The channel reads busy for channel activity detection while any frame is
//!   on air.
//! - Transmissions overlapping in time collide and are lost for everybody.
//!
//! Each [SimRadio] owns its station; clone the [SimulatedAir] handle to attach
//! more radios from other threads.
use embedded_hal::blocking::delay::DelayMs;
use log::{debug, trace};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{Mode, RadioParams, Transceiver};

/// Default time on air of every simulated frame.
const DEFAULT_AIRTIME: Duration = Duration::from_millis(5);

#[derive(Debug)]
struct Station {
    listening: bool,
    params: RadioParams,
    inbox: VecDeque<Vec<u8>>,
}

#[derive(Debug)]
struct Transmission {
    id: u64,
    collided: bool,
}

#[derive(Debug, Default)]
struct Air {
    stations: Vec<Station>,
    on_air: Vec<Transmission>,
    next_transmission: u64,
}

/// Handle on the shared medium.
#[derive(Clone, Debug)]
pub struct SimulatedAir {
    air: Arc<Mutex<Air>>,
    airtime: Duration,
}

impl Default for SimulatedAir {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAir {
    pub fn new() -> Self {
        Self::with_airtime(DEFAULT_AIRTIME)
    }

    pub fn with_airtime(airtime: Duration) -> Self {
        SimulatedAir {
            air: Arc::new(Mutex::new(Air::default())),
            airtime,
        }
    }

    /// Attaches a new radio, in standby with default parameters.
    pub fn attach(&self) -> SimRadio {
        let mut air = self.lock();
        air.stations.push(Station {
            listening: false,
            params: RadioParams::default(),
            inbox: VecDeque::new(),
        });
        SimRadio {
            air: self.clone(),
            station: air.stations.len() - 1,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Air> {
        self.air.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One simulated transceiver.
#[derive(Debug)]
pub struct SimRadio {
    air: SimulatedAir,
    station: usize,
}

fn same_channel(a: &RadioParams, b: &RadioParams) -> bool {
    a.frequency_mhz == b.frequency_mhz
        && a.spreading_factor == b.spreading_factor
        && a.bandwidth == b.bandwidth
}

impl DelayMs<u32> for SimRadio {
    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(ms as u64));
    }
}

impl Transceiver for SimRadio {
    type Error = Infallible;

    fn set_mode(&mut self, _mode: Mode) -> Result<(), Infallible> {
        self.air.lock().stations[self.station].listening = false;
        Ok(())
    }

    fn configure(&mut self, params: &RadioParams) -> Result<(), Infallible> {
        self.air.lock().stations[self.station].params = *params;
        Ok(())
    }

    fn transmit(&mut self, data: &[u8]) -> Result<bool, Infallible> {
        let id = {
            let mut air = self.air.lock();
            air.stations[self.station].listening = false;
            let id = air.next_transmission;
            air.next_transmission += 1;
            let collided = !air.on_air.is_empty();
            for other in air.on_air.iter_mut() {
                other.collided = true;
            }
            air.on_air.push(Transmission { id, collided });
            id
        };
        std::thread::sleep(self.air.airtime);
        let mut air = self.air.lock();
        let position = air.on_air.iter().position(|t| t.id == id);
        let collided = match position {
            Some(i) => air.on_air.swap_remove(i).collided,
            None => true,
        };
        if collided {
            debug!("Simulated frame {} lost in a collision.", id);
            return Ok(true);
        }
        let params = air.stations[self.station].params;
        let me = self.station;
        for (i, station) in air.stations.iter_mut().enumerate() {
            if i != me && station.listening && same_channel(&station.params, &params) {
                trace!("Simulated frame {} delivered to station {}.", id, i);
                station.inbox.push_back(data.to_vec());
            }
        }
        Ok(true)
    }

    fn arm_continuous_receive(&mut self) -> Result<(), Infallible> {
        let mut air = self.air.lock();
        let station = &mut air.stations[self.station];
        station.inbox.clear();
        station.listening = true;
        Ok(())
    }

    fn data_ready(&mut self) -> Result<bool, Infallible> {
        let air = self.air.lock();
        let station = &air.stations[self.station];
        Ok(station.listening && !station.inbox.is_empty())
    }

    fn read_received(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
        let mut air = self.air.lock();
        match air.stations[self.station].inbox.pop_front() {
            Some(frame) => {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                Ok(len)
            }
            None => Ok(0),
        }
    }

    fn channel_activity_detected(&mut self) -> Result<bool, Infallible> {
        Ok(!self.air.lock().on_air.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listening_radio_receives_frame() {
        let air = SimulatedAir::with_airtime(Duration::from_millis(1));
        let mut a = air.attach();
        let mut b = air.attach();
        b.arm_continuous_receive().unwrap();
        assert!(a.transmit(&[1, 2, 3]).unwrap());
        assert!(b.data_ready().unwrap());
        let mut buf = [0u8; 8];
        assert_eq!(b.read_received(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert!(!b.data_ready().unwrap());
    }

    #[test]
    fn standby_radio_hears_nothing() {
        let air = SimulatedAir::with_airtime(Duration::from_millis(1));
        let mut a = air.attach();
        let mut b = air.attach();
        a.transmit(&[9]).unwrap();
        b.arm_continuous_receive().unwrap();
        assert!(!b.data_ready().unwrap());
    }

    #[test]
    fn other_channel_is_not_heard() {
        let air = SimulatedAir::with_airtime(Duration::from_millis(1));
        let mut a = air.attach();
        let mut b = air.attach();
        b.configure(&RadioParams {
            frequency_mhz: 868.1,
            ..Default::default()
        })
        .unwrap();
        b.arm_continuous_receive().unwrap();
        a.transmit(&[9]).unwrap();
        assert!(!b.data_ready().unwrap());
    }

    #[test]
    fn idle_channel_is_free() {
        let air = SimulatedAir::new();
        let mut a = air.attach();
        assert!(!a.channel_activity_detected().unwrap());
    }
}
