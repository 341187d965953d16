//! [Transceiver] implementation for drivers written against the `radio` HAL.
use embedded_hal::blocking::delay::DelayMs;
use log::{debug, trace, warn};
use ::radio::{Busy, Power, RadioState, Receive, State, Transmit};
use std::fmt::Debug;
use std::marker::PhantomData;

use super::{Mode, RadioParams, Transceiver};

/// Poll interval while waiting for the end of a transmission.
const TX_POLL_MS: u32 = 1;

/// Radio physical device representation.
pub trait Radio<C, E>:
    Transmit<Error = E>
    + Receive<Error = E>
    + Power<Error = E>
    + ::radio::Channel<Channel = C, Error = E>
    + State<Error = E>
    + Busy<Error = E>
    + DelayMs<u32>
{
}

impl<
        C: Debug,
        E: Debug,
        T: Transmit<Error = E>
            + Receive<Error = E>
            + Power<Error = E>
            + ::radio::Channel<Channel = C, Error = E>
            + State<Error = E>
            + Busy<Error = E>
            + DelayMs<u32>,
    > Radio<C, E> for T
{
}

/// Adapter from a `radio` HAL device to a [Transceiver].
///
/// The device channel type `C` (frequency, spreading factor, bandwidth and
/// coding rate on LoRa chips) is built from the node [RadioParams].
pub struct HalTransceiver<T, C, E>
where
    T: Radio<C, E>,
    C: Debug + From<RadioParams>,
    E: Debug,
{
    radio: T,
    params: RadioParams,
    phantom: PhantomData<(C, E)>,
}

impl<T, C, E> HalTransceiver<T, C, E>
where
    T: Radio<C, E>,
    C: Debug + From<RadioParams>,
    E: Debug,
{
    pub fn new(radio: T) -> Self {
        Self {
            radio,
            params: RadioParams::default(),
            phantom: PhantomData,
        }
    }

    pub fn inner(&mut self) -> &mut T {
        &mut self.radio
    }

    pub fn into_inner(self) -> T {
        self.radio
    }
}

impl<T, C, E> DelayMs<u32> for HalTransceiver<T, C, E>
where
    T: Radio<C, E>,
    C: Debug + From<RadioParams>,
    E: Debug,
{
    fn delay_ms(&mut self, ms: u32) {
        self.radio.delay_ms(ms)
    }
}

impl<T, C, E> Transceiver for HalTransceiver<T, C, E>
where
    T: Radio<C, E>,
    C: Debug + From<RadioParams>,
    E: Debug,
{
    type Error = E;

    fn set_mode(&mut self, mode: Mode) -> Result<(), E> {
        let state = match mode {
            Mode::Sleep => <T as State>::State::sleep(),
            Mode::Standby => <T as State>::State::idle(),
        };
        self.radio.set_state(state)
    }

    fn configure(&mut self, params: &RadioParams) -> Result<(), E> {
        debug!("Configuring radio: {:?}", params);
        self.radio.set_channel(&C::from(*params))?;
        self.radio.set_power(params.power_dbm())?;
        self.params = *params;
        Ok(())
    }

    fn transmit(&mut self, data: &[u8]) -> Result<bool, E> {
        let budget = self.params.transmit_budget_ms(data.len());
        self.set_mode(Mode::Standby)?;
        self.radio.start_transmit(data)?;
        let mut waited = 0;
        let mut done = self.radio.check_transmit()?;
        while !done && waited < budget {
            self.radio.delay_ms(TX_POLL_MS);
            waited += TX_POLL_MS;
            done = self.radio.check_transmit()?;
        }
        self.set_mode(Mode::Standby)?;
        if done {
            trace!("Transmitted {}B in about {}ms.", data.len(), waited);
        } else {
            warn!("Transmission of {}B not confirmed within {}ms.", data.len(), budget);
        }
        Ok(done)
    }

    fn arm_continuous_receive(&mut self) -> Result<(), E> {
        self.set_mode(Mode::Standby)?;
        self.radio.start_receive()
    }

    fn data_ready(&mut self) -> Result<bool, E> {
        self.radio.check_receive(false)
    }

    fn read_received(&mut self, buf: &mut [u8]) -> Result<usize, E> {
        let (size, _info) = self.radio.get_received(buf)?;
        Ok(size.min(buf.len()))
    }

    fn channel_activity_detected(&mut self) -> Result<bool, E> {
        self.radio.is_busy()
    }
}
