//! # Reliable messenger
//!
//! Send and receive on top of a [Transceiver], with an optional stop-and-wait
//! acknowledgment.
//!
//! ## Sending
//!
//! 1. Wait for a free channel (channel activity detection), at most
//!    `timeout_ms`. A channel that stays busy fails with [RadioError::BusyChannel].
//! 2. Encrypt and transmit the frame.
//! 3. Unicast with automatic acknowledgment enabled: listen up to
//!    [ACK_WINDOW_MS] for a frame from the destination whose payload is `AK`.
//!
//! ## Receiving
//!
//! The receiver is armed in continuous mode and polled every [RX_POLL_MS].
//! Each incoming frame is filtered, in order, on:
//! - the network of the clear destination header (silently ignored),
//! - the destination sub-address, ours or broadcast (silently ignored),
//! - the network of the decrypted sender (reported, see [RxOutcome::ForeignSender]),
//! - the expected sender sub-address, if any (reported, see [RxOutcome::UnexpectedSender]).
//!
//! An accepted message stays available through [ReliableMessenger::message]
//! until the next accepted one. With automatic acknowledgment, `AK` is sent
//! back to the sender once the channel is free.
use log::{debug, info, trace, warn};
use std::borrow::Cow;
use std::fmt::Debug;

use crate::address::{AddressError, AddressSpace};
use crate::channel::{ChannelAccess, ACK_CHANNEL_BUDGET_MS};
use crate::cipher::{Aes256Cipher, BlockCipher};
use crate::config::{ConfigError, NodeConfig};
use crate::device::{Mode, Transceiver};
use crate::frame::{Frame, FrameError, MAX_PAYLOAD};
use crate::{LoRaAddress, BROADCAST};

/// Acknowledgment payload.
pub const ACK_PAYLOAD: &[u8] = b"AK";
/// How long a sender listens for the acknowledgment, in milliseconds.
pub const ACK_WINDOW_MS: i32 = 200;
/// Poll period of the receiver, in milliseconds.
pub const RX_POLL_MS: u32 = 10;

/// Result of one receive attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RxOutcome {
    /// Nothing for us: no frame, or a frame for another node or network.
    NoMessage,
    /// Message accepted, `len` payload bytes (padding included).
    Accepted { len: usize, ack: AckStatus },
    /// Message from a sender other than the expected one.
    UnexpectedSender,
    /// Frame addressed to us but the sender is not in our network. Also
    /// reported for frames that cannot be decrypted (wrong key, truncation).
    ForeignSender,
}

impl RxOutcome {
    /// Numeric result: payload length when accepted, `0` when nothing was
    /// received, `-1` for an unexpected sender and `-2` for a foreign one.
    pub fn code(&self) -> i32 {
        match self {
            RxOutcome::NoMessage => 0,
            RxOutcome::Accepted { len, .. } => *len as i32,
            RxOutcome::UnexpectedSender => -1,
            RxOutcome::ForeignSender => -2,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, RxOutcome::Accepted { .. })
    }
}

/// What happened to the automatic acknowledgment of an accepted message.
/// Never invalidates the message itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AckStatus {
    NotRequested,
    Sent,
    /// The channel stayed busy for the whole acknowledgment budget.
    ChannelBusy,
    /// Not confirmed in time, or the transceiver failed.
    TransmitFailed,
}

/// Last accepted message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    sender: u16,
    sender_address: LoRaAddress,
    marker: u8,
    payload: Vec<u8>,
}

impl ReceivedMessage {
    /// Sender sub-address.
    pub fn sender(&self) -> u16 {
        self.sender
    }

    /// Sender full address.
    pub fn sender_address(&self) -> LoRaAddress {
        self.sender_address
    }

    pub fn marker(&self) -> u8 {
        self.marker
    }

    /// Payload as decoded, zero padding included.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload without the trailing zero padding.
    pub fn payload_trimmed(&self) -> &[u8] {
        let end = self
            .payload
            .iter()
            .rposition(|b| *b != 0)
            .map_or(0, |i| i + 1);
        &self.payload[..end]
    }

    /// Payload read as text, up to the first NUL byte.
    pub fn text(&self) -> Cow<'_, str> {
        let end = self
            .payload
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.payload.len());
        String::from_utf8_lossy(&self.payload[..end])
    }
}

/// Messaging endpoint of one node.
pub struct ReliableMessenger<T, C = Aes256Cipher>
where
    T: Transceiver,
    C: BlockCipher,
{
    radio: T,
    config: NodeConfig,
    space: AddressSpace,
    cipher: C,
    channel: ChannelAccess,
    rx_buffer: Vec<u8>,
    message: Option<ReceivedMessage>,
    marker: Option<u8>,
}

impl<T> ReliableMessenger<T, Aes256Cipher>
where
    T: Transceiver,
{
    /// Configures `radio` from `config` and leaves it in standby.
    pub fn new(radio: T, config: NodeConfig) -> Result<Self, RadioError<T::Error>> {
        Self::with_cipher(radio, config)
    }
}

impl<T, C> ReliableMessenger<T, C>
where
    T: Transceiver,
    C: BlockCipher,
{
    /// Like [ReliableMessenger::new], with another block cipher keyed from
    /// the configured seed.
    pub fn with_cipher(mut radio: T, config: NodeConfig) -> Result<Self, RadioError<T::Error>> {
        let space = config.address_space()?;
        radio
            .configure(config.radio())
            .map_err(RadioError::InternalRadioError)?;
        radio
            .set_mode(Mode::Standby)
            .map_err(RadioError::InternalRadioError)?;
        info!(
            "Node {} up on network {} ({:.1}MHz, SF{}).",
            config.node_address(),
            config.network_id(),
            config.radio().frequency_mhz,
            config.radio().spreading_factor
        );
        Ok(ReliableMessenger {
            cipher: C::from_seed(config.key_seed()),
            rx_buffer: vec![0u8; config.receive_buffer_len()],
            radio,
            config,
            space,
            channel: ChannelAccess,
            message: None,
            marker: None,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn address_space(&self) -> &AddressSpace {
        &self.space
    }

    /// Full address of this node.
    pub fn address(&self) -> LoRaAddress {
        self.space.compose(self.config.node_address())
    }

    /// Replaces the configuration, reconfiguring the radio and rekeying.
    pub fn set_config(&mut self, config: NodeConfig) -> Result<(), RadioError<T::Error>> {
        let space = config.address_space()?;
        if config.radio() != self.config.radio() {
            self.radio
                .configure(config.radio())
                .map_err(RadioError::InternalRadioError)?;
        }
        if config.key_seed() != self.config.key_seed() {
            self.cipher = C::from_seed(config.key_seed());
        }
        self.rx_buffer.resize(config.receive_buffer_len(), 0);
        self.space = space;
        self.config = config;
        Ok(())
    }

    pub fn set_automatic_ack(&mut self, automatic_ack: bool) {
        self.config.set_automatic_ack(automatic_ack);
    }

    /// Puts the transceiver to sleep, or back in standby.
    pub fn set_sleep(&mut self, sleep: bool) -> Result<(), RadioError<T::Error>> {
        let mode = if sleep { Mode::Sleep } else { Mode::Standby };
        self.radio.set_mode(mode).map_err(RadioError::InternalRadioError)
    }

    pub fn radio(&self) -> &T {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut T {
        &mut self.radio
    }

    pub fn into_radio(self) -> T {
        self.radio
    }

    /// Last accepted message, if any.
    pub fn message(&self) -> Option<&ReceivedMessage> {
        self.message.as_ref()
    }

    /// Marker of the last frame sent or accepted.
    pub fn marker(&self) -> Option<u8> {
        self.marker
    }

    /// Sends `payload` to the sub-address `destination` of our network.
    ///
    /// Waits at most `timeout_ms` for a free channel. With automatic
    /// acknowledgment enabled and a unicast destination, also waits up to
    /// [ACK_WINDOW_MS] for the `AK` reply.
    pub fn send(
        &mut self,
        destination: u16,
        payload: &[u8],
        timeout_ms: u32,
    ) -> Result<(), RadioError<T::Error>> {
        if !self
            .channel
            .await_free(&mut self.radio, timeout_ms)
            .map_err(RadioError::InternalRadioError)?
        {
            warn!("Channel busy for {}ms, message to {} dropped.", timeout_ms, destination);
            return Err(RadioError::BusyChannel);
        }
        let node = self.config.node_address();
        self.send_from(destination, node, payload)?;
        if destination == BROADCAST || !self.config.automatic_ack() {
            return Ok(());
        }

        debug!("Waiting for the acknowledgment of {}.", destination);
        // The acknowledgment does not replace the last message nor our marker.
        let sent_marker = self.marker;
        let previous = self.message.take();
        let outcome = self.receive_next(node, destination, ACK_WINDOW_MS);
        let ack = std::mem::replace(&mut self.message, previous);
        self.marker = sent_marker;
        let outcome = outcome?;
        let acknowledged =
            outcome.is_accepted() && ack.map_or(false, |m| m.payload_trimmed() == ACK_PAYLOAD);
        if !acknowledged {
            warn!("No acknowledgment from {} ({:?}).", destination, outcome);
            return Err(RadioError::NotAcknowledged { destination });
        }
        debug!("Message acknowledged by {}.", destination);
        Ok(())
    }

    /// Transmits one frame from sub-address `sender` to sub-address
    /// `destination`, without channel check nor acknowledgment.
    pub fn send_from(
        &mut self,
        destination: u16,
        sender: u16,
        payload: &[u8],
    ) -> Result<(), RadioError<T::Error>> {
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::TooBigPayload {
                size: payload.len(),
            }
            .into());
        }
        let frame = Frame::new(
            self.space.try_compose(destination)?,
            self.space.try_compose(sender)?,
            payload,
        );
        let bytes = frame.to_bytes(&self.cipher)?;
        self.marker = Some(frame.marker);
        trace!(
            "Transmitting {}B frame {:#06x} -> {:#06x} (marker {}).",
            bytes.len(),
            frame.sender,
            frame.destination,
            frame.marker
        );
        if !self
            .radio
            .transmit(&bytes)
            .map_err(RadioError::InternalRadioError)?
        {
            warn!("Transmission to {} not confirmed in time.", destination);
            return Err(RadioError::TransmitTimeout);
        }
        Ok(())
    }

    /// Arms the receiver in continuous mode, for use with [ReliableMessenger::poll].
    pub fn listen(&mut self) -> Result<(), RadioError<T::Error>> {
        self.radio
            .set_mode(Mode::Standby)
            .map_err(RadioError::InternalRadioError)?;
        self.radio
            .arm_continuous_receive()
            .map_err(RadioError::InternalRadioError)
    }

    /// Checks once for a received frame addressed to sub-address `to`
    /// (or broadcast) and sent by `from` (`0` accepts any sender).
    /// Never acknowledges.
    pub fn poll(&mut self, to: u16, from: u16) -> Result<RxOutcome, RadioError<T::Error>> {
        Ok(self.poll_frame(to, from)?.unwrap_or(RxOutcome::NoMessage))
    }

    /// Listens for a message to this node, from `from` (`0` for anybody), for
    /// at most `timeout_ms` milliseconds, forever if `timeout_ms <= 0`.
    ///
    /// Frames that do not pass the filters do not end the wait; the result is
    /// then the outcome of the last frame seen. An accepted message is
    /// acknowledged when automatic acknowledgment is enabled.
    pub fn receive(&mut self, from: u16, timeout_ms: i32) -> Result<RxOutcome, RadioError<T::Error>> {
        let node = self.config.node_address();
        let outcome = self.receive_next(node, from, timeout_ms)?;
        match outcome {
            RxOutcome::Accepted { len, .. } if self.config.automatic_ack() => {
                let ack = match self.message.as_ref().map(ReceivedMessage::sender) {
                    Some(sender) => self.acknowledge(sender),
                    None => AckStatus::NotRequested,
                };
                Ok(RxOutcome::Accepted { len, ack })
            }
            outcome => Ok(outcome),
        }
    }

    /// Same as [ReliableMessenger::receive] for any local sub-address `to`,
    /// without acknowledgment. The radio is back in standby on return.
    pub fn receive_next(
        &mut self,
        to: u16,
        from: u16,
        timeout_ms: i32,
    ) -> Result<RxOutcome, RadioError<T::Error>> {
        self.listen()?;
        let polls = if timeout_ms > 0 {
            Some(timeout_ms as u32 / RX_POLL_MS)
        } else {
            None
        };
        let result = self.wait_frame(to, from, polls);
        self.radio
            .set_mode(Mode::Standby)
            .map_err(RadioError::InternalRadioError)?;
        result
    }

    fn wait_frame(
        &mut self,
        to: u16,
        from: u16,
        polls: Option<u32>,
    ) -> Result<RxOutcome, RadioError<T::Error>> {
        let mut outcome = RxOutcome::NoMessage;
        let mut count = 0;
        while polls.map_or(true, |max| count < max) {
            if let Some(received) = self.poll_frame(to, from)? {
                if received.is_accepted() {
                    return Ok(received);
                }
                outcome = received;
            }
            self.radio.delay_ms(RX_POLL_MS);
            count += 1;
        }
        Ok(outcome)
    }

    /// `None` when no frame is pending.
    fn poll_frame(&mut self, to: u16, from: u16) -> Result<Option<RxOutcome>, RadioError<T::Error>> {
        if !self
            .radio
            .data_ready()
            .map_err(RadioError::InternalRadioError)?
        {
            return Ok(None);
        }
        let len = self
            .radio
            .read_received(&mut self.rx_buffer)
            .map_err(RadioError::InternalRadioError)?;
        Ok(Some(self.classify(len, to, from)))
    }

    fn classify(&mut self, len: usize, to: u16, from: u16) -> RxOutcome {
        let raw = &self.rx_buffer[..len];
        let destination = match Frame::destination_of(raw) {
            Ok(destination) => destination,
            Err(err) => {
                debug!("Packet ignored: {}", err);
                return RxOutcome::NoMessage;
            }
        };
        if !self.space.is_local(destination) {
            trace!("Packet ignored: destination {:#06x} is on another network.", destination);
            return RxOutcome::NoMessage;
        }
        let destination_sub = self.space.sub_address_of(destination);
        if destination_sub != BROADCAST && destination_sub != to {
            trace!("Packet ignored: addressed to {}.", destination_sub);
            return RxOutcome::NoMessage;
        }

        let frame = match Frame::try_from_bytes(raw, &self.cipher) {
            Ok(frame) => frame,
            Err(err) => {
                debug!("Undecodable frame for us: {}", err);
                return RxOutcome::ForeignSender;
            }
        };
        if !self.space.is_local(frame.sender) {
            debug!("Frame from foreign sender {:#06x} (wrong key?).", frame.sender);
            return RxOutcome::ForeignSender;
        }
        let sender = self.space.sub_address_of(frame.sender);
        if from != BROADCAST && sender != from {
            debug!("Frame from {} while expecting {}.", sender, from);
            return RxOutcome::UnexpectedSender;
        }

        let len = frame.payload.len();
        info!("Accepted {}B from {} (marker {}).", len, sender, frame.marker);
        self.marker = Some(frame.marker);
        self.message = Some(ReceivedMessage {
            sender,
            sender_address: frame.sender,
            marker: frame.marker,
            payload: frame.payload,
        });
        RxOutcome::Accepted {
            len,
            ack: AckStatus::NotRequested,
        }
    }

    /// Sends `AK` to `sender`. Failures are reported in the status only, the
    /// acknowledged message stays valid and keeps its marker.
    fn acknowledge(&mut self, sender: u16) -> AckStatus {
        match self.channel.await_free(&mut self.radio, ACK_CHANNEL_BUDGET_MS) {
            Ok(true) => {}
            Ok(false) => {
                warn!("Channel busy, acknowledgment to {} not sent.", sender);
                return AckStatus::ChannelBusy;
            }
            Err(err) => {
                warn!("Channel sensing failed, acknowledgment to {} not sent: {:?}", sender, err);
                return AckStatus::TransmitFailed;
            }
        }
        let node = self.config.node_address();
        let marker = self.marker;
        let status = match self.send_from(sender, node, ACK_PAYLOAD) {
            Ok(()) => AckStatus::Sent,
            Err(err) => {
                warn!("Acknowledgment to {} failed: {:?}", sender, err);
                AckStatus::TransmitFailed
            }
        };
        self.marker = marker;
        status
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RadioError<R>
where
    R: Debug,
{
    #[error("Busy channel")]
    BusyChannel,

    #[error("Transmission not confirmed within its airtime budget.")]
    TransmitTimeout,

    #[error("No acknowledgment received from {}.", .destination)]
    NotAcknowledged { destination: u16 },

    #[error("Bad frame error.")]
    FrameError(#[from] FrameError),

    #[error("Invalid address.")]
    AddressError(#[from] AddressError),

    #[error("Invalid configuration.")]
    ConfigError(#[from] ConfigError),

    #[error("Internal radio error.")]
    InternalRadioError(R),
}
