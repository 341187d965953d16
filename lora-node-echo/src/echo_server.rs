use anyhow::anyhow;
use log::{info, warn};
use std::time::Duration;

use lora_node::{RadioError, ReliableMessenger, RxOutcome, Transceiver};

/// Pause before answering, so the client is back in receive mode.
const TURNAROUND: Duration = Duration::from_millis(50);
const LISTEN_WINDOW_MS: i32 = 1_000;
const MAX_IDLE_WINDOWS: usize = 10;
const SEND_ATTEMPTS: usize = 5;

/// A basic echo server: every accepted message is sent back to its sender.
pub struct EchoServer<T: Transceiver> {
    pub node: ReliableMessenger<T>,
}

impl<T: Transceiver> EchoServer<T> {
    pub fn new(node: ReliableMessenger<T>) -> Self {
        Self { node }
    }

    /// Echoes up to `rounds` messages. Stops early after
    /// [MAX_IDLE_WINDOWS] windows without traffic. Returns the number of
    /// messages echoed.
    pub fn serve(mut self, rounds: usize) -> anyhow::Result<usize> {
        let mut echoed = 0;
        let mut idle = 0;
        while echoed < rounds && idle < MAX_IDLE_WINDOWS {
            let outcome = self
                .node
                .receive(0, LISTEN_WINDOW_MS)
                .map_err(|err| anyhow!("Reception error!\ncause: {:?}", err))?;
            let (sender, payload) = match (&outcome, self.node.message()) {
                (RxOutcome::Accepted { ack, .. }, Some(message)) => {
                    info!("Received from {} ({:?}): {}", message.sender(), ack, message.text());
                    (message.sender(), message.payload_trimmed().to_vec())
                }
                _ => {
                    idle += 1;
                    continue;
                }
            };
            idle = 0;

            std::thread::sleep(TURNAROUND);
            if self.try_send(sender, &payload)? {
                echoed += 1;
            }
        }
        Ok(echoed)
    }

    fn try_send(&mut self, destination: u16, payload: &[u8]) -> anyhow::Result<bool> {
        for attempt in 1..=SEND_ATTEMPTS {
            match self.node.send(destination, payload, 500) {
                Ok(()) => {
                    info!("Echo sent to {} (marker: {:?}).", destination, self.node.marker());
                    return Ok(true);
                }
                Err(RadioError::BusyChannel)
                | Err(RadioError::TransmitTimeout)
                | Err(RadioError::NotAcknowledged { .. }) => {
                    warn!("Echo to {} failed, attempt {}/{}.", destination, attempt, SEND_ATTEMPTS);
                }
                Err(err) => return Err(anyhow!("Transmission error!\ncause: {:?}", err)),
            }
        }
        Ok(false)
    }
}
