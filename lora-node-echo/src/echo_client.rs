use anyhow::{anyhow, bail};
use log::{info, warn};

use lora_node::{RadioError, ReliableMessenger, RxOutcome, Transceiver};

const ECHO_TIMEOUT_MS: i32 = 2_000;
const SEND_ATTEMPTS: usize = 5;

/// A basic echo client
pub struct EchoClient<T: Transceiver> {
    pub node: ReliableMessenger<T>,
    pub server: u16,
    pub messages: Vec<Vec<u8>>,
}

impl<T: Transceiver> EchoClient<T> {
    pub fn new(node: ReliableMessenger<T>, server: u16, messages: Vec<Vec<u8>>) -> Self {
        Self {
            node,
            server,
            messages,
        }
    }

    /// Sends every message and waits for its echo. Returns how many came back.
    pub fn run(mut self) -> anyhow::Result<usize> {
        let mut echoed = 0;
        let messages = std::mem::take(&mut self.messages);
        for msg in messages {
            info!("Sending: {}", String::from_utf8_lossy(&msg));
            if !self.try_send(&msg)? {
                bail!("Server {} unreachable.", self.server);
            }

            let outcome = self
                .node
                .receive(self.server, ECHO_TIMEOUT_MS)
                .map_err(|err| anyhow!("Reception error!\ncause: {:?}", err))?;
            match (outcome, self.node.message()) {
                (RxOutcome::Accepted { .. }, Some(echo)) if echo.payload_trimmed() == msg.as_slice() => {
                    info!("Echo received (marker: {}): {}", echo.marker(), echo.text());
                    echoed += 1;
                }
                (outcome, _) => warn!("No echo for this message (code {}).", outcome.code()),
            }
        }
        Ok(echoed)
    }

    fn try_send(&mut self, msg: &[u8]) -> anyhow::Result<bool> {
        for attempt in 1..=SEND_ATTEMPTS {
            match self.node.send(self.server, msg, 500) {
                Ok(()) => return Ok(true),
                Err(RadioError::BusyChannel)
                | Err(RadioError::TransmitTimeout)
                | Err(RadioError::NotAcknowledged { .. }) => {
                    warn!("Transmission failed, attempt {}/{}.", attempt, SEND_ATTEMPTS);
                }
                Err(err) => return Err(anyhow!("Transmission error!\ncause: {:?}", err)),
            }
        }
        Ok(false)
    }
}
