//! Small-node LoRa messaging: two-level addressing, AES-encrypted frames,
//! channel-activity gating and a stop-and-wait acknowledgment, on top of any
//! half-duplex packet transceiver.
//!
//! ## Usage
//! ```rust,ignore
//! let config = lora_node::NodeConfig::default();
//! let mut node = lora_node::ReliableMessenger::new(transceiver, config)?;
//! node.set_automatic_ack(true);
//! node.send(3, b"hello", 500)?;
//! if let RxOutcome::Accepted { .. } = node.receive(0, 2_000)? {
//!     println!("{:?}", node.message());
//! }
//! ```

pub mod address;
pub mod channel;
pub mod cipher;
pub mod config;
pub mod device;
pub mod frame;
pub mod messenger;
pub mod store;

pub use address::{AddressError, AddressSpace};
pub use channel::ChannelAccess;
pub use cipher::{Aes256Cipher, BlockCipher};
pub use config::{ConfigError, NodeConfig};
pub use device::{Mode, RadioParams, Transceiver};
pub use frame::{Frame, FrameError};
pub use messenger::{AckStatus, RadioError, ReceivedMessage, ReliableMessenger, RxOutcome};
pub use store::{FileStore, MemoryStore, NvStore, StoreError};

/// Full 16-bit node address: network id in the high bits, device sub-address
/// in the low bits.
pub type LoRaAddress = u16;

/// Device sub-address reserved for broadcast frames.
pub const BROADCAST: u16 = 0;
