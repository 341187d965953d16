//! Node configuration and its non-volatile layout.
//!
//! Store layout, multi-byte values low byte first:
//!
//! | offset   | content                       |
//! |----------|-------------------------------|
//! | 0..=1    | node sub-address              |
//! | 2..=3    | network id                    |
//! | 4        | device range code             |
//! | 5..=6    | key seed                      |
//! | 7..=10   | frequency (MHz, f32)          |
//! | 11       | spreading factor              |
//! | 12       | bandwidth code                |
//! | 13       | power code                    |
use log::{info, warn};

use crate::address::{AddressError, AddressSpace};
use crate::cipher::BLOCK_SIZE;
use crate::device::RadioParams;
use crate::frame::{HEADER_SIZE, MAX_LORA_PAYLOAD};
use crate::store::{NvStore, StoreError, ERASED};

pub const DEFAULT_NETWORK_ID: u16 = 2345;
pub const DEFAULT_RANGE_CODE: u8 = 4;
pub const DEFAULT_NODE_ADDRESS: u16 = 1;
pub const DEFAULT_KEY_SEED: u16 = 4321;

/// Bytes used by the configuration in a store.
pub const STORE_SIZE: usize = 14;

const NODE_ADDRESS_OFFSET: usize = 0;
const NETWORK_ID_OFFSET: usize = 2;
const RANGE_CODE_OFFSET: usize = 4;
const KEY_SEED_OFFSET: usize = 5;
const FREQUENCY_OFFSET: usize = 7;
const SPREADING_FACTOR_OFFSET: usize = 11;
const BANDWIDTH_OFFSET: usize = 12;
const POWER_OFFSET: usize = 13;

/// Smallest receive buffer able to hold a frame.
const MIN_RECEIVE_BUFFER: usize = HEADER_SIZE + BLOCK_SIZE;

/// Everything a node needs to join its network.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeConfig {
    node_address: u16,
    network_id: u16,
    range_code: u8,
    key_seed: u16,
    radio: RadioParams,
    automatic_ack: bool,
    receive_buffer_len: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            node_address: DEFAULT_NODE_ADDRESS,
            network_id: DEFAULT_NETWORK_ID,
            range_code: DEFAULT_RANGE_CODE,
            key_seed: DEFAULT_KEY_SEED,
            radio: RadioParams::default(),
            automatic_ack: false,
            receive_buffer_len: MAX_LORA_PAYLOAD + 1,
        }
    }
}

impl NodeConfig {
    /// Default configuration with the given node sub-address.
    pub fn with_node_address(node_address: u16) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.set_node_address(node_address)?;
        Ok(config)
    }

    /// Defaults overridden by whatever the store holds.
    pub fn load(store: &impl NvStore) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_net_config(store)?;
        config.load_radio_config(store)?;
        Ok(config)
    }

    /// Address space matching this configuration.
    pub fn address_space(&self) -> Result<AddressSpace, AddressError> {
        let mut space = AddressSpace::new(self.range_code)?;
        space.define_network_id(self.network_id)?;
        Ok(space)
    }

    pub fn node_address(&self) -> u16 {
        self.node_address
    }

    pub fn network_id(&self) -> u16 {
        self.network_id
    }

    pub fn range_code(&self) -> u8 {
        self.range_code
    }

    pub fn key_seed(&self) -> u16 {
        self.key_seed
    }

    pub fn radio(&self) -> &RadioParams {
        &self.radio
    }

    pub fn automatic_ack(&self) -> bool {
        self.automatic_ack
    }

    pub fn receive_buffer_len(&self) -> usize {
        self.receive_buffer_len
    }

    /// Largest network id allowed by the range code.
    pub fn max_network_id(&self) -> u16 {
        0xFFFF >> self.range_code
    }

    /// Largest node sub-address allowed by the range code.
    pub fn max_node_address(&self) -> u16 {
        (1u16 << self.range_code) - 1
    }

    /// Sets this node's sub-address. 0 is the broadcast address and is refused.
    pub fn set_node_address(&mut self, node_address: u16) -> Result<(), ConfigError> {
        if node_address == 0 {
            return Err(ConfigError::BroadcastNodeAddress);
        }
        if node_address > self.max_node_address() {
            return Err(AddressError::SubAddressOutOfRange {
                sub_address: node_address,
                max: self.max_node_address(),
            }
            .into());
        }
        self.node_address = node_address;
        Ok(())
    }

    /// Changes the device range and returns the new maximum network id.
    ///
    /// The network id and node address are clamped into the new range.
    pub fn set_range_code(&mut self, code: u8) -> Result<u16, ConfigError> {
        let max_network_id = AddressSpace::new(code)?.max_network_id();
        self.range_code = code;
        if self.network_id > max_network_id {
            warn!(
                "Network id {} does not fit range code {}, clamped to {}.",
                self.network_id, code, max_network_id
            );
            self.network_id = max_network_id;
        }
        if self.node_address > self.max_node_address() {
            warn!(
                "Node address {} does not fit range code {}, clamped to {}.",
                self.node_address,
                code,
                self.max_node_address()
            );
            self.node_address = self.max_node_address();
        }
        Ok(max_network_id)
    }

    pub fn set_network_id(&mut self, id: u16) -> Result<(), ConfigError> {
        if id > self.max_network_id() {
            return Err(AddressError::NetworkIdOutOfRange {
                id,
                max: self.max_network_id(),
            }
            .into());
        }
        self.network_id = id;
        Ok(())
    }

    pub fn set_key_seed(&mut self, seed: u16) {
        self.key_seed = seed;
    }

    pub fn set_radio(&mut self, radio: RadioParams) -> Result<(), ConfigError> {
        if !radio.is_valid() {
            return Err(ConfigError::InvalidRadioParams { params: radio });
        }
        self.radio = radio;
        Ok(())
    }

    pub fn set_frequency(&mut self, frequency_mhz: f32) -> Result<(), ConfigError> {
        self.set_radio(RadioParams {
            frequency_mhz,
            ..self.radio
        })
    }

    pub fn set_spreading_factor(&mut self, spreading_factor: u8) -> Result<(), ConfigError> {
        self.set_radio(RadioParams {
            spreading_factor,
            ..self.radio
        })
    }

    pub fn set_bandwidth(&mut self, bandwidth: u8) -> Result<(), ConfigError> {
        self.set_radio(RadioParams {
            bandwidth,
            ..self.radio
        })
    }

    pub fn set_coding_rate(&mut self, coding_rate: u8) -> Result<(), ConfigError> {
        self.set_radio(RadioParams {
            coding_rate,
            ..self.radio
        })
    }

    pub fn set_power(&mut self, power: u8) -> Result<(), ConfigError> {
        self.set_radio(RadioParams { power, ..self.radio })
    }

    pub fn set_payload_crc(&mut self, payload_crc: bool) {
        self.radio.payload_crc = payload_crc;
    }

    pub fn set_automatic_ack(&mut self, automatic_ack: bool) {
        self.automatic_ack = automatic_ack;
    }

    pub fn set_receive_buffer_len(&mut self, len: usize) -> Result<(), ConfigError> {
        if len < MIN_RECEIVE_BUFFER {
            return Err(ConfigError::BufferTooSmall {
                len,
                min: MIN_RECEIVE_BUFFER,
            });
        }
        self.receive_buffer_len = len;
        Ok(())
    }

    /// Writes node address, network id, range code and key seed.
    pub fn save_net_config(&self, store: &mut impl NvStore) -> Result<(), ConfigError> {
        write_u16(store, NODE_ADDRESS_OFFSET, self.node_address)?;
        write_u16(store, NETWORK_ID_OFFSET, self.network_id)?;
        store.write(RANGE_CODE_OFFSET, self.range_code)?;
        write_u16(store, KEY_SEED_OFFSET, self.key_seed)?;
        Ok(())
    }

    /// Reads the network part of the store. Erased or invalid fields keep
    /// their current value.
    pub fn load_net_config(&mut self, store: &impl NvStore) -> Result<(), ConfigError> {
        let code = store.read(RANGE_CODE_OFFSET)?;
        if code != ERASED {
            if let Err(err) = self.set_range_code(code) {
                warn!("Ignoring stored range code: {}", err);
            }
        }
        if let Some(node_address) = read_u16(store, NODE_ADDRESS_OFFSET)? {
            if let Err(err) = self.set_node_address(node_address) {
                warn!("Ignoring stored node address: {}", err);
            }
        }
        if let Some(network_id) = read_u16(store, NETWORK_ID_OFFSET)? {
            if let Err(err) = self.set_network_id(network_id) {
                warn!("Ignoring stored network id: {}", err);
            }
        }
        if let Some(seed) = read_u16(store, KEY_SEED_OFFSET)? {
            self.key_seed = seed;
        }
        info!(
            "Network configuration loaded: node {} in network {} (range code {}).",
            self.node_address, self.network_id, self.range_code
        );
        Ok(())
    }

    /// Writes frequency, spreading factor, bandwidth and power.
    pub fn save_radio_config(&self, store: &mut impl NvStore) -> Result<(), ConfigError> {
        for (i, b) in self.radio.frequency_mhz.to_le_bytes().iter().enumerate() {
            store.write(FREQUENCY_OFFSET + i, *b)?;
        }
        store.write(SPREADING_FACTOR_OFFSET, self.radio.spreading_factor)?;
        store.write(BANDWIDTH_OFFSET, self.radio.bandwidth)?;
        store.write(POWER_OFFSET, self.radio.power)?;
        Ok(())
    }

    /// Reads the radio part of the store. Erased or invalid fields keep their
    /// current value.
    pub fn load_radio_config(&mut self, store: &impl NvStore) -> Result<(), ConfigError> {
        let mut raw = [0u8; 4];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = store.read(FREQUENCY_OFFSET + i)?;
        }
        if raw != [ERASED; 4] {
            let frequency = f32::from_le_bytes(raw);
            if frequency.is_finite() {
                if let Err(err) = self.set_frequency(frequency) {
                    warn!("Ignoring stored frequency: {}", err);
                }
            }
        }
        let fields: [(usize, fn(&mut Self, u8) -> Result<(), ConfigError>); 3] = [
            (SPREADING_FACTOR_OFFSET, Self::set_spreading_factor),
            (BANDWIDTH_OFFSET, Self::set_bandwidth),
            (POWER_OFFSET, Self::set_power),
        ];
        for (offset, setter) in fields {
            let value = store.read(offset)?;
            if value != ERASED {
                if let Err(err) = setter(self, value) {
                    warn!("Ignoring stored radio parameter at {}: {}", offset, err);
                }
            }
        }
        Ok(())
    }

    /// Erases every configuration byte.
    pub fn reset_store(store: &mut impl NvStore) -> Result<(), ConfigError> {
        for offset in 0..STORE_SIZE {
            store.write(offset, ERASED)?;
        }
        Ok(())
    }
}

fn write_u16(store: &mut impl NvStore, offset: usize, value: u16) -> Result<(), StoreError> {
    let [low, high] = value.to_le_bytes();
    store.write(offset, low)?;
    store.write(offset + 1, high)
}

fn read_u16(store: &impl NvStore, offset: usize) -> Result<Option<u16>, StoreError> {
    let raw = [store.read(offset)?, store.read(offset + 1)?];
    if raw == [ERASED, ERASED] {
        return Ok(None);
    }
    Ok(Some(u16::from_le_bytes(raw)))
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Invalid address configuration.")]
    AddressError(#[from] AddressError),

    #[error("Node address 0 is reserved for broadcast.")]
    BroadcastNodeAddress,

    #[error("Invalid radio parameters: {:?}", .params)]
    InvalidRadioParams { params: RadioParams },

    #[error("Receive buffer too small (is: {}B, min: {}B)!", .len, .min)]
    BufferTooSmall { len: usize, min: usize },

    #[error("Configuration store error.")]
    StoreError(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.node_address(), 1);
        assert_eq!(config.network_id(), 2345);
        assert_eq!(config.range_code(), 4);
        assert_eq!(config.key_seed(), 4321);
        assert_eq!(config.max_network_id(), 4095);
        assert_eq!(config.max_node_address(), 15);
        let space = config.address_space().unwrap();
        assert_eq!(space.compose(1), (2345 << 4) | 1);
    }

    #[test]
    fn node_address_must_be_a_real_device() {
        let mut config = NodeConfig::default();
        assert!(matches!(config.set_node_address(0), Err(ConfigError::BroadcastNodeAddress)));
        assert!(matches!(config.set_node_address(16), Err(ConfigError::AddressError(_))));
        assert_eq!(config.node_address(), 1);
        config.set_node_address(15).unwrap();
        assert_eq!(config.node_address(), 15);
    }

    #[test]
    fn network_id_above_range_is_refused() {
        let mut config = NodeConfig::default();
        assert!(config.set_network_id(4096).is_err());
        assert_eq!(config.network_id(), 2345);
    }

    #[test]
    fn range_change_clamps_dependants() {
        let mut config = NodeConfig::with_node_address(9).unwrap();
        assert_eq!(config.set_range_code(13).unwrap(), 7);
        assert_eq!(config.network_id(), 7);
        assert_eq!(config.node_address(), 9);
        config.set_node_address(300).unwrap();
        config.set_range_code(3).unwrap();
        assert_eq!(config.node_address(), 7);
        assert!(config.set_range_code(15).is_err());
        assert_eq!(config.range_code(), 3);
    }

    #[test]
    fn invalid_radio_params_are_refused() {
        let mut config = NodeConfig::default();
        assert!(config.set_spreading_factor(5).is_err());
        assert!(config.set_bandwidth(10).is_err());
        assert!(config.set_power(0).is_err());
        assert_eq!(config.radio(), &RadioParams::default());
    }

    #[test]
    fn store_round_trip() {
        let mut store = MemoryStore::new(STORE_SIZE);
        let mut config = NodeConfig::default();
        config.set_range_code(6).unwrap();
        config.set_network_id(1000).unwrap();
        config.set_node_address(42).unwrap();
        config.set_key_seed(0xBEEF);
        config.set_frequency(868.1).unwrap();
        config.set_spreading_factor(7).unwrap();
        config.set_bandwidth(7).unwrap();
        config.set_power(5).unwrap();
        config.save_net_config(&mut store).unwrap();
        config.save_radio_config(&mut store).unwrap();

        assert_eq!(&store.as_bytes()[..5], &[42, 0, 0xE8, 0x03, 6]);
        assert_eq!(&store.as_bytes()[5..7], &[0xEF, 0xBE]);

        let loaded = NodeConfig::load(&store).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn erased_store_keeps_defaults() {
        let store = MemoryStore::new(STORE_SIZE);
        assert_eq!(NodeConfig::load(&store).unwrap(), NodeConfig::default());
    }

    #[test]
    fn reset_erases_everything() {
        let mut store = MemoryStore::new(STORE_SIZE);
        NodeConfig::default().save_net_config(&mut store).unwrap();
        NodeConfig::reset_store(&mut store).unwrap();
        assert_eq!(store.as_bytes(), &[ERASED; STORE_SIZE]);
    }

    #[test]
    fn invalid_stored_values_are_skipped() {
        let mut store = MemoryStore::new(STORE_SIZE);
        // node address 0 and spreading factor 3
        store.write(0, 0).unwrap();
        store.write(1, 0).unwrap();
        store.write(11, 3).unwrap();
        let loaded = NodeConfig::load(&store).unwrap();
        assert_eq!(loaded.node_address(), 1);
        assert_eq!(loaded.radio().spreading_factor, 10);
    }

    #[test]
    fn too_small_store_is_an_error() {
        let mut store = MemoryStore::new(4);
        assert!(matches!(
            NodeConfig::default().save_net_config(&mut store),
            Err(ConfigError::StoreError(StoreError::OutOfBounds { .. }))
        ));
    }
}
