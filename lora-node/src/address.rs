//! Two-level node addressing.
//!
//! A [LoRaAddress](crate::LoRaAddress) is split at bit `r` (the *range code*):
//! the high `16 - r` bits hold the network id, the low `r` bits hold the
//! device sub-address. Sub-address 0 is reserved for broadcast.
//!
//! | range code | device sub-addresses | max network id |
//! |-----------:|---------------------:|---------------:|
//! | 2          | 1..=3                | 16383          |
//! | 4          | 1..=15               | 4095           |
//! | 8          | 1..=255              | 255            |
//! | 14         | 1..=16383            | 3              |
use crate::LoRaAddress;

pub const MIN_RANGE_CODE: u8 = 2;
pub const MAX_RANGE_CODE: u8 = 14;

/// Address split parameters plus the network id this node lives in.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AddressSpace {
    range_code: u8,
    mask: u16,
    max_network_id: u16,
    network_id: u16,
}

impl AddressSpace {
    /// Builds an address space for `range_code`, with network id 0.
    pub fn new(range_code: u8) -> Result<Self, AddressError> {
        let mut space = AddressSpace {
            range_code: MIN_RANGE_CODE,
            mask: 0,
            max_network_id: 0,
            network_id: 0,
        };
        space.define_range(range_code)?;
        Ok(space)
    }

    /// Sets the split point and returns the largest network id it allows.
    ///
    /// The network id is not revalidated here: call
    /// [define_network_id](AddressSpace::define_network_id) afterwards.
    pub fn define_range(&mut self, code: u8) -> Result<u16, AddressError> {
        if !(MIN_RANGE_CODE..=MAX_RANGE_CODE).contains(&code) {
            return Err(AddressError::InvalidRange { code });
        }
        self.range_code = code;
        self.mask = (1u16 << code) - 1;
        self.max_network_id = 0xFFFF >> code;
        Ok(self.max_network_id)
    }

    /// Sets the network id. Fails without touching state if `id` does not fit
    /// the current range.
    pub fn define_network_id(&mut self, id: u16) -> Result<(), AddressError> {
        if id > self.max_network_id {
            return Err(AddressError::NetworkIdOutOfRange {
                id,
                max: self.max_network_id,
            });
        }
        self.network_id = id;
        Ok(())
    }

    /// Full address of `sub_address` inside the configured network.
    pub fn compose(&self, sub_address: u16) -> LoRaAddress {
        (((self.network_id as u32) << self.range_code) as u16) | sub_address
    }

    /// Like [compose](AddressSpace::compose) but rejects sub-addresses that
    /// would spill into the network bits.
    pub fn try_compose(&self, sub_address: u16) -> Result<LoRaAddress, AddressError> {
        if sub_address > self.mask {
            return Err(AddressError::SubAddressOutOfRange {
                sub_address,
                max: self.mask,
            });
        }
        Ok(self.compose(sub_address))
    }

    /// `(network id, sub-address)` of a full address.
    pub fn split(&self, address: LoRaAddress) -> (u16, u16) {
        (address >> self.range_code, address & self.mask)
    }

    pub fn network_of(&self, address: LoRaAddress) -> u16 {
        address >> self.range_code
    }

    pub fn sub_address_of(&self, address: LoRaAddress) -> u16 {
        address & self.mask
    }

    /// Whether `address` carries this node's network id.
    pub fn is_local(&self, address: LoRaAddress) -> bool {
        self.network_of(address) == self.network_id
    }

    pub fn range_code(&self) -> u8 {
        self.range_code
    }

    pub fn mask(&self) -> u16 {
        self.mask
    }

    pub fn max_network_id(&self) -> u16 {
        self.max_network_id
    }

    pub fn network_id(&self) -> u16 {
        self.network_id
    }

    /// Number of sub-address slots, broadcast included (`2^r`).
    pub fn max_devices(&self) -> u32 {
        1u32 << self.range_code
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid device range code {} (expected {}..={}).", .code, MIN_RANGE_CODE, MAX_RANGE_CODE)]
    InvalidRange { code: u8 },

    #[error("Network id {} exceeds the maximum {} allowed by the device range.", .id, .max)]
    NetworkIdOutOfRange { id: u16, max: u16 },

    #[error("Device sub-address {} exceeds the maximum {} allowed by the device range.", .sub_address, .max)]
    SubAddressOutOfRange { sub_address: u16, max: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_code_four() {
        let mut space = AddressSpace::new(2).unwrap();
        assert_eq!(space.define_range(4), Ok(4095));
        space.define_network_id(10).unwrap();
        assert_eq!(space.compose(3), 163);
        assert_eq!(space.split(163), (10, 3));
    }

    #[test]
    fn max_network_id_per_code() {
        let mut space = AddressSpace::new(2).unwrap();
        assert_eq!(space.define_range(2), Ok(16383));
        assert_eq!(space.define_range(8), Ok(255));
        assert_eq!(space.define_range(13), Ok(7));
        assert_eq!(space.define_range(14), Ok(3));
    }

    #[test]
    fn invalid_range_code_keeps_state() {
        let mut space = AddressSpace::new(6).unwrap();
        assert_eq!(space.define_range(15), Err(AddressError::InvalidRange { code: 15 }));
        assert_eq!(space.define_range(1), Err(AddressError::InvalidRange { code: 1 }));
        assert_eq!(space.range_code(), 6);
        assert_eq!(space.mask(), 0x3F);
    }

    #[test]
    fn network_id_above_max_is_rejected() {
        let mut space = AddressSpace::new(8).unwrap();
        space.define_network_id(42).unwrap();
        assert_eq!(
            space.define_network_id(256),
            Err(AddressError::NetworkIdOutOfRange { id: 256, max: 255 })
        );
        assert_eq!(space.network_id(), 42);
        space.define_network_id(255).unwrap();
        assert_eq!(space.network_id(), 255);
    }

    #[test]
    fn compose_split_round_trip_every_range() {
        for r in MIN_RANGE_CODE..=MAX_RANGE_CODE {
            let mut space = AddressSpace::new(r).unwrap();
            let max = space.max_network_id();
            for net in [0, 1, max / 2, max] {
                space.define_network_id(net).unwrap();
                let top = space.mask();
                for sub in [0, 1, top / 2, top] {
                    let address = space.compose(sub);
                    assert_eq!(space.split(address), (net, sub), "r={} net={} sub={}", r, net, sub);
                    assert!(space.is_local(address));
                }
            }
        }
    }

    #[test]
    fn try_compose_rejects_spilling_sub_address() {
        let mut space = AddressSpace::new(4).unwrap();
        space.define_network_id(1).unwrap();
        assert_eq!(space.try_compose(15), Ok(31));
        assert_eq!(
            space.try_compose(16),
            Err(AddressError::SubAddressOutOfRange { sub_address: 16, max: 15 })
        );
    }
}
