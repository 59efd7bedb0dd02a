//! Bandwidth and energy fee estimation
//!
//! A transaction consumes bandwidth equal to its serialized size. If the
//! account's free plus staked bandwidth does not cover it, the whole size is
//! burned at the per-byte price. Contract calls also consume energy; any
//! shortfall against staked energy is burned at the per-unit price.

use serde::Deserialize;

/// Signature plus the protobuf envelope around raw_data
pub const TX_OVERHEAD_BYTES: u64 = 65 + 69;

/// Energy a TRC-20 transfer is assumed to need when simulation reports none
pub const DEFAULT_TRC20_ENERGY: u64 = 65_000;

pub const DEFAULT_SUN_PER_BYTE: u64 = 1_000;
pub const DEFAULT_SUN_PER_ENERGY: u64 = 420;

/// `getaccountresource` response; absent fields mean zero
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResources {
    #[serde(default)]
    pub free_net_limit: u64,
    #[serde(default)]
    pub free_net_used: u64,
    #[serde(default, rename = "NetLimit")]
    pub net_limit: u64,
    #[serde(default, rename = "NetUsed")]
    pub net_used: u64,
    #[serde(default, rename = "EnergyLimit")]
    pub energy_limit: u64,
    #[serde(default, rename = "EnergyUsed")]
    pub energy_used: u64,
}

impl AccountResources {
    pub fn available_bandwidth(&self) -> u64 {
        self.free_net_limit.saturating_sub(self.free_net_used) + self.net_limit.saturating_sub(self.net_used)
    }

    pub fn available_energy(&self) -> u64 {
        self.energy_limit.saturating_sub(self.energy_used)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourcePrices {
    pub sun_per_byte: u64,
    pub sun_per_energy: u64,
}

impl Default for ResourcePrices {
    fn default() -> Self {
        Self {
            sun_per_byte: DEFAULT_SUN_PER_BYTE,
            sun_per_energy: DEFAULT_SUN_PER_ENERGY,
        }
    }
}

/// Size of the signed transaction given its unsigned `raw_data_hex`
pub fn signed_size(raw_data_hex: &str) -> u64 {
    (raw_data_hex.len() / 2) as u64 + TX_OVERHEAD_BYTES
}

/// Sun burned by a transaction of `size` bytes needing `energy`
pub fn estimate_fee(size: u64, energy: u64, resources: &AccountResources, prices: &ResourcePrices) -> u64 {
    let bandwidth_fee = if resources.available_bandwidth() >= size {
        0
    } else {
        size * prices.sun_per_byte
    };

    let energy_fee = energy.saturating_sub(resources.available_energy()) * prices.sun_per_energy;
    bandwidth_fee + energy_fee
}
