//! Device and network fingerprints.
//!
//! Captured at signup and on every session so the risk engine can detect
//! device mismatches and accounts sharing a device or network.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Metadata describing the device a request came from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    /// Client-provided stable device identifier.
    pub device_id: String,
    /// Source IP address.
    pub ip: IpAddr,
    /// User agent string, if known.
    pub user_agent: Option<String>,
}

impl DeviceFingerprint {
    /// Create a fingerprint without a user agent.
    pub fn new(device_id: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            device_id: device_id.into(),
            ip,
            user_agent: None,
        }
    }

    /// Attach a user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Same physical device.
    pub fn same_device(&self, other: &DeviceFingerprint) -> bool {
        !self.device_id.is_empty() && self.device_id == other.device_id
    }

    /// Same network: /24 for IPv4, /48 for IPv6.
    pub fn same_network(&self, other: &DeviceFingerprint) -> bool {
        network_prefix(self.ip) == network_prefix(other.ip)
    }

    /// Neither the device nor the network matches.
    pub fn mismatches(&self, other: &DeviceFingerprint) -> bool {
        !self.same_device(other) && !self.same_network(other)
    }
}

fn network_prefix(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets()[..3].to_vec(),
        IpAddr::V6(v6) => v6.octets()[..6].to_vec(),
    }
}
