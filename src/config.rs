/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Provides configuration for the [HttpRegistrar](`crate::HttpRegistrar`)

use std::fmt::Display;

/// Metadata describing the device a subscription belongs to, forwarded
/// verbatim to the registration server alongside the token.
///
/// A library cannot reliably probe the hardware it runs on, so the embedding
/// application supplies these once at configuration time.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    /// Operating system identifier, e.g. "ios" or "android".
    pub os: String,

    /// Hardware model, e.g. "iPhone".
    pub model: String,

    /// User-visible device name.
    pub name: String,

    /// Whether tokens on this device come from the sandbox push
    /// environment (debug builds) rather than the production one.
    pub sandboxed: bool,
}

#[derive(Clone, Debug)]
pub struct RegistrationConfig {
    /// host name:port
    pub server_host: String,

    /// http protocol (for production use "https")
    pub http_protocol: Protocol,

    /// Device metadata sent with every registration
    pub device: DeviceInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Protocol {
    Https,
    Http,
}

impl Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Protocol::Http => "http",
                Protocol::Https => "https",
            }
        )
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Https
    }
}

#[cfg(test)]
impl Default for DeviceInfo {
    fn default() -> DeviceInfo {
        DeviceInfo {
            os: String::from("ios"),
            model: String::from("iPhone"),
            name: String::from("Test device"),
            sandboxed: true,
        }
    }
}

#[cfg(test)]
impl Default for RegistrationConfig {
    fn default() -> RegistrationConfig {
        RegistrationConfig {
            server_host: String::from("registration.example.com"),
            http_protocol: Protocol::Https,
            device: Default::default(),
        }
    }
}
