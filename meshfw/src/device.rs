// SPDX-FileCopyrightText: 2026 meshfw contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Per-device constants. The table is fixed at build time.

use std::fmt;

use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::crypto;

const PASSPHRASE: &str = "wrpd";

const E30_KEY: &str = include_str!("../keys/e30.key");
const E30_PUB: &str = include_str!("../keys/e30.pub");
const M18_KEY: &str = include_str!("../keys/m18.key");
const M18_PUB: &str = include_str!("../keys/m18.pub");
const M30_KEY: &str = include_str!("../keys/m30.key");
const M30_PUB: &str = include_str!("../keys/m30.pub");
const M32_KEY: &str = include_str!("../keys/m32.key");
const M32_PUB: &str = include_str!("../keys/m32.pub");
const M60_KEY: &str = include_str!("../keys/m60.key");
const M60_PUB: &str = include_str!("../keys/m60.pub");

pub struct Device {
    /// Name used to select the device on the command line.
    pub name: &'static str,
    pub description: &'static str,
    /// Magic string at the start of every partition header in a recovery
    /// image.
    pub partition_magic: &'static str,
    /// ASCII hex string used as the password for the factory image cipher.
    /// It is never decoded into raw bytes.
    pub firmware_key: &'static str,
    /// Encrypted PKCS#1 PEM.
    pub private_key_pem: &'static str,
    /// SubjectPublicKeyInfo PEM.
    pub public_key_pem: &'static str,
    /// Passphrase for [`Self::private_key_pem`].
    pub passphrase: &'static str,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("partition_magic", &self.partition_magic)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Decrypt and parse the device's signing key.
    pub fn signing_key(&self) -> Result<RsaPrivateKey, crypto::Error> {
        crypto::read_legacy_pem_key(self.private_key_pem, self.passphrase.as_bytes())
    }

    /// Parse the device's verification key.
    pub fn verifying_key(&self) -> Result<RsaPublicKey, crypto::Error> {
        crypto::read_pem_public_key(self.public_key_pem)
    }
}

pub static DEVICES: &[Device] = &[
    Device {
        name: "E30",
        description: "D-Link EAGLE PRO AI AX3000 Wi-Fi 6 Mesh Range Extender",
        partition_magic: "DLK6E6110002",
        firmware_key: "4d5ee2c8b5d0fdd9a9a2d351ba897752",
        private_key_pem: E30_KEY,
        public_key_pem: E30_PUB,
        passphrase: PASSPHRASE,
    },
    Device {
        name: "M18",
        description: "D-Link EAGLE PRO AI AX1800 Mesh Router",
        partition_magic: "DLK6E8105001",
        firmware_key: "1ae6c79be7d069ca74df7670bdfc4952",
        private_key_pem: M18_KEY,
        public_key_pem: M18_PUB,
        passphrase: PASSPHRASE,
    },
    Device {
        name: "M30",
        description: "D-Link AQUILA PRO AI AX3000 Smart Mesh Router",
        partition_magic: "DLK6E6110001",
        firmware_key: "b4517d9b98e04d9f075f5e78c743e097",
        private_key_pem: M30_KEY,
        public_key_pem: M30_PUB,
        passphrase: PASSPHRASE,
    },
    Device {
        name: "M32",
        description: "D-Link EAGLE PRO AI AX3200 Mesh-System",
        partition_magic: "DLK6E6010001",
        firmware_key: "6b29f1d663a21b35fb45b69a42649f5e",
        private_key_pem: M32_KEY,
        public_key_pem: M32_PUB,
        passphrase: PASSPHRASE,
    },
    // Same firmware key and key pair as the M32.
    Device {
        name: "R32",
        description: "D-Link EAGLE PRO AI AX3200 Smart Router",
        partition_magic: "DLK6E6015001",
        firmware_key: "6b29f1d663a21b35fb45b69a42649f5e",
        private_key_pem: M32_KEY,
        public_key_pem: M32_PUB,
        passphrase: PASSPHRASE,
    },
    Device {
        name: "M60",
        description: "D-Link AX6000 Wi-Fi 6 Smart Mesh Router",
        partition_magic: "DLK6E8202001",
        firmware_key: "c5f8a1e22f808abc84f2e4a6fa5f10bb",
        private_key_pem: M60_KEY,
        public_key_pem: M60_PUB,
        passphrase: PASSPHRASE,
    },
];

/// Look up a device by its exact name.
pub fn find(name: &str) -> Option<&'static Device> {
    DEVICES.iter().find(|d| d.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_exact() {
        assert_eq!(find("M32").map(|d| d.partition_magic), Some("DLK6E6010001"));
        assert_eq!(find("M60").map(|d| d.partition_magic), Some("DLK6E8202001"));
        assert!(find("m32").is_none());
        assert!(find("M3").is_none());
        assert!(find("").is_none());
    }

    #[test]
    fn key_pairs_match() {
        for device in DEVICES {
            let key = device.signing_key().unwrap();
            let public_key = device.verifying_key().unwrap();

            assert_eq!(key.to_public_key(), public_key, "{}", device.name);
        }
    }

    #[test]
    fn names_and_magics_unique() {
        for (i, a) in DEVICES.iter().enumerate() {
            for b in &DEVICES[i + 1..] {
                assert_ne!(a.name, b.name);
                assert_ne!(a.partition_magic, b.partition_magic);
            }
        }
    }

    #[test]
    fn fields_populated() {
        for device in DEVICES {
            assert!(!device.description.is_empty());
            assert_eq!(device.partition_magic.len(), 12);
            assert_eq!(device.firmware_key.len(), 32);
            assert!(!device.passphrase.is_empty());
        }
    }
}
