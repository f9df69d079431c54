//! Admin credential check.

use checkface_core::AdminGate;
use sha2::{Digest, Sha256};

/// Accepts the secret whose SHA-256 digest matches the configured one.
///
/// Only the digest is ever held, so the configuration never contains the
/// secret itself.
pub struct DigestGate {
    digest: [u8; 32],
}

impl DigestGate {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            digest: Sha256::digest(secret.as_bytes()).into(),
        }
    }

    /// Parse a 64-character hex digest, as printed by [`hex_digest`].
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        if hex.len() != 64 || !hex.is_ascii() {
            return None;
        }
        let mut digest = [0u8; 32];
        for (i, byte) in digest.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self { digest })
    }
}

impl AdminGate for DigestGate {
    fn authenticate(&self, secret: &str) -> bool {
        let presented: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
        // Constant-time: always compare every byte.
        let diff = presented
            .iter()
            .zip(self.digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        diff == 0
    }
}

/// Lower-case hex SHA-256 of `secret`, the form stored in configuration.
pub fn hex_digest(secret: &str) -> String {
    Sha256::digest(secret.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
