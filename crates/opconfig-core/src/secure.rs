//! Credential handling

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The service account token. Wiped from memory on drop and never formatted.
///
/// The token doubles as the cache key material, so it must not leak through
/// logs or `Debug` output of the structs that carry it.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecureString(String);

impl SecureString {
    /// The raw token, for handing to the `op` CLI or the key derivation
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<String> for SecureString {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for SecureString {
    fn from(token: &str) -> Self {
        Self(token.to_owned())
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureString(..)")
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}
