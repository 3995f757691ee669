//! Stable 32-byte identifiers
//!
//! Servers are identified on the wire by an opaque 32-byte network id
//! (assigned by the child process when it registers with its LOC server);
//! identities by the SHA-256 of their Ed25519 public key. Both serialize as
//! lowercase hex.

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::errors::{SimError, SimResult};

macro_rules! hex_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Wrap raw bytes.
            pub fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Parse from a byte slice; must be exactly 32 bytes.
            pub fn from_slice(bytes: &[u8]) -> SimResult<Self> {
                let arr: [u8; 32] = bytes.try_into().map_err(|_| {
                    SimError::invalid(format!(
                        concat!(stringify!($name), " must be 32 bytes, got {}"),
                        bytes.len()
                    ))
                })?;
                Ok(Self(arr))
            }

            /// Parse from a lowercase hex string.
            pub fn from_hex(s: &str) -> SimResult<Self> {
                let bytes = hex::decode(s)
                    .map_err(|e| SimError::invalid(format!("bad hex id: {e}")))?;
                Self::from_slice(&bytes)
            }

            /// Raw bytes.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Owned byte vector for wire fields.
            pub fn to_vec(&self) -> Vec<u8> {
                self.0.to_vec()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), hex::encode(self.0))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&hex::encode(self.0))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_id! {
    /// Opaque 32-byte server identifier, stable for the server's lifetime.
    NetworkId
}

hex_id! {
    /// Identity identifier: SHA-256 of the identity's Ed25519 public key.
    IdentityId
}

impl IdentityId {
    /// Derive the identity id from a public key.
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        Self(digest.into())
    }
}

/// SHA-256 of arbitrary bytes, used for image content addressing.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_id_requires_32_bytes() {
        assert!(NetworkId::from_slice(&[0u8; 31]).is_err());
        assert!(NetworkId::from_slice(&[0u8; 33]).is_err());
        assert!(NetworkId::from_slice(&[7u8; 32]).is_ok());
    }

    #[test]
    fn hex_roundtrip() {
        let id = NetworkId::new([0xAB; 32]);
        let parsed = NetworkId::from_hex(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn identity_id_is_sha256_of_public_key() {
        let key = ed25519_dalek::SigningKey::from_bytes(&[3u8; 32]);
        let public = key.verifying_key();
        let id = IdentityId::from_public_key(&public);
        assert_eq!(id.as_bytes(), &sha256(public.as_bytes()));
    }
}
