//! Simulated user identities
//!
//! Every identity owns a real Ed25519 keypair and goes through the real
//! hosting handshakes, so the simulator keeps the session bookkeeping the
//! protocols require (server key and the two challenges of the last
//! conversation).

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};

use crate::ids::IdentityId;
use crate::profile::ProfileInfo;

/// Bookkeeping from the most recent client conversation.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// The host server's public key, learned in StartConversation
    pub server_public_key: Option<Vec<u8>>,
    /// Our 32-byte challenge sent to the server
    pub client_challenge: Option<[u8; 32]>,
    /// The server's 32-byte challenge sent back to us
    pub server_challenge: Option<[u8; 32]>,
}

/// A synthetic user identity hosted on a profile server.
#[derive(Clone)]
pub struct Identity {
    /// Unique identity name (group name plus zero-padded member index)
    pub name: String,
    /// Ed25519 signing key (holds the expanded secret internally)
    pub signing_key: SigningKey,
    /// SHA-256 of the public key
    pub identity_id: IdentityId,
    /// The profile as told to the host server
    pub primary_profile: ProfileInfo,
    /// The profile as neighbors know it; may lag after updates
    pub propagated_profile: ProfileInfo,
    /// Name of the hosting profile server
    pub host_server: String,
    /// Whether the initial UpdateProfile completed
    pub profile_initialized: bool,
    /// Whether the hosting agreement is still active
    pub hosting_active: bool,
    /// Last-handshake bookkeeping
    pub session: SessionState,
}

impl Identity {
    /// Generate a fresh identity with a new keypair.
    ///
    /// The profile is both the primary and the propagated copy until an
    /// update diverges them.
    pub fn generate<R: RngCore + CryptoRng>(
        name: impl Into<String>,
        profile: ProfileInfo,
        host_server: impl Into<String>,
        rng: &mut R,
    ) -> Self {
        let signing_key = SigningKey::generate(rng);
        let identity_id = IdentityId::from_public_key(&signing_key.verifying_key());
        Self {
            name: name.into(),
            signing_key,
            identity_id,
            primary_profile: profile.clone(),
            propagated_profile: profile,
            host_server: host_server.into(),
            profile_initialized: false,
            hosting_active: false,
            session: SessionState::default(),
        }
    }

    /// The identity's public key.
    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The identity's public key as wire bytes.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.signing_key.verifying_key().as_bytes().to_vec()
    }

    /// Sign a message with the identity's key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .field("identity_id", &self.identity_id)
            .field("host_server", &self.host_server)
            .field("profile_initialized", &self.profile_initialized)
            .field("hosting_active", &self.hosting_active)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GpsLocation;
    use ed25519_dalek::Verifier;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    fn test_profile() -> ProfileInfo {
        ProfileInfo::new("Ia00001", "Test", GpsLocation::new(10.0, 20.0).unwrap())
    }

    #[test]
    fn identity_id_matches_public_key() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let identity = Identity::generate("Ia00001", test_profile(), "A001", &mut rng);
        assert_eq!(
            identity.identity_id,
            IdentityId::from_public_key(&identity.public_key())
        );
    }

    #[test]
    fn signatures_verify_under_the_public_key() {
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let identity = Identity::generate("Ia00001", test_profile(), "A001", &mut rng);
        let sig = identity.sign(b"challenge");
        assert!(identity.public_key().verify(b"challenge", &sig).is_ok());
    }

    #[test]
    fn generation_is_deterministic_given_seed() {
        let mut a = ChaCha12Rng::seed_from_u64(9);
        let mut b = ChaCha12Rng::seed_from_u64(9);
        let ia = Identity::generate("x", test_profile(), "A001", &mut a);
        let ib = Identity::generate("x", test_profile(), "A001", &mut b);
        assert_eq!(ia.public_key_bytes(), ib.public_key_bytes());
    }
}
