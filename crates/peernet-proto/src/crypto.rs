//! Challenges and Ed25519 signing helpers
//!
//! All conversation challenges are 32 random bytes. Activity metadata is
//! signed over its canonical encoding: the prost encoding of
//! [`crate::proximity::ActivityInformation`], which never contains the
//! signature itself.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use prost::Message;
use rand::{CryptoRng, RngCore};

use peernet_core::{ActivityInfo, SimError, SimResult};

use crate::conversation::CHALLENGE_LEN;
use crate::proximity::ActivityInformation;

/// Generate a fresh 32-byte conversation challenge.
pub fn generate_challenge<R: RngCore + CryptoRng>(rng: &mut R) -> [u8; CHALLENGE_LEN] {
    let mut challenge = [0u8; CHALLENGE_LEN];
    rng.fill_bytes(&mut challenge);
    challenge
}

/// Sign arbitrary bytes with an Ed25519 key.
pub fn sign(key: &SigningKey, message: &[u8]) -> Vec<u8> {
    key.sign(message).to_bytes().to_vec()
}

/// Verify an Ed25519 signature under a raw 32-byte public key.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> SimResult<()> {
    let key_bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| SimError::crypto(format!("public key must be 32 bytes, got {}", public_key.len())))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| SimError::crypto(format!("invalid public key: {e}")))?;
    let signature = Signature::from_slice(signature)
        .map_err(|e| SimError::crypto(format!("invalid signature encoding: {e}")))?;
    key.verify(message, &signature)
        .map_err(|_| SimError::crypto("signature verification failed"))
}

/// Canonical encoding of activity metadata; the bytes the owner signs.
pub fn canonical_activity_encoding(info: &ActivityInfo) -> Vec<u8> {
    ActivityInformation::from(info).encode_to_vec()
}

/// Sign activity metadata with the owner's key.
pub fn sign_activity(key: &SigningKey, info: &ActivityInfo) -> Vec<u8> {
    sign(key, &canonical_activity_encoding(info))
}

/// Verify an activity signature against the owner key embedded in the
/// metadata itself.
pub fn verify_activity(info: &ActivityInfo, signature: &[u8]) -> SimResult<()> {
    verify(
        &info.owner_public_key,
        &canonical_activity_encoding(info),
        signature,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use peernet_core::activity::activity_info;
    use peernet_core::{GpsLocation, IdentityId, ServerContact};
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;
    use std::net::{IpAddr, Ipv4Addr};

    fn signed_sample(rng: &mut ChaCha12Rng) -> (SigningKey, ActivityInfo, Vec<u8>) {
        let key = SigningKey::generate(rng);
        let info = activity_info(
            1,
            IdentityId::from_public_key(&key.verifying_key()),
            key.verifying_key().as_bytes().to_vec(),
            ServerContact {
                ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                primary_port: 10_001,
            },
            "Test",
            GpsLocation::new(10.0, 20.0).unwrap(),
            100,
            0,
            3_600,
        );
        let signature = sign_activity(&key, &info);
        (key, info, signature)
    }

    #[test]
    fn challenges_are_distinct_and_sized() {
        let mut rng = ChaCha12Rng::seed_from_u64(11);
        let a = generate_challenge(&mut rng);
        let b = generate_challenge(&mut rng);
        assert_eq!(a.len(), CHALLENGE_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn activity_signature_verifies() {
        let mut rng = ChaCha12Rng::seed_from_u64(12);
        let (_, info, signature) = signed_sample(&mut rng);
        verify_activity(&info, &signature).unwrap();
    }

    #[test]
    fn tampered_activity_fails_verification() {
        let mut rng = ChaCha12Rng::seed_from_u64(13);
        let (_, mut info, signature) = signed_sample(&mut rng);
        info.precision += 1;
        assert!(verify_activity(&info, &signature).is_err());
    }

    #[test]
    fn signature_under_wrong_key_fails() {
        let mut rng = ChaCha12Rng::seed_from_u64(14);
        let (_, info, _) = signed_sample(&mut rng);
        let other = SigningKey::generate(&mut rng);
        let forged = sign_activity(&other, &info);
        assert!(verify_activity(&info, &forged).is_err());
    }
}
