//! Time-bounded geolocated activities

use std::net::IpAddr;

use crate::errors::{SimError, SimResult};
use crate::geo::GpsLocation;
use crate::ids::IdentityId;
use crate::profile::PROTOCOL_VERSION;
use crate::world::IdentityHandle;

/// Maximum allowed activity precision radius in metres.
pub const MAX_PRECISION: u32 = 1000;

/// Contact information of a server: IP address plus primary port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerContact {
    /// IP address the server is reachable on
    pub ip: IpAddr,
    /// The server's primary interface port
    pub primary_port: u16,
}

/// Composite activity key: unique within its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActivityKey {
    /// Activity type string
    pub activity_type: String,
    /// Activity id, unique within the simulation
    pub id: u32,
}

/// The activity metadata as it travels on the wire.
///
/// The owner signs the canonical encoding of this structure; the signature
/// is carried alongside, never inside.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityInfo {
    /// Protocol version triple
    pub version: [u8; 3],
    /// Activity id
    pub id: u32,
    /// SHA-256 id of the owning identity
    pub owner_identity_id: IdentityId,
    /// The owner's Ed25519 public key
    pub owner_public_key: Vec<u8>,
    /// Contact of the owner's profile server
    pub owner_profile_server: ServerContact,
    /// Activity type string
    pub activity_type: String,
    /// Activity location, micro-degree quantized
    pub location: GpsLocation,
    /// Location precision radius in metres, at most [`MAX_PRECISION`]
    pub precision: u32,
    /// Start time, seconds since the Unix epoch
    pub start_time: i64,
    /// Expiration time, seconds since the Unix epoch; after the start
    pub expiration_time: i64,
    /// Free-form extra data
    pub extra_data: String,
}

impl ActivityInfo {
    /// Validate the structural invariants.
    pub fn validate(&self) -> SimResult<()> {
        if self.expiration_time <= self.start_time {
            return Err(SimError::invalid(format!(
                "activity {}: expiration {} not after start {}",
                self.id, self.expiration_time, self.start_time
            )));
        }
        if self.precision > MAX_PRECISION {
            return Err(SimError::invalid(format!(
                "activity {}: precision {} exceeds {MAX_PRECISION}",
                self.id, self.precision
            )));
        }
        Ok(())
    }

    /// Composite key of this activity.
    pub fn key(&self) -> ActivityKey {
        ActivityKey {
            activity_type: self.activity_type.clone(),
            id: self.id,
        }
    }
}

/// A simulated activity with its primary and propagated metadata.
#[derive(Debug, Clone)]
pub struct Activity {
    /// Up-to-date metadata held by the primary proximity server
    pub primary: ActivityInfo,
    /// Possibly stale metadata as neighbors know it
    pub propagated: ActivityInfo,
    /// Owner's Ed25519 signature over the canonical encoding of `primary`
    pub signature: Vec<u8>,
    /// Handle of the owning identity
    pub owner: IdentityHandle,
    /// Name of the primary proximity server
    pub primary_server: String,
    /// Whether the activity is still hosted
    pub hosting_active: bool,
}

impl Activity {
    /// Build a freshly created activity; primary and propagated copies start
    /// out identical.
    pub fn new(
        info: ActivityInfo,
        signature: Vec<u8>,
        owner: IdentityHandle,
        primary_server: impl Into<String>,
    ) -> SimResult<Self> {
        info.validate()?;
        Ok(Self {
            propagated: info.clone(),
            primary: info,
            signature,
            owner,
            primary_server: primary_server.into(),
            hosting_active: false,
        })
    }

    /// Composite key of this activity.
    pub fn key(&self) -> ActivityKey {
        self.primary.key()
    }
}

/// Convenience constructor for an [`ActivityInfo`] with the current
/// protocol version.
pub fn activity_info(
    id: u32,
    owner_identity_id: IdentityId,
    owner_public_key: Vec<u8>,
    owner_profile_server: ServerContact,
    activity_type: impl Into<String>,
    location: GpsLocation,
    precision: u32,
    start_time: i64,
    expiration_time: i64,
) -> ActivityInfo {
    ActivityInfo {
        version: PROTOCOL_VERSION,
        id,
        owner_identity_id,
        owner_public_key,
        owner_profile_server,
        activity_type: activity_type.into(),
        location: location.quantized(),
        precision,
        start_time,
        expiration_time,
        extra_data: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn info(start: i64, expiration: i64, precision: u32) -> ActivityInfo {
        activity_info(
            1,
            IdentityId::new([1; 32]),
            vec![2; 32],
            ServerContact {
                ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                primary_port: 10_001,
            },
            "Test",
            GpsLocation::new(10.0, 20.0).unwrap(),
            precision,
            start,
            expiration,
        )
    }

    #[test]
    fn expiration_must_follow_start() {
        assert!(info(100, 200, 0).validate().is_ok());
        assert!(info(200, 200, 0).validate().is_err());
        assert!(info(300, 200, 0).validate().is_err());
    }

    #[test]
    fn precision_is_bounded() {
        assert!(info(0, 10, 1000).validate().is_ok());
        assert!(info(0, 10, 1001).validate().is_err());
    }
}
