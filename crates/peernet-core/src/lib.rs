//! # Peernet core
//!
//! Domain model and world state for the peernet network simulator: managed
//! server records, synthetic identities and activities, GPS math, wildcard
//! matchers, and the unified error type. Everything here is either a pure
//! function or state guarded by per-record locks that are never held across
//! an await point; the async machinery lives in the `peernet-loc` and
//! `peernet-sim` crates.

pub mod activity;
pub mod errors;
pub mod geo;
pub mod identity;
pub mod ids;
pub mod matcher;
pub mod profile;
pub mod server;
pub mod world;

pub use activity::{Activity, ActivityInfo, ActivityKey, ServerContact, MAX_PRECISION};
pub use errors::{SimError, SimResult};
pub use geo::{GpsLocation, EARTH_RADIUS_M, NO_LOCATION_MICRO};
pub use identity::{Identity, SessionState};
pub use ids::{sha256, IdentityId, NetworkId};
pub use matcher::{ActivityQueryFilter, ProfileQueryFilter, WildcardFilter};
pub use profile::{ImageData, ProfileInfo, PROTOCOL_VERSION};
pub use server::{
    Server, ServerKind, ServerPayload, ServerShared, MAX_ACTIVITIES, MAX_IDENTITIES,
    PORT_BLOCK_SIZE, SERVER_IP,
};
pub use world::{identity_member_name, server_instance_name, IdentityHandle, WorldModel};
