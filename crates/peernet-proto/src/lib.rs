//! # Peernet proto
//!
//! The wire-protocol library of the simulator: framed protobuf messages for
//! the LOC discovery protocol and the profile/proximity client protocols,
//! plus the Ed25519 signing helpers the exchanges rely on. Message structs
//! are hand-derived with prost; there is no build-time code generation.

pub mod conversation;
pub mod crypto;
pub mod framing;
pub mod loc;
pub mod profile;
pub mod proximity;

pub use conversation::{StartConversationRequest, StartConversationResponse, Status, CHALLENGE_LEN};
pub use framing::{
    decode, read_frame, write_frame, FRAME_TAG, HEADER_LEN, MAX_CLIENT_BODY, MAX_LOC_BODY,
};
