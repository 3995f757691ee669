//! Conversation primitives shared by the profile and proximity protocols
//!
//! Both client protocols open with the same challenge exchange: the client
//! sends its public key and a fresh 32-byte challenge; the server answers
//! with its own key, its own challenge, and a signature over the client's
//! challenge carried in the response envelope.

/// Client-protocol response status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Status {
    /// Success
    Ok = 0,
    /// Malformed frame or message
    ErrorProtocolViolation = 1,
    /// A request field failed validation
    ErrorBadRequest = 2,
    /// A signature did not verify
    ErrorSignature = 3,
    /// Referenced entity does not exist
    ErrorNotFound = 4,
    /// Capacity exhausted
    ErrorQuotaExceeded = 5,
    /// The server could not process an otherwise valid request
    ErrorInternal = 6,
}

/// Open a conversation: client key and challenge.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StartConversationRequest {
    /// Protocol version triple
    #[prost(bytes = "vec", tag = "1")]
    pub version: Vec<u8>,
    /// The client identity's Ed25519 public key
    #[prost(bytes = "vec", tag = "2")]
    pub public_key: Vec<u8>,
    /// Fresh 32-byte client challenge
    #[prost(bytes = "vec", tag = "3")]
    pub challenge: Vec<u8>,
}

/// Conversation accepted: server key and challenge.
///
/// The envelope signature of the carrying response covers the client
/// challenge echoed here.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StartConversationResponse {
    /// Protocol version triple
    #[prost(bytes = "vec", tag = "1")]
    pub version: Vec<u8>,
    /// The server's Ed25519 public key
    #[prost(bytes = "vec", tag = "2")]
    pub public_key: Vec<u8>,
    /// Fresh 32-byte server challenge
    #[prost(bytes = "vec", tag = "3")]
    pub challenge: Vec<u8>,
    /// The client challenge, echoed
    #[prost(bytes = "vec", tag = "4")]
    pub client_challenge: Vec<u8>,
}

/// Length of every conversation challenge.
pub const CHALLENGE_LEN: usize = 32;
