//! Profile server client protocol messages

use peernet_core::{ProfileInfo, SimError, SimResult};

use crate::conversation::{StartConversationRequest, StartConversationResponse, Status};

/// Envelope of every profile-protocol frame.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ProfileMessage {
    /// Correlates responses to requests
    #[prost(uint32, tag = "1")]
    pub id: u32,
    /// Request or response body
    #[prost(oneof = "profile_message::Body", tags = "2, 3")]
    pub body: Option<profile_message::Body>,
}

/// Oneof body of [`ProfileMessage`].
pub mod profile_message {
    /// Request or response.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        /// Client-to-server request
        #[prost(message, tag = "2")]
        Request(super::ProfileRequest),
        /// Server-to-client response
        #[prost(message, tag = "3")]
        Response(super::ProfileResponse),
    }
}

/// A profile-protocol request. The signature is produced by the client
/// identity over the encoded payload where the operation requires it.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ProfileRequest {
    /// Client signature over the encoded payload, or empty
    #[prost(bytes = "vec", tag = "1")]
    pub signature: Vec<u8>,
    /// The operation
    #[prost(oneof = "profile_request::Payload", tags = "2, 3, 4, 5, 6, 7, 8")]
    pub payload: Option<profile_request::Payload>,
}

/// Oneof payload of [`ProfileRequest`].
pub mod profile_request {
    /// The request operation.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        /// Open a conversation
        #[prost(message, tag = "2")]
        StartConversation(super::StartConversationRequest),
        /// Register a hosting agreement
        #[prost(message, tag = "3")]
        RegisterHosting(super::RegisterHostingRequest),
        /// Check in on the customer port
        #[prost(message, tag = "4")]
        CheckIn(super::CheckInRequest),
        /// Upload or update the profile
        #[prost(message, tag = "5")]
        UpdateProfile(super::UpdateProfileRequest),
        /// Cancel the hosting agreement
        #[prost(message, tag = "6")]
        CancelHostingAgreement(super::CancelHostingAgreementRequest),
        /// Search profiles
        #[prost(message, tag = "7")]
        ProfileSearch(super::ProfileSearchRequest),
        /// Fetch a further part of a search result
        #[prost(message, tag = "8")]
        ProfileSearchPart(super::ProfileSearchPartRequest),
    }
}

/// A profile-protocol response. The server signs the payload encoding where
/// the exchange requires proof (conversation open, hosting contract).
#[derive(Clone, PartialEq, prost::Message)]
pub struct ProfileResponse {
    /// Outcome status
    #[prost(enumeration = "Status", tag = "1")]
    pub status: i32,
    /// Server signature over the proven bytes, or empty
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
    /// Response payload on success
    #[prost(oneof = "profile_response::Payload", tags = "3, 4, 5, 6, 7, 8, 9")]
    pub payload: Option<profile_response::Payload>,
}

/// Oneof payload of [`ProfileResponse`].
pub mod profile_response {
    /// The response payload.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        /// Conversation accepted
        #[prost(message, tag = "3")]
        StartConversation(super::StartConversationResponse),
        /// Hosting agreement registered; contract echoed
        #[prost(message, tag = "4")]
        RegisterHosting(super::RegisterHostingResponse),
        /// Check-in accepted
        #[prost(message, tag = "5")]
        CheckIn(super::CheckInResponse),
        /// Profile stored
        #[prost(message, tag = "6")]
        UpdateProfile(super::UpdateProfileResponse),
        /// Hosting agreement cancelled
        #[prost(message, tag = "7")]
        CancelHostingAgreement(super::CancelHostingAgreementResponse),
        /// First page of search results
        #[prost(message, tag = "8")]
        ProfileSearch(super::ProfileSearchResponse),
        /// Further page of search results
        #[prost(message, tag = "9")]
        ProfileSearchPart(super::ProfileSearchPartResponse),
    }
}

/// Hosting agreement contract. The server must echo this byte-identically
/// and sign its encoding.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HostingPlanContract {
    /// Hosting plan id; empty for the default plan
    #[prost(bytes = "vec", tag = "1")]
    pub plan_id: Vec<u8>,
    /// The identity's Ed25519 public key
    #[prost(bytes = "vec", tag = "2")]
    pub identity_public_key: Vec<u8>,
    /// Agreement start, seconds since the Unix epoch
    #[prost(int64, tag = "3")]
    pub start_time: i64,
    /// The identity's type string
    #[prost(string, tag = "4")]
    pub identity_type: String,
}

/// Register a hosting agreement.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RegisterHostingRequest {
    /// The proposed contract
    #[prost(message, optional, tag = "1")]
    pub contract: Option<HostingPlanContract>,
}

/// Hosting registered; the contract must be echoed unchanged.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RegisterHostingResponse {
    /// The accepted contract, byte-identical to the request
    #[prost(message, optional, tag = "1")]
    pub contract: Option<HostingPlanContract>,
}

/// Customer-port check-in, proving possession of the identity key.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CheckInRequest {
    /// The server challenge from StartConversation
    #[prost(bytes = "vec", tag = "1")]
    pub challenge: Vec<u8>,
}

/// Check-in accepted.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CheckInResponse {}

/// Profile fields as they travel on the wire.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ProfileInformation {
    /// Protocol version triple
    #[prost(bytes = "vec", tag = "1")]
    pub version: Vec<u8>,
    /// Identity type string
    #[prost(string, tag = "2")]
    pub profile_type: String,
    /// Profile name
    #[prost(string, tag = "3")]
    pub name: String,
    /// Latitude in micro-degrees
    #[prost(sint32, tag = "4")]
    pub latitude: i32,
    /// Longitude in micro-degrees
    #[prost(sint32, tag = "5")]
    pub longitude: i32,
    /// Free-form extra data
    #[prost(string, tag = "6")]
    pub extra_data: String,
    /// SHA-256 of the profile image, or empty
    #[prost(bytes = "vec", tag = "7")]
    pub profile_image_hash: Vec<u8>,
    /// SHA-256 of the thumbnail image, or empty
    #[prost(bytes = "vec", tag = "8")]
    pub thumbnail_image_hash: Vec<u8>,
}

impl From<&ProfileInfo> for ProfileInformation {
    fn from(info: &ProfileInfo) -> Self {
        Self {
            version: info.version.to_vec(),
            profile_type: info.profile_type.clone(),
            name: info.name.clone(),
            latitude: info.location.latitude_micro(),
            longitude: info.location.longitude_micro(),
            extra_data: info.extra_data.clone(),
            profile_image_hash: info
                .profile_image
                .as_ref()
                .map(|i| i.hash().to_vec())
                .unwrap_or_default(),
            thumbnail_image_hash: info
                .thumbnail_image
                .as_ref()
                .map(|i| i.hash().to_vec())
                .unwrap_or_default(),
        }
    }
}

/// Upload or update the profile, with inline image bytes.
#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateProfileRequest {
    /// The profile fields
    #[prost(message, optional, tag = "1")]
    pub profile: Option<ProfileInformation>,
    /// Full-size image bytes, or empty
    #[prost(bytes = "vec", tag = "2")]
    pub profile_image: Vec<u8>,
    /// Thumbnail bytes, or empty
    #[prost(bytes = "vec", tag = "3")]
    pub thumbnail_image: Vec<u8>,
}

/// Profile stored.
#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateProfileResponse {}

/// Cancel the hosting agreement.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CancelHostingAgreementRequest {}

/// Hosting agreement cancelled.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CancelHostingAgreementResponse {}

/// Search hosted and neighbor profiles.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ProfileSearchRequest {
    /// Only results hosted on the queried server
    #[prost(bool, tag = "1")]
    pub include_hosted_only: bool,
    /// Return image bytes with each result
    #[prost(bool, tag = "2")]
    pub include_images: bool,
    /// Type wildcard filter; `**` disables
    #[prost(string, tag = "3")]
    pub type_filter: String,
    /// Name wildcard filter; `**` disables
    #[prost(string, tag = "4")]
    pub name_filter: String,
    /// Filter centre latitude in micro-degrees, or the no-location sentinel
    #[prost(sint32, tag = "5")]
    pub latitude: i32,
    /// Filter centre longitude in micro-degrees, or the no-location sentinel
    #[prost(sint32, tag = "6")]
    pub longitude: i32,
    /// Location filter radius in metres
    #[prost(uint32, tag = "7")]
    pub radius: u32,
    /// Maximum records returned inline
    #[prost(uint32, tag = "8")]
    pub max_response_record_count: u32,
    /// Maximum records collected overall
    #[prost(uint32, tag = "9")]
    pub max_total_record_count: u32,
}

/// One profile search result.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ProfileQueryInformation {
    /// Result is hosted on the queried server
    #[prost(bool, tag = "1")]
    pub is_hosted: bool,
    /// The identity currently has an open customer session
    #[prost(bool, tag = "2")]
    pub is_online: bool,
    /// Network id of the hosting server, for non-hosted results
    #[prost(bytes = "vec", tag = "3")]
    pub hosting_server_network_id: Vec<u8>,
    /// Protocol version triple
    #[prost(bytes = "vec", tag = "4")]
    pub version: Vec<u8>,
    /// The identity's Ed25519 public key
    #[prost(bytes = "vec", tag = "5")]
    pub identity_public_key: Vec<u8>,
    /// Identity type string
    #[prost(string, tag = "6")]
    pub profile_type: String,
    /// Profile name
    #[prost(string, tag = "7")]
    pub name: String,
    /// Latitude in micro-degrees
    #[prost(sint32, tag = "8")]
    pub latitude: i32,
    /// Longitude in micro-degrees
    #[prost(sint32, tag = "9")]
    pub longitude: i32,
    /// Free-form extra data
    #[prost(string, tag = "10")]
    pub extra_data: String,
    /// Full-size image bytes, when images were requested
    #[prost(bytes = "vec", tag = "11")]
    pub profile_image: Vec<u8>,
    /// Thumbnail bytes, when images were requested
    #[prost(bytes = "vec", tag = "12")]
    pub thumbnail_image: Vec<u8>,
}

/// First page of profile search results.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ProfileSearchResponse {
    /// Total matching records the server collected
    #[prost(uint32, tag = "1")]
    pub total_record_count: u32,
    /// Maximum records the server returns per page
    #[prost(uint32, tag = "2")]
    pub max_response_record_count: u32,
    /// Network ids of the servers that contributed to the search
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub covered_servers: Vec<Vec<u8>>,
    /// Inline result records
    #[prost(message, repeated, tag = "4")]
    pub profiles: Vec<ProfileQueryInformation>,
}

/// Fetch a further range of a search result.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ProfileSearchPartRequest {
    /// Zero-based index of the first record
    #[prost(uint32, tag = "1")]
    pub record_index: u32,
    /// Number of records to return
    #[prost(uint32, tag = "2")]
    pub record_count: u32,
}

/// A further range of search results.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ProfileSearchPartResponse {
    /// Echoed first-record index
    #[prost(uint32, tag = "1")]
    pub record_index: u32,
    /// Echoed record count
    #[prost(uint32, tag = "2")]
    pub record_count: u32,
    /// The requested records
    #[prost(message, repeated, tag = "3")]
    pub profiles: Vec<ProfileQueryInformation>,
}

impl ProfileMessage {
    /// Wrap a request payload.
    pub fn request(id: u32, signature: Vec<u8>, payload: profile_request::Payload) -> Self {
        Self {
            id,
            body: Some(profile_message::Body::Request(ProfileRequest {
                signature,
                payload: Some(payload),
            })),
        }
    }

    /// Extract the response with the expected id, or fail.
    pub fn into_response(self, expected_id: u32) -> SimResult<ProfileResponse> {
        match self.body {
            Some(profile_message::Body::Response(resp)) if self.id == expected_id => {
                let status = resp.status;
                if status == Status::Ok as i32 {
                    Ok(resp)
                } else {
                    Err(SimError::protocol(format!(
                        "profile server answered status {status}"
                    )))
                }
            }
            Some(profile_message::Body::Response(_)) => Err(SimError::protocol(format!(
                "response id {} does not match request id {expected_id}",
                self.id
            ))),
            _ => Err(SimError::protocol("expected a profile response")),
        }
    }
}
