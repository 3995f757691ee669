//! Proximity server client protocol messages

use std::net::IpAddr;

use peernet_core::{
    ActivityInfo, GpsLocation, IdentityId, ServerContact, SimError, SimResult,
};

use crate::conversation::{StartConversationRequest, StartConversationResponse, Status};

/// Sentinel for an unfiltered time field.
pub const ANY_TIME: i64 = i64::MIN;

/// Envelope of every proximity-protocol frame.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ProximityMessage {
    /// Correlates responses to requests
    #[prost(uint32, tag = "1")]
    pub id: u32,
    /// Request or response body
    #[prost(oneof = "proximity_message::Body", tags = "2, 3")]
    pub body: Option<proximity_message::Body>,
}

/// Oneof body of [`ProximityMessage`].
pub mod proximity_message {
    /// Request or response.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        /// Client-to-server request
        #[prost(message, tag = "2")]
        Request(super::ProximityRequest),
        /// Server-to-client response
        #[prost(message, tag = "3")]
        Response(super::ProximityResponse),
    }
}

/// A proximity-protocol request.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ProximityRequest {
    /// Client signature over the encoded payload, or empty
    #[prost(bytes = "vec", tag = "1")]
    pub signature: Vec<u8>,
    /// The operation
    #[prost(oneof = "proximity_request::Payload", tags = "2, 3, 4, 5, 6, 7")]
    pub payload: Option<proximity_request::Payload>,
}

/// Oneof payload of [`ProximityRequest`].
pub mod proximity_request {
    /// The request operation.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        /// Open a conversation
        #[prost(message, tag = "2")]
        StartConversation(super::StartConversationRequest),
        /// Prove possession of the identity key
        #[prost(message, tag = "3")]
        VerifyIdentity(super::VerifyIdentityRequest),
        /// Create an activity
        #[prost(message, tag = "4")]
        CreateActivity(super::CreateActivityRequest),
        /// Delete an activity
        #[prost(message, tag = "5")]
        DeleteActivity(super::DeleteActivityRequest),
        /// Search activities
        #[prost(message, tag = "6")]
        ActivitySearch(super::ActivitySearchRequest),
        /// Fetch a further part of a search result
        #[prost(message, tag = "7")]
        ActivitySearchPart(super::ActivitySearchPartRequest),
    }
}

/// A proximity-protocol response.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ProximityResponse {
    /// Outcome status
    #[prost(enumeration = "Status", tag = "1")]
    pub status: i32,
    /// Server signature over the proven bytes, or empty
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
    /// Response payload on success
    #[prost(oneof = "proximity_response::Payload", tags = "3, 4, 5, 6, 7, 8")]
    pub payload: Option<proximity_response::Payload>,
}

/// Oneof payload of [`ProximityResponse`].
pub mod proximity_response {
    /// The response payload.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        /// Conversation accepted
        #[prost(message, tag = "3")]
        StartConversation(super::StartConversationResponse),
        /// Identity verified
        #[prost(message, tag = "4")]
        VerifyIdentity(super::VerifyIdentityResponse),
        /// Activity created
        #[prost(message, tag = "5")]
        CreateActivity(super::CreateActivityResponse),
        /// Activity deleted
        #[prost(message, tag = "6")]
        DeleteActivity(super::DeleteActivityResponse),
        /// First page of search results
        #[prost(message, tag = "7")]
        ActivitySearch(super::ActivitySearchResponse),
        /// Further page of search results
        #[prost(message, tag = "8")]
        ActivitySearchPart(super::ActivitySearchPartResponse),
    }
}

/// Prove possession of the identity key by signing the server challenge.
#[derive(Clone, PartialEq, prost::Message)]
pub struct VerifyIdentityRequest {
    /// The server challenge from StartConversation
    #[prost(bytes = "vec", tag = "1")]
    pub challenge: Vec<u8>,
}

/// Identity verified.
#[derive(Clone, PartialEq, prost::Message)]
pub struct VerifyIdentityResponse {}

/// Activity metadata as it travels on the wire. The owner signature covers
/// the encoding of exactly this structure.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ActivityInformation {
    /// Protocol version triple
    #[prost(bytes = "vec", tag = "1")]
    pub version: Vec<u8>,
    /// Activity id, unique within its type
    #[prost(uint32, tag = "2")]
    pub id: u32,
    /// SHA-256 id of the owning identity
    #[prost(bytes = "vec", tag = "3")]
    pub owner_identity_id: Vec<u8>,
    /// The owner's Ed25519 public key
    #[prost(bytes = "vec", tag = "4")]
    pub owner_public_key: Vec<u8>,
    /// IP octets of the owner's profile server
    #[prost(bytes = "vec", tag = "5")]
    pub owner_profile_server_ip: Vec<u8>,
    /// Primary port of the owner's profile server
    #[prost(uint32, tag = "6")]
    pub owner_profile_server_port: u32,
    /// Activity type string
    #[prost(string, tag = "7")]
    pub activity_type: String,
    /// Latitude in micro-degrees
    #[prost(sint32, tag = "8")]
    pub latitude: i32,
    /// Longitude in micro-degrees
    #[prost(sint32, tag = "9")]
    pub longitude: i32,
    /// Location precision radius in metres
    #[prost(uint32, tag = "10")]
    pub precision: u32,
    /// Start time, seconds since the Unix epoch
    #[prost(int64, tag = "11")]
    pub start_time: i64,
    /// Expiration time, seconds since the Unix epoch
    #[prost(int64, tag = "12")]
    pub expiration_time: i64,
    /// Free-form extra data
    #[prost(string, tag = "13")]
    pub extra_data: String,
}

impl From<&ActivityInfo> for ActivityInformation {
    fn from(info: &ActivityInfo) -> Self {
        Self {
            version: info.version.to_vec(),
            id: info.id,
            owner_identity_id: info.owner_identity_id.to_vec(),
            owner_public_key: info.owner_public_key.clone(),
            owner_profile_server_ip: match info.owner_profile_server.ip {
                IpAddr::V4(v4) => v4.octets().to_vec(),
                IpAddr::V6(v6) => v6.octets().to_vec(),
            },
            owner_profile_server_port: u32::from(info.owner_profile_server.primary_port),
            activity_type: info.activity_type.clone(),
            latitude: info.location.latitude_micro(),
            longitude: info.location.longitude_micro(),
            precision: info.precision,
            start_time: info.start_time,
            expiration_time: info.expiration_time,
            extra_data: info.extra_data.clone(),
        }
    }
}

impl ActivityInformation {
    /// Convert back to the domain structure.
    pub fn to_info(&self) -> SimResult<ActivityInfo> {
        let version: [u8; 3] = self
            .version
            .as_slice()
            .try_into()
            .map_err(|_| SimError::protocol("activity version must be 3 bytes"))?;
        let ip = match self.owner_profile_server_ip.len() {
            4 => {
                let octets: [u8; 4] = self.owner_profile_server_ip.as_slice().try_into()
                    .map_err(|_| SimError::protocol("bad IPv4 octets"))?;
                IpAddr::from(octets)
            }
            16 => {
                let octets: [u8; 16] = self.owner_profile_server_ip.as_slice().try_into()
                    .map_err(|_| SimError::protocol("bad IPv6 octets"))?;
                IpAddr::from(octets)
            }
            n => {
                return Err(SimError::protocol(format!(
                    "profile-server IP must be 4 or 16 octets, got {n}"
                )))
            }
        };
        let primary_port = u16::try_from(self.owner_profile_server_port)
            .map_err(|_| SimError::protocol("profile-server port out of range"))?;
        Ok(ActivityInfo {
            version,
            id: self.id,
            owner_identity_id: IdentityId::from_slice(&self.owner_identity_id)
                .map_err(|e| SimError::protocol(e.to_string()))?,
            owner_public_key: self.owner_public_key.clone(),
            owner_profile_server: ServerContact { ip, primary_port },
            activity_type: self.activity_type.clone(),
            location: GpsLocation::from_micro(self.latitude, self.longitude),
            precision: self.precision,
            start_time: self.start_time,
            expiration_time: self.expiration_time,
            extra_data: self.extra_data.clone(),
        })
    }
}

/// Activity metadata plus the owner's signature over its encoding.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SignedActivityInformation {
    /// The signed metadata
    #[prost(message, optional, tag = "1")]
    pub activity: Option<ActivityInformation>,
    /// Owner's Ed25519 signature over the encoded metadata
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

/// Create an activity on its primary server.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateActivityRequest {
    /// The signed activity
    #[prost(message, optional, tag = "1")]
    pub activity: Option<SignedActivityInformation>,
    /// Network ids of neighbors the server must not propagate to
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub ignored_servers: Vec<Vec<u8>>,
}

/// Activity created.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateActivityResponse {}

/// Delete an activity owned by the verified identity.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DeleteActivityRequest {
    /// Activity id
    #[prost(uint32, tag = "1")]
    pub id: u32,
}

/// Activity deleted.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DeleteActivityResponse {}

/// Search primary and neighbor activities.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ActivitySearchRequest {
    /// Only activities whose primary server is the queried one
    #[prost(bool, tag = "1")]
    pub include_primary_only: bool,
    /// Type wildcard filter; `**` disables
    #[prost(string, tag = "2")]
    pub type_filter: String,
    /// Activities must start at or before this time; [`ANY_TIME`] disables
    #[prost(int64, tag = "3")]
    pub start_not_after: i64,
    /// Activities must expire at or after this time; [`ANY_TIME`] disables
    #[prost(int64, tag = "4")]
    pub expiration_not_before: i64,
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

/// One activity search result.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ActivityQueryInformation {
    /// Result's primary server is the queried one
    #[prost(bool, tag = "1")]
    pub is_primary: bool,
    /// IP octets of the primary server, for non-primary results
    #[prost(bytes = "vec", tag = "2")]
    pub primary_server_ip: Vec<u8>,
    /// Primary port of the primary server, for non-primary results
    #[prost(uint32, tag = "3")]
    pub primary_server_port: u32,
    /// The signed activity
    #[prost(message, optional, tag = "4")]
    pub activity: Option<SignedActivityInformation>,
}

/// First page of activity search results.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ActivitySearchResponse {
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
    pub activities: Vec<ActivityQueryInformation>,
}

/// Fetch a further range of a search result.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ActivitySearchPartRequest {
    /// Zero-based index of the first record
    #[prost(uint32, tag = "1")]
    pub record_index: u32,
    /// Number of records to return
    #[prost(uint32, tag = "2")]
    pub record_count: u32,
}

/// A further range of search results.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ActivitySearchPartResponse {
    /// Echoed first-record index
    #[prost(uint32, tag = "1")]
    pub record_index: u32,
    /// Echoed record count
    #[prost(uint32, tag = "2")]
    pub record_count: u32,
    /// The requested records
    #[prost(message, repeated, tag = "3")]
    pub activities: Vec<ActivityQueryInformation>,
}

impl ProximityMessage {
    /// Wrap a request payload.
    pub fn request(id: u32, signature: Vec<u8>, payload: proximity_request::Payload) -> Self {
        Self {
            id,
            body: Some(proximity_message::Body::Request(ProximityRequest {
                signature,
                payload: Some(payload),
            })),
        }
    }

    /// Extract the response with the expected id, or fail.
    pub fn into_response(self, expected_id: u32) -> SimResult<ProximityResponse> {
        match self.body {
            Some(proximity_message::Body::Response(resp)) if self.id == expected_id => {
                let status = resp.status;
                if status == Status::Ok as i32 {
                    Ok(resp)
                } else {
                    Err(SimError::protocol(format!(
                        "proximity server answered status {status}"
                    )))
                }
            }
            Some(proximity_message::Body::Response(_)) => Err(SimError::protocol(format!(
                "response id {} does not match request id {expected_id}",
                self.id
            ))),
            _ => Err(SimError::protocol("expected a proximity response")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peernet_core::activity::activity_info;
    use std::net::Ipv4Addr;

    #[test]
    fn activity_information_roundtrips() {
        let info = activity_info(
            3,
            IdentityId::new([5; 32]),
            vec![6; 32],
            ServerContact {
                ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                primary_port: 10_001,
            },
            "Run",
            GpsLocation::new(10.123456, 20.654321).unwrap(),
            250,
            -3_600,
            7_200,
        );
        let wire = ActivityInformation::from(&info);
        let back = wire.to_info().unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn bad_ip_length_is_rejected() {
        let info = activity_info(
            3,
            IdentityId::new([5; 32]),
            vec![6; 32],
            ServerContact {
                ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                primary_port: 10_001,
            },
            "Run",
            GpsLocation::new(0.0, 0.0).unwrap(),
            0,
            0,
            10,
        );
        let mut wire = ActivityInformation::from(&info);
        wire.owner_profile_server_ip = vec![1, 2, 3];
        assert!(wire.to_info().is_err());
    }
}
