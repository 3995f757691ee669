//! LOC discovery protocol messages
//!
//! The child server processes speak this protocol to their simulated LOC
//! server: they register their service, fetch their neighborhood, and (with
//! keep-alive) receive unsolicited neighborhood-change notifications.

use peernet_core::{GpsLocation, NetworkId, Server, ServerKind};

/// Message id of the single error response sent on a protocol violation.
pub const PROTOCOL_VIOLATION_ID: u32 = 0x0BAD_C0DE;

/// LOC response status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum LocStatus {
    /// Success
    Ok = 0,
    /// Malformed frame, unknown message id, or invalid request subtype
    ErrorProtocolViolation = 1,
    /// A request field failed validation
    ErrorInvalidValue = 2,
    /// The LOC server could not process an otherwise valid request
    ErrorInternal = 3,
}

/// Kind of a registered service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ServiceType {
    /// Profile server
    Profile = 0,
    /// Proximity server
    Proximity = 1,
}

impl From<ServerKind> for ServiceType {
    fn from(kind: ServerKind) -> Self {
        match kind {
            ServerKind::Profile => Self::Profile,
            ServerKind::Proximity => Self::Proximity,
        }
    }
}

/// Envelope of every LOC frame.
#[derive(Clone, PartialEq, prost::Message)]
pub struct LocMessage {
    /// Correlates responses to requests; notifications allocate fresh ids
    #[prost(uint32, tag = "1")]
    pub id: u32,
    /// Request or response body
    #[prost(oneof = "loc_message::Body", tags = "2, 3")]
    pub body: Option<loc_message::Body>,
}

/// Oneof body of [`LocMessage`].
pub mod loc_message {
    /// Request or response.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        /// A request (client-to-server, or server-to-client notification)
        #[prost(message, tag = "2")]
        Request(super::LocRequest),
        /// A response
        #[prost(message, tag = "3")]
        Response(super::LocResponse),
    }
}

/// A LOC request.
#[derive(Clone, PartialEq, prost::Message)]
pub struct LocRequest {
    /// The operation
    #[prost(oneof = "loc_request::Payload", tags = "1, 2, 3, 4")]
    pub payload: Option<loc_request::Payload>,
}

/// Oneof payload of [`LocRequest`].
pub mod loc_request {
    /// The request operation.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        /// Child announces its service
        #[prost(message, tag = "1")]
        RegisterService(super::RegisterServiceRequest),
        /// Child withdraws its service
        #[prost(message, tag = "2")]
        DeregisterService(super::DeregisterServiceRequest),
        /// Child fetches its neighborhood
        #[prost(message, tag = "3")]
        GetNeighbourNodes(super::GetNeighbourNodesRequest),
        /// Server-to-client: the neighborhood changed
        #[prost(message, tag = "4")]
        NeighbourhoodChanged(super::NeighbourhoodChangedNotification),
    }
}

/// A LOC response.
#[derive(Clone, PartialEq, prost::Message)]
pub struct LocResponse {
    /// Outcome status
    #[prost(enumeration = "LocStatus", tag = "1")]
    pub status: i32,
    /// Response payload on success
    #[prost(oneof = "loc_response::Payload", tags = "2, 3, 4, 5")]
    pub payload: Option<loc_response::Payload>,
}

/// Oneof payload of [`LocResponse`].
pub mod loc_response {
    /// The response payload.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        /// Registration accepted
        #[prost(message, tag = "2")]
        RegisterService(super::RegisterServiceResponse),
        /// Deregistration accepted
        #[prost(message, tag = "3")]
        DeregisterService(super::DeregisterServiceResponse),
        /// Neighborhood snapshot
        #[prost(message, tag = "4")]
        GetNeighbourNodes(super::GetNeighbourNodesResponse),
        /// Client acknowledges a change notification
        #[prost(message, tag = "5")]
        NeighbourhoodUpdated(super::NeighbourhoodUpdatedResponse),
    }
}

/// Service descriptor sent by the child on registration.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ServiceInfo {
    /// Profile or proximity
    #[prost(enumeration = "ServiceType", tag = "1")]
    pub service_type: i32,
    /// The service's primary port
    #[prost(uint32, tag = "2")]
    pub port: u32,
    /// Opaque service data; the 32-byte network id
    #[prost(bytes = "vec", tag = "3")]
    pub service_data: Vec<u8>,
}

/// Child announces itself.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RegisterServiceRequest {
    /// The service being registered
    #[prost(message, optional, tag = "1")]
    pub service: Option<ServiceInfo>,
}

/// Registration accepted; carries the owner's GPS location.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RegisterServiceResponse {
    /// Owner latitude in micro-degrees
    #[prost(sint32, tag = "1")]
    pub latitude: i32,
    /// Owner longitude in micro-degrees
    #[prost(sint32, tag = "2")]
    pub longitude: i32,
}

/// Child withdraws its registration.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DeregisterServiceRequest {
    /// The service type being withdrawn
    #[prost(enumeration = "ServiceType", tag = "1")]
    pub service_type: i32,
}

/// Deregistration accepted.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DeregisterServiceResponse {}

/// Child fetches its neighborhood.
#[derive(Clone, PartialEq, prost::Message)]
pub struct GetNeighbourNodesRequest {
    /// Keep the stream and deliver later changes as notifications
    #[prost(bool, tag = "1")]
    pub keep_alive: bool,
}

/// Snapshot of the current neighborhood.
#[derive(Clone, PartialEq, prost::Message)]
pub struct GetNeighbourNodesResponse {
    /// One entry per neighbor
    #[prost(message, repeated, tag = "1")]
    pub nodes: Vec<NodeInfo>,
}

/// How to reach a neighbor's LOC endpoint.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NodeContact {
    /// IP address octets
    #[prost(bytes = "vec", tag = "1")]
    pub ip_address: Vec<u8>,
    /// The neighbor's LOC port
    #[prost(uint32, tag = "2")]
    pub loc_port: u32,
}

/// A neighbor's node descriptor.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NodeInfo {
    /// Contact of the neighbor's LOC endpoint
    #[prost(message, optional, tag = "1")]
    pub contact: Option<NodeContact>,
    /// Profile or proximity
    #[prost(enumeration = "ServiceType", tag = "2")]
    pub service_type: i32,
    /// The neighbor's primary port
    #[prost(uint32, tag = "3")]
    pub primary_port: u32,
    /// The neighbor's 32-byte network id
    #[prost(bytes = "vec", tag = "4")]
    pub network_id: Vec<u8>,
    /// Neighbor latitude in micro-degrees
    #[prost(sint32, tag = "5")]
    pub latitude: i32,
    /// Neighbor longitude in micro-degrees
    #[prost(sint32, tag = "6")]
    pub longitude: i32,
}

impl NodeInfo {
    /// Build the descriptor of a managed server with its assigned id.
    pub fn for_server(server: &Server, network_id: NetworkId) -> Self {
        let contact = server.contact();
        let location = server.location();
        Self {
            contact: Some(NodeContact {
                ip_address: match contact.ip {
                    std::net::IpAddr::V4(v4) => v4.octets().to_vec(),
                    std::net::IpAddr::V6(v6) => v6.octets().to_vec(),
                },
                loc_port: u32::from(server.loc_port()),
            }),
            service_type: ServiceType::from(server.kind()) as i32,
            primary_port: u32::from(server.primary_port()),
            network_id: network_id.to_vec(),
            latitude: location.latitude_micro(),
            longitude: location.longitude_micro(),
        }
    }
}

/// One element of a neighborhood-change notification.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NeighbourhoodChange {
    /// Added or removed
    #[prost(oneof = "neighbourhood_change::Change", tags = "1, 2")]
    pub change: Option<neighbourhood_change::Change>,
}

/// Oneof change of [`NeighbourhoodChange`].
pub mod neighbourhood_change {
    /// Added or removed peer.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Change {
        /// A peer joined the neighborhood
        #[prost(message, tag = "1")]
        AddedNodeInfo(super::NodeInfo),
        /// A peer left; identified by its network id
        #[prost(bytes = "vec", tag = "2")]
        RemovedNodeId(Vec<u8>),
    }
}

/// Unsolicited server-to-client notification of neighborhood changes.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NeighbourhoodChangedNotification {
    /// Accumulated changes, in occurrence order
    #[prost(message, repeated, tag = "1")]
    pub changes: Vec<NeighbourhoodChange>,
}

/// Client acknowledgment of a change notification.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NeighbourhoodUpdatedResponse {}

impl LocMessage {
    /// Wrap a request payload.
    pub fn request(id: u32, payload: loc_request::Payload) -> Self {
        Self {
            id,
            body: Some(loc_message::Body::Request(LocRequest {
                payload: Some(payload),
            })),
        }
    }

    /// Wrap a response payload.
    pub fn response(id: u32, status: LocStatus, payload: Option<loc_response::Payload>) -> Self {
        Self {
            id,
            body: Some(loc_message::Body::Response(LocResponse {
                status: status as i32,
                payload,
            })),
        }
    }

    /// The single error response sent on any protocol violation.
    pub fn protocol_violation() -> Self {
        Self::response(
            PROTOCOL_VIOLATION_ID,
            LocStatus::ErrorProtocolViolation,
            None,
        )
    }
}

/// Build a register-service response carrying the owner's location.
pub fn register_response(id: u32, location: GpsLocation) -> LocMessage {
    LocMessage::response(
        id,
        LocStatus::Ok,
        Some(loc_response::Payload::RegisterService(
            RegisterServiceResponse {
                latitude: location.latitude_micro(),
                longitude: location.longitude_micro(),
            },
        )),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn violation_response_carries_the_sentinel_id() {
        let msg = LocMessage::protocol_violation();
        assert_eq!(msg.id, 0x0BAD_C0DE);
        match msg.body {
            Some(loc_message::Body::Response(resp)) => {
                assert_eq!(resp.status, LocStatus::ErrorProtocolViolation as i32);
                assert!(resp.payload.is_none());
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn envelope_roundtrips_through_prost() {
        let msg = LocMessage::request(
            7,
            loc_request::Payload::GetNeighbourNodes(GetNeighbourNodesRequest { keep_alive: true }),
        );
        let decoded = LocMessage::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, msg);
    }
}
