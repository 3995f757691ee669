//! Proximity server client driver

use rand_chacha::ChaCha12Rng;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use peernet_core::{ActivityInfo, Identity, Server, SimError, SimResult, PROTOCOL_VERSION};
use peernet_proto::conversation::CHALLENGE_LEN;
use peernet_proto::crypto;
use peernet_proto::framing::{decode, read_frame, write_frame, MAX_CLIENT_BODY};
use peernet_proto::proximity::{
    proximity_message, proximity_request, proximity_response, ActivityInformation,
    ActivityQueryInformation, ActivitySearchPartRequest, ActivitySearchRequest,
    CreateActivityRequest, DeleteActivityRequest, ProximityMessage, ProximityResponse,
    SignedActivityInformation, VerifyIdentityRequest,
};
use peernet_proto::StartConversationRequest;

/// Results of a live activity search: the records and the covered servers.
#[derive(Debug, Clone)]
pub struct ActivitySearchOutcome {
    /// All collected result records
    pub activities: Vec<ActivityQueryInformation>,
    /// Network ids of the servers the search covered
    pub covered_servers: Vec<Vec<u8>>,
}

/// One TLS conversation with a proximity server's client port.
pub struct ProximityClient {
    stream: TlsStream<TcpStream>,
    next_id: u32,
    server_public_key: Option<Vec<u8>>,
    server_challenge: Option<[u8; CHALLENGE_LEN]>,
}

impl ProximityClient {
    /// Connect to a proximity server's client port.
    pub async fn connect(port: u16) -> SimResult<Self> {
        Ok(Self {
            stream: super::connect_tls(port).await?,
            next_id: 1,
            server_public_key: None,
            server_challenge: None,
        })
    }

    async fn exchange(
        &mut self,
        signature: Vec<u8>,
        payload: proximity_request::Payload,
    ) -> SimResult<ProximityResponse> {
        let id = self.next_id;
        self.next_id += 1;
        let message = ProximityMessage::request(id, signature, payload);
        write_frame(&mut self.stream, &message, MAX_CLIENT_BODY).await?;
        let body = read_frame(&mut self.stream, MAX_CLIENT_BODY)
            .await?
            .ok_or_else(|| SimError::protocol("proximity server closed mid-exchange"))?;
        let reply: ProximityMessage = decode(&body)?;
        reply.into_response(id)
    }

    /// Open the conversation and verify the server signed our challenge.
    pub async fn start_conversation(
        &mut self,
        public_key: Vec<u8>,
        rng: &mut ChaCha12Rng,
    ) -> SimResult<()> {
        let challenge = crypto::generate_challenge(rng);
        let response = self
            .exchange(
                Vec::new(),
                proximity_request::Payload::StartConversation(StartConversationRequest {
                    version: PROTOCOL_VERSION.to_vec(),
                    public_key,
                    challenge: challenge.to_vec(),
                }),
            )
            .await?;
        let Some(proximity_response::Payload::StartConversation(conversation)) = response.payload
        else {
            return Err(SimError::protocol("expected StartConversation response"));
        };
        if conversation.client_challenge != challenge {
            return Err(SimError::protocol(
                "server echoed a different client challenge",
            ));
        }
        crypto::verify(&conversation.public_key, &challenge, &response.signature)?;

        self.server_public_key = Some(conversation.public_key);
        self.server_challenge = Some(
            conversation
                .challenge
                .as_slice()
                .try_into()
                .map_err(|_| SimError::protocol("server challenge size"))?,
        );
        Ok(())
    }

    /// Prove possession of the identity key by signing the server challenge.
    pub async fn verify_identity(&mut self, identity: &Identity) -> SimResult<()> {
        let challenge = self
            .server_challenge
            .ok_or_else(|| SimError::protocol("conversation not started"))?;
        let signature = crypto::sign(&identity.signing_key, &challenge);
        self.exchange(
            signature,
            proximity_request::Payload::VerifyIdentity(VerifyIdentityRequest {
                challenge: challenge.to_vec(),
            }),
        )
        .await?;
        Ok(())
    }

    /// Create one signed activity.
    pub async fn create_activity(
        &mut self,
        info: &ActivityInfo,
        signature: Vec<u8>,
        ignored_servers: Vec<Vec<u8>>,
    ) -> SimResult<()> {
        self.exchange(
            Vec::new(),
            proximity_request::Payload::CreateActivity(CreateActivityRequest {
                activity: Some(SignedActivityInformation {
                    activity: Some(ActivityInformation::from(info)),
                    signature,
                }),
                ignored_servers,
            }),
        )
        .await?;
        Ok(())
    }

    /// Delete an activity owned by the verified identity.
    pub async fn delete_activity(&mut self, id: u32) -> SimResult<()> {
        self.exchange(
            Vec::new(),
            proximity_request::Payload::DeleteActivity(DeleteActivityRequest { id }),
        )
        .await?;
        Ok(())
    }

    /// Run an activity search, fetching further parts until the result
    /// vector matches the reported total.
    pub async fn search(
        &mut self,
        request: ActivitySearchRequest,
    ) -> SimResult<ActivitySearchOutcome> {
        let response = self
            .exchange(
                Vec::new(),
                proximity_request::Payload::ActivitySearch(request),
            )
            .await?;
        let Some(proximity_response::Payload::ActivitySearch(search)) = response.payload else {
            return Err(SimError::protocol("expected ActivitySearch response"));
        };
        let total = search.total_record_count as usize;
        let page = search.max_response_record_count.max(1);
        let covered_servers = search.covered_servers;
        let mut activities = search.activities;

        while activities.len() < total {
            let record_index = activities.len() as u32;
            let record_count = page.min((total - activities.len()) as u32);
            let response = self
                .exchange(
                    Vec::new(),
                    proximity_request::Payload::ActivitySearchPart(ActivitySearchPartRequest {
                        record_index,
                        record_count,
                    }),
                )
                .await?;
            let Some(proximity_response::Payload::ActivitySearchPart(part)) = response.payload
            else {
                return Err(SimError::protocol("expected ActivitySearchPart response"));
            };
            if part.activities.is_empty() {
                return Err(SimError::protocol(format!(
                    "search part at {record_index} returned no records ({} of {total} collected)",
                    activities.len()
                )));
            }
            activities.extend(part.activities);
        }
        if activities.len() != total {
            return Err(SimError::protocol(format!(
                "search returned {} records, server reported {total}",
                activities.len()
            )));
        }
        debug!(total, covered = covered_servers.len(), "activity search complete");
        Ok(ActivitySearchOutcome {
            activities,
            covered_servers,
        })
    }
}

/// Submit a batch of signed activities owned by one identity to its primary
/// proximity server, inside a single verified conversation.
pub async fn create_activities(
    identity: &Identity,
    server: &Server,
    batch: &[(ActivityInfo, Vec<u8>)],
    rng: &mut ChaCha12Rng,
) -> SimResult<()> {
    let mut client = ProximityClient::connect(server.client_port()).await?;
    client
        .start_conversation(identity.public_key_bytes(), rng)
        .await?;
    client.verify_identity(identity).await?;
    for (info, signature) in batch {
        client
            .create_activity(info, signature.clone(), Vec::new())
            .await?;
    }
    Ok(())
}

/// Delete one activity via a verified conversation with its primary server.
pub async fn delete_activity(
    identity: &Identity,
    server: &Server,
    id: u32,
    rng: &mut ChaCha12Rng,
) -> SimResult<()> {
    let mut client = ProximityClient::connect(server.client_port()).await?;
    client
        .start_conversation(identity.public_key_bytes(), rng)
        .await?;
    client.verify_identity(identity).await?;
    client.delete_activity(id).await
}
