//! Profile server client driver

use prost::Message;
use rand_chacha::ChaCha12Rng;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use peernet_core::{Identity, ProfileInfo, Server, SimError, SimResult, PROTOCOL_VERSION};
use peernet_proto::conversation::CHALLENGE_LEN;
use peernet_proto::crypto;
use peernet_proto::framing::{decode, read_frame, write_frame, MAX_CLIENT_BODY};
use peernet_proto::profile::{
    profile_message, profile_request, profile_response, CancelHostingAgreementRequest,
    CheckInRequest, HostingPlanContract, ProfileMessage, ProfileQueryInformation,
    ProfileResponse, ProfileSearchPartRequest, ProfileSearchRequest, RegisterHostingRequest,
    UpdateProfileRequest,
};
use peernet_proto::StartConversationRequest;

use crate::context::now_timestamp;

/// Results of a live profile search: the records and the covered servers.
#[derive(Debug, Clone)]
pub struct ProfileSearchOutcome {
    /// All collected result records
    pub profiles: Vec<ProfileQueryInformation>,
    /// Network ids of the servers the search covered
    pub covered_servers: Vec<Vec<u8>>,
}

/// One TLS conversation with a profile server port.
pub struct ProfileClient {
    stream: TlsStream<TcpStream>,
    next_id: u32,
    server_public_key: Option<Vec<u8>>,
    client_challenge: Option<[u8; CHALLENGE_LEN]>,
    server_challenge: Option<[u8; CHALLENGE_LEN]>,
}

impl ProfileClient {
    /// Connect to a profile server port.
    pub async fn connect(port: u16) -> SimResult<Self> {
        Ok(Self {
            stream: super::connect_tls(port).await?,
            next_id: 1,
            server_public_key: None,
            client_challenge: None,
            server_challenge: None,
        })
    }

    /// The server's public key, known after [`Self::start_conversation`].
    pub fn server_public_key(&self) -> Option<&[u8]> {
        self.server_public_key.as_deref()
    }

    /// The challenges of this conversation, client then server.
    pub fn challenges(&self) -> (Option<[u8; CHALLENGE_LEN]>, Option<[u8; CHALLENGE_LEN]>) {
        (self.client_challenge, self.server_challenge)
    }

    async fn exchange(
        &mut self,
        signature: Vec<u8>,
        payload: profile_request::Payload,
    ) -> SimResult<ProfileResponse> {
        let id = self.next_id;
        self.next_id += 1;
        let message = ProfileMessage::request(id, signature, payload);
        write_frame(&mut self.stream, &message, MAX_CLIENT_BODY).await?;
        let body = read_frame(&mut self.stream, MAX_CLIENT_BODY)
            .await?
            .ok_or_else(|| SimError::protocol("profile server closed mid-exchange"))?;
        let reply: ProfileMessage = decode(&body)?;
        reply.into_response(id)
    }

    /// Open the conversation: fresh challenge out, server key and challenge
    /// back, server signature over our challenge verified.
    pub async fn start_conversation(
        &mut self,
        public_key: Vec<u8>,
        rng: &mut ChaCha12Rng,
    ) -> SimResult<()> {
        let challenge = crypto::generate_challenge(rng);
        let response = self
            .exchange(
                Vec::new(),
                profile_request::Payload::StartConversation(StartConversationRequest {
                    version: PROTOCOL_VERSION.to_vec(),
                    public_key,
                    challenge: challenge.to_vec(),
                }),
            )
            .await?;
        let Some(profile_response::Payload::StartConversation(conversation)) = response.payload
        else {
            return Err(SimError::protocol("expected StartConversation response"));
        };
        if conversation.client_challenge != challenge {
            return Err(SimError::protocol(
                "server echoed a different client challenge",
            ));
        }
        if conversation.challenge.len() != CHALLENGE_LEN {
            return Err(SimError::protocol(format!(
                "server challenge has {} bytes, expected {CHALLENGE_LEN}",
                conversation.challenge.len()
            )));
        }
        crypto::verify(&conversation.public_key, &challenge, &response.signature)?;

        self.server_public_key = Some(conversation.public_key);
        self.client_challenge = Some(challenge);
        let server_challenge: [u8; CHALLENGE_LEN] = conversation
            .challenge
            .as_slice()
            .try_into()
            .map_err(|_| SimError::protocol("server challenge size"))?;
        self.server_challenge = Some(server_challenge);
        Ok(())
    }

    /// Register a hosting agreement; the echoed contract must be
    /// byte-identical and carry a valid server signature.
    pub async fn register_hosting(&mut self, identity: &Identity, start_time: i64) -> SimResult<()> {
        let contract = HostingPlanContract {
            plan_id: Vec::new(),
            identity_public_key: identity.public_key_bytes(),
            start_time,
            identity_type: identity.primary_profile.profile_type.clone(),
        };
        let contract_bytes = contract.encode_to_vec();
        let signature = crypto::sign(&identity.signing_key, &contract_bytes);
        let response = self
            .exchange(
                signature,
                profile_request::Payload::RegisterHosting(RegisterHostingRequest {
                    contract: Some(contract),
                }),
            )
            .await?;
        let Some(profile_response::Payload::RegisterHosting(hosting)) = response.payload else {
            return Err(SimError::protocol("expected RegisterHosting response"));
        };
        let echoed = hosting
            .contract
            .ok_or_else(|| SimError::protocol("hosting response without contract"))?;
        if echoed.encode_to_vec() != contract_bytes {
            return Err(SimError::protocol("server mutated the hosting contract"));
        }
        let server_key = self
            .server_public_key
            .as_ref()
            .ok_or_else(|| SimError::protocol("conversation not started"))?;
        crypto::verify(server_key, &contract_bytes, &response.signature)?;
        Ok(())
    }

    /// Check in on the customer port, proving possession of the identity
    /// key by signing the server challenge.
    pub async fn check_in(&mut self, identity: &Identity) -> SimResult<()> {
        let challenge = self
            .server_challenge
            .ok_or_else(|| SimError::protocol("conversation not started"))?;
        let signature = crypto::sign(&identity.signing_key, &challenge);
        self.exchange(
            signature,
            profile_request::Payload::CheckIn(CheckInRequest {
                challenge: challenge.to_vec(),
            }),
        )
        .await?;
        Ok(())
    }

    /// Upload the profile fields and images.
    pub async fn update_profile(&mut self, identity: &Identity, profile: &ProfileInfo) -> SimResult<()> {
        let wire_profile = peernet_proto::profile::ProfileInformation::from(profile);
        let signature = crypto::sign(&identity.signing_key, &wire_profile.encode_to_vec());
        self.exchange(
            signature,
            profile_request::Payload::UpdateProfile(UpdateProfileRequest {
                profile: Some(wire_profile),
                profile_image: profile
                    .profile_image
                    .as_ref()
                    .map(|i| i.bytes().to_vec())
                    .unwrap_or_default(),
                thumbnail_image: profile
                    .thumbnail_image
                    .as_ref()
                    .map(|i| i.bytes().to_vec())
                    .unwrap_or_default(),
            }),
        )
        .await?;
        Ok(())
    }

    /// Cancel the checked-in identity's hosting agreement.
    pub async fn cancel_hosting(&mut self) -> SimResult<()> {
        self.exchange(
            Vec::new(),
            profile_request::Payload::CancelHostingAgreement(CancelHostingAgreementRequest {}),
        )
        .await?;
        Ok(())
    }

    /// Run a profile search, fetching further parts until the result vector
    /// matches the reported total.
    pub async fn search(&mut self, request: ProfileSearchRequest) -> SimResult<ProfileSearchOutcome> {
        let response = self
            .exchange(Vec::new(), profile_request::Payload::ProfileSearch(request))
            .await?;
        let Some(profile_response::Payload::ProfileSearch(search)) = response.payload else {
            return Err(SimError::protocol("expected ProfileSearch response"));
        };
        let total = search.total_record_count as usize;
        let page = search.max_response_record_count.max(1);
        let covered_servers = search.covered_servers;
        let mut profiles = search.profiles;

        while profiles.len() < total {
            let record_index = profiles.len() as u32;
            let record_count = page.min((total - profiles.len()) as u32);
            let response = self
                .exchange(
                    Vec::new(),
                    profile_request::Payload::ProfileSearchPart(ProfileSearchPartRequest {
                        record_index,
                        record_count,
                    }),
                )
                .await?;
            let Some(profile_response::Payload::ProfileSearchPart(part)) = response.payload else {
                return Err(SimError::protocol("expected ProfileSearchPart response"));
            };
            if part.profiles.is_empty() {
                return Err(SimError::protocol(format!(
                    "search part at {record_index} returned no records ({} of {total} collected)",
                    profiles.len()
                )));
            }
            profiles.extend(part.profiles);
        }
        if profiles.len() != total {
            return Err(SimError::protocol(format!(
                "search returned {} records, server reported {total}",
                profiles.len()
            )));
        }
        debug!(total, covered = covered_servers.len(), "profile search complete");
        Ok(ProfileSearchOutcome {
            profiles,
            covered_servers,
        })
    }
}

/// Run the full hosting flow for a fresh identity: registration on the
/// non-customer port, then check-in and profile upload on the customer
/// port. Updates the identity's flags and session bookkeeping.
pub async fn host_identity(
    identity: &mut Identity,
    server: &Server,
    rng: &mut ChaCha12Rng,
) -> SimResult<()> {
    let mut client = ProfileClient::connect(server.client_non_customer_port()).await?;
    client
        .start_conversation(identity.public_key_bytes(), rng)
        .await?;
    client.register_hosting(identity, now_timestamp()).await?;

    let mut client = ProfileClient::connect(server.client_customer_port()).await?;
    client
        .start_conversation(identity.public_key_bytes(), rng)
        .await?;
    client.check_in(identity).await?;
    client.update_profile(identity, &identity.primary_profile.clone()).await?;

    identity.session.server_public_key = client.server_public_key.clone();
    identity.session.client_challenge = client.client_challenge;
    identity.session.server_challenge = client.server_challenge;
    identity.profile_initialized = true;
    identity.hosting_active = true;
    Ok(())
}

/// Cancel an identity's hosting agreement via customer-port check-in.
pub async fn cancel_identity_hosting(
    identity: &mut Identity,
    server: &Server,
    rng: &mut ChaCha12Rng,
) -> SimResult<()> {
    let mut client = ProfileClient::connect(server.client_customer_port()).await?;
    client
        .start_conversation(identity.public_key_bytes(), rng)
        .await?;
    client.check_in(identity).await?;
    client.cancel_hosting().await?;

    identity.session.server_public_key = client.server_public_key.clone();
    identity.session.client_challenge = client.client_challenge;
    identity.session.server_challenge = client.server_challenge;
    identity.hosting_active = false;
    Ok(())
}
