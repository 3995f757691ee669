//! Client drivers for the profile and proximity server protocols
//!
//! The simulator connects to its own child processes over TLS and drives
//! the real client-facing protocols to seed identities and activities and
//! to run test queries. Certificate validation is disabled by design: the
//! children present self-signed certificates and the connection never
//! leaves the host. A port of this module must preserve that behavior.

mod profile;
mod proximity;

pub use profile::{cancel_identity_hosting, host_identity, ProfileClient, ProfileSearchOutcome};
pub use proximity::{
    create_activities, delete_activity, ActivitySearchOutcome, ProximityClient,
};

use std::sync::{Arc, OnceLock};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, Error as TlsError, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use peernet_core::{SimError, SimResult, SERVER_IP};

/// Certificate verifier that accepts anything. The simulator talks only to
/// its own children on loopback.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

fn tls_connector() -> &'static TlsConnector {
    static CONNECTOR: OnceLock<TlsConnector> = OnceLock::new();
    CONNECTOR.get_or_init(|| {
        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth();
        TlsConnector::from(Arc::new(config))
    })
}

/// Open a TLS connection to a child server port on loopback.
pub(crate) async fn connect_tls(port: u16) -> SimResult<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect((SERVER_IP, port))
        .await
        .map_err(|e| SimError::io(format!("TCP connect to port {port} failed: {e}")))?;
    let name = ServerName::try_from("127.0.0.1")
        .map_err(|e| SimError::internal(format!("bad server name: {e}")))?
        .to_owned();
    tls_connector()
        .connect(name, tcp)
        .await
        .map_err(|e| SimError::protocol(format!("TLS handshake on port {port} failed: {e}")))
}
