use std::sync::Arc;

use rustls::{
    client::danger,
    crypto::{aws_lc_rs, verify_tls12_signature, verify_tls13_signature, CryptoProvider},
    pki_types::{CertificateDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, NamedGroup, RootCertStore, SignatureScheme, SupportedProtocolVersion,
};

use crate::{error::Error, group::KeyExchangeGroup};

/// Groups the TLS provider can actually perform, in no particular order.
pub fn available_groups() -> impl Iterator<Item = KeyExchangeGroup> {
    aws_lc_rs::ALL_KX_GROUPS
        .iter()
        .map(|kx| KeyExchangeGroup::from(kx.name()))
}

/// A crypto provider offering exactly `groups`, in that order. The first
/// group is the one the client sends a key share for.
pub fn provider(groups: &[KeyExchangeGroup]) -> Result<CryptoProvider, Error> {
    let kx_groups = groups
        .iter()
        .map(|group| {
            aws_lc_rs::ALL_KX_GROUPS
                .iter()
                .find(|kx| kx.name() == NamedGroup::from(group.code()))
                .copied()
                .ok_or_else(|| Error::UnsupportedGroup(group.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if kx_groups.is_empty() {
        return Err(Error::UnsupportedGroup(String::from("empty group list")));
    }

    Ok(CryptoProvider {
        kx_groups,
        ..aws_lc_rs::default_provider()
    })
}

pub fn client_config(
    groups: &[KeyExchangeGroup],
    versions: &[&'static SupportedProtocolVersion],
    insecure: bool,
    alpn: &[&[u8]],
) -> Result<ClientConfig, Error> {
    let provider = Arc::new(provider(groups)?);
    let builder = ClientConfig::builder_with_provider(provider.clone()).with_protocol_versions(versions)?;

    let mut config = if insecure {
        builder
            .dangerous()
            .with_custom_certificate_verifier(SkipServerVerification::new(provider))
            .with_no_client_auth()
    } else {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    config.alpn_protocols = alpn.iter().map(|proto| proto.to_vec()).collect();

    Ok(config)
}

/// Accepts any certificate chain but still checks handshake signatures.
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl SkipServerVerification {
    fn new(provider: Arc<CryptoProvider>) -> Arc<Self> {
        Arc::new(Self(provider))
    }
}

impl danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> Result<danger::ServerCertVerified, rustls::Error> {
        Ok(danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<danger::HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<danger::HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
