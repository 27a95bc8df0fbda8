use std::sync::Arc;

use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tokio_rustls::TlsConnector;

use crate::{
    error::Error,
    group::KeyExchangeGroup,
    observer::HandshakeRecorder,
    sniff::RecordSniffer,
};

use super::{tls, Deadline, HandshakeSummary, ProbeFailure, ProbeOptions, ProbeRequest, ProbeResult, Stage, TransportProbe};

/// TLS over TCP, TLS 1.2 and 1.3.
///
/// The connection is wrapped in a [`RecordSniffer`] so that hello retries
/// are seen. EncryptedExtensions is encrypted on this transport, so returned
/// trust anchors are never observed.
pub struct TcpProbe;

#[async_trait]
impl TransportProbe for TcpProbe {
    async fn probe(&self, request: &ProbeRequest, options: &ProbeOptions) -> ProbeResult {
        match handshake(request, options).await {
            Ok(summary) => summary.into(),
            Err(failure) => failure.into(),
        }
    }
}

async fn handshake(request: &ProbeRequest, options: &ProbeOptions) -> Result<HandshakeSummary, ProbeFailure> {
    let deadline = Deadline::after(options.timeout);

    let config = tls::client_config(&request.groups.groups(), rustls::ALL_VERSIONS, request.insecure, &[])
        .map_err(|err| ProbeFailure::new(Stage::Handshake, err))?;

    let addr = deadline.resolve(request).await?;
    let stream = deadline.run(Stage::Dial, TcpStream::connect(addr)).await?;

    let recorder = HandshakeRecorder::new();
    let connector = TlsConnector::from(Arc::new(config));
    let mut tls = deadline
        .run(
            Stage::Handshake,
            connector.connect(request.server_name().clone(), RecordSniffer::new(stream, recorder.clone())),
        )
        .await?;

    let (_, conn) = tls.get_ref();
    let report = recorder.report();

    let group = conn
        .negotiated_key_exchange_group()
        .map(|kx| KeyExchangeGroup::from(kx.name()))
        .or(report.negotiated);

    let leaf_certificate = conn
        .peer_certificates()
        .and_then(|certs| certs.first())
        .map(|cert| cert.to_vec());

    if let Err(err) = deadline.run(Stage::Handshake, tls.shutdown()).await {
        log::debug!("[probe] [{request}] [tcp] failed to shut down: {err}");
    }

    let group = group.ok_or_else(|| ProbeFailure::new(Stage::Handshake, Error::NoGroupNegotiated))?;

    Ok(HandshakeSummary {
        group,
        trust_anchors: report.trust_anchors,
        leaf_certificate,
        hello_retry: Some(report.hello_retry),
    })
}
