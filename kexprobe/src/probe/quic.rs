use std::{
    any::Any,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    sync::Arc,
};

use async_trait::async_trait;
use quinn::{
    crypto::rustls::QuicClientConfig, ClientConfig, Connection, ConnectionError, Endpoint, EndpointConfig,
    TokioRuntime, VarInt,
};
use quinn_proto::{
    crypto::{self, ClientConfig as _, Session as _},
    transport_parameters::TransportParameters,
    ConnectError, ConnectionId, Side, TransportError,
};
use rustls::pki_types::CertificateDer;

use crate::{
    error::Error,
    observer::{HandshakeObserver, HandshakeReader, HandshakeRecorder},
};

use super::{tls, Deadline, HandshakeSummary, ProbeFailure, ProbeOptions, ProbeRequest, ProbeResult, Stage, TransportProbe};

pub const ALPN_H3: &[u8] = b"h3";
pub const ERROR_CODE: VarInt = VarInt::from_u32(0);

/// TLS 1.3 over QUIC, offering only `h3`.
///
/// Handshake messages travel in plaintext CRYPTO frames from the session's
/// point of view, so everything including EncryptedExtensions is observed.
pub struct QuicProbe;

#[async_trait]
impl TransportProbe for QuicProbe {
    async fn probe(&self, request: &ProbeRequest, options: &ProbeOptions) -> ProbeResult {
        match handshake(request, options).await {
            Ok(summary) => summary.into(),
            Err(failure) => failure.into(),
        }
    }
}

async fn handshake(request: &ProbeRequest, options: &ProbeOptions) -> Result<HandshakeSummary, ProbeFailure> {
    let deadline = Deadline::after(options.timeout);

    let recorder = HandshakeRecorder::new();
    let config = tls::client_config(
        &request.groups.groups(),
        &[&rustls::version::TLS13],
        request.insecure,
        &[ALPN_H3],
    )
    .and_then(|config| ObservedClientConfig::new(config, recorder.clone()))
    .map_err(|err| ProbeFailure::new(Stage::Handshake, err))?;

    let addr = deadline.resolve(request).await?;
    let endpoint = deadline.run(Stage::Listen, async { bind_endpoint(addr) }).await?;

    let server_name = request.server_name().to_str();
    let connecting = deadline
        .run(Stage::Dial, async {
            endpoint.connect_with(ClientConfig::new(Arc::new(config)), addr, &server_name)
        })
        .await?;
    let conn = match deadline.within(connecting).await {
        Ok(Ok(conn)) => conn,
        Ok(Err(err)) => {
            let stage = failed_stage(matches!(err, ConnectionError::TimedOut), &recorder);
            return Err(ProbeFailure::new(stage, err));
        }
        Err(_) => return Err(ProbeFailure::new(failed_stage(true, &recorder), Error::TimedOut)),
    };

    let report = recorder.report();
    let leaf_certificate = leaf_certificate(&conn);

    conn.close(ERROR_CODE, b"");
    drop(endpoint);

    let group = report
        .negotiated
        .ok_or_else(|| ProbeFailure::new(Stage::Handshake, Error::NoGroupNegotiated))?;

    Ok(HandshakeSummary {
        group,
        trust_anchors: report.trust_anchors,
        leaf_certificate,
        hello_retry: Some(report.hello_retry),
    })
}

/// `connect_with` only queues the Initial, so an unreachable peer shows up
/// as a timeout while connecting. It counts as a dial failure as long as
/// no ServerHello came back.
fn failed_stage(timed_out: bool, recorder: &HandshakeRecorder) -> Stage {
    let report = recorder.report();

    if timed_out && report.negotiated.is_none() && !report.hello_retry {
        Stage::Dial
    } else {
        Stage::Handshake
    }
}

fn bind_endpoint(remote: SocketAddr) -> Result<Endpoint, Error> {
    let local = match remote {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    };

    let socket = UdpSocket::bind(local).map_err(|err| Error::Socket("failed to create endpoint UDP socket", err))?;

    Ok(Endpoint::new(
        EndpointConfig::default(),
        None,
        socket,
        Arc::new(TokioRuntime),
    )?)
}

fn leaf_certificate(conn: &Connection) -> Option<Vec<u8>> {
    let identity = conn.peer_identity()?;
    let certs = identity.downcast::<Vec<CertificateDer<'static>>>().ok()?;
    certs.first().map(|cert| cert.to_vec())
}

/// Client crypto config installing an [`ObservedSession`] on every
/// connection.
pub struct ObservedClientConfig<O> {
    inner: Arc<QuicClientConfig>,
    observer: O,
}

impl<O: HandshakeObserver + Clone + 'static> ObservedClientConfig<O> {
    pub fn new(config: rustls::ClientConfig, observer: O) -> Result<Self, Error> {
        Ok(Self {
            inner: Arc::new(QuicClientConfig::try_from(config)?),
            observer,
        })
    }
}

impl<O: HandshakeObserver + Clone + 'static> crypto::ClientConfig for ObservedClientConfig<O> {
    fn start_session(
        self: Arc<Self>,
        version: u32,
        server_name: &str,
        params: &TransportParameters,
    ) -> Result<Box<dyn crypto::Session>, ConnectError> {
        let inner = self.inner.clone().start_session(version, server_name, params)?;
        Ok(Box::new(ObservedSession::new(inner, self.observer.clone())))
    }
}

/// A QUIC crypto session that reads the CRYPTO stream of both directions
/// as it passes through to the wrapped session.
pub struct ObservedSession<O> {
    inner: Box<dyn crypto::Session>,
    observer: O,
    inbound: HandshakeReader,
    outbound: HandshakeReader,
}

impl<O: HandshakeObserver> ObservedSession<O> {
    pub fn new(inner: Box<dyn crypto::Session>, observer: O) -> Self {
        Self {
            inner,
            observer,
            inbound: HandshakeReader::new(),
            outbound: HandshakeReader::new(),
        }
    }
}

impl<O: HandshakeObserver + 'static> crypto::Session for ObservedSession<O> {
    fn initial_keys(&self, dst_cid: &ConnectionId, side: Side) -> crypto::Keys {
        self.inner.initial_keys(dst_cid, side)
    }

    fn handshake_data(&self) -> Option<Box<dyn Any>> {
        self.inner.handshake_data()
    }

    fn peer_identity(&self) -> Option<Box<dyn Any>> {
        self.inner.peer_identity()
    }

    fn early_crypto(&self) -> Option<(Box<dyn crypto::HeaderKey>, Box<dyn crypto::PacketKey>)> {
        self.inner.early_crypto()
    }

    fn early_data_accepted(&self) -> Option<bool> {
        self.inner.early_data_accepted()
    }

    fn is_handshaking(&self) -> bool {
        self.inner.is_handshaking()
    }

    fn read_handshake(&mut self, buf: &[u8]) -> Result<bool, TransportError> {
        self.inbound.ingest(buf, &self.observer);
        self.inner.read_handshake(buf)
    }

    fn transport_parameters(&self) -> Result<Option<TransportParameters>, TransportError> {
        self.inner.transport_parameters()
    }

    fn write_handshake(&mut self, buf: &mut Vec<u8>) -> Option<crypto::Keys> {
        let start = buf.len();
        let keys = self.inner.write_handshake(buf);
        self.outbound.ingest(&buf[start..], &self.observer);
        keys
    }

    fn next_1rtt_keys(&mut self) -> Option<crypto::KeyPair<Box<dyn crypto::PacketKey>>> {
        self.inner.next_1rtt_keys()
    }

    fn is_valid_retry(&self, orig_dst_cid: &ConnectionId, header: &[u8], payload: &[u8]) -> bool {
        self.inner.is_valid_retry(orig_dst_cid, header, payload)
    }

    fn export_keying_material(
        &self,
        output: &mut [u8],
        label: &[u8],
        context: &[u8],
    ) -> Result<(), crypto::ExportKeyingMaterialError> {
        self.inner.export_keying_material(output, label, context)
    }
}
