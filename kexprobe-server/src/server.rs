use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
    time::Duration,
};

use kexprobe::{
    probe::tls, GroupPreference, HandshakeTable, HttpLandmarkSource, KeyExchangeGroup, Landmarks,
    ProbeOptions,
};
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    ServerConfig,
};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::{
    config::Config,
    connection::{Connection, Context},
    error::Error,
};

pub const ALPN_HTTP11: &[u8] = b"http/1.1";
const LISTEN_BACKLOG: i32 = 1024;

pub struct Server {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    ctx: Arc<Context>,
    handshake_timeout: Duration,
    refresh_interval: Duration,
}

impl Server {
    pub async fn init(cfg: Config) -> Result<Self, Error> {
        let acceptor = match cfg.tls {
            Some(tls_cfg) => Some(build_acceptor(
                tls_cfg.certificate,
                tls_cfg.private_key,
                &GroupPreference::Preferred.groups(),
            )?),
            None => None,
        };

        // Probes need a TAI to offer, so a failed first fetch is fatal.
        let source = HttpLandmarkSource::new(cfg.landmark.url, cfg.landmark.fetch_timeout)?;
        let landmarks = Landmarks::init(source, cfg.landmark.base_tai).await?;

        let listener = bind(cfg.listen, cfg.only_v6)?;

        Ok(Self {
            listener,
            acceptor,
            ctx: Arc::new(Context {
                landmarks,
                table: HandshakeTable::new(),
                probe_options: ProbeOptions {
                    timeout: cfg.probe_timeout,
                },
                server_trust_anchor: cfg.server_trust_anchor,
            }),
            handshake_timeout: cfg.handshake_timeout,
            refresh_interval: cfg.landmark.refresh_interval,
        })
    }

    pub async fn start(&self) {
        tokio::spawn(self.ctx.landmarks.clone().run_periodic(self.refresh_interval));

        match self.listener.local_addr() {
            Ok(addr) if self.acceptor.is_some() => log::warn!("Server started on {addr} (TLS)"),
            Ok(addr) => log::warn!("Server started on {addr}"),
            Err(err) => log::warn!("Server started, local address unknown: {err}"),
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    tokio::spawn(Connection::handle(
                        stream,
                        addr,
                        self.acceptor.clone(),
                        self.ctx.clone(),
                        self.handshake_timeout,
                    ));
                }
                Err(err) => {
                    log::warn!("Failed to accept incoming connection: {}", err);
                }
            }
        }
    }
}

/// A TLS acceptor negotiating `groups` in server preference order.
pub fn build_acceptor(
    certificate: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
    groups: &[KeyExchangeGroup],
) -> Result<TlsAcceptor, Error> {
    let provider = tls::provider(groups)?;

    let mut crypto = ServerConfig::builder_with_provider(Arc::new(provider))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certificate, private_key)?;
    crypto.alpn_protocols = vec![ALPN_HTTP11.to_vec()];

    Ok(TlsAcceptor::from(Arc::new(crypto)))
}

fn bind(addr: SocketAddr, only_v6: Option<bool>) -> Result<TcpListener, Error> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|err| Error::Socket("failed to create listener TCP socket", err))?;

    if let Some(only_v6) = only_v6 {
        socket
            .set_only_v6(only_v6)
            .map_err(|err| Error::Socket("listener dual-stack socket setting error", err))?;
    }

    socket
        .set_reuse_address(true)
        .map_err(|err| Error::Socket("failed to set SO_REUSEADDR", err))?;
    socket
        .set_nonblocking(true)
        .map_err(|err| Error::Socket("failed to set listener non-blocking", err))?;
    socket
        .bind(&SockAddr::from(addr))
        .map_err(|err| Error::Socket("failed to bind listener TCP socket", err))?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|err| Error::Socket("failed to listen on TCP socket", err))?;

    Ok(TcpListener::from_std(StdTcpListener::from(socket))?)
}
