use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use kexprobe::{
    observer::ConnectionId, HandshakeEvent, HandshakeObserver, HandshakeRecorder, HandshakeTable,
    HttpLandmarkSource, KeyExchangeGroup, Landmarks, ProbeOptions, RecordSniffer, TrustAnchorId,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    time,
};
use tokio_rustls::{server::TlsStream, TlsAcceptor};

use crate::error::Error;

mod handle_request;

/// State shared by every connection.
pub struct Context {
    pub landmarks: Arc<Landmarks<HttpLandmarkSource>>,
    pub table: Arc<HandshakeTable>,
    pub probe_options: ProbeOptions,
    pub server_trust_anchor: TrustAnchorId,
}

pub struct Connection {
    id: ConnectionId,
    addr: SocketAddr,
    tls: bool,
    ctx: Arc<Context>,
}

impl Connection {
    fn new(id: ConnectionId, addr: SocketAddr, tls: bool, ctx: Arc<Context>) -> Self {
        Self { id, addr, tls, ctx }
    }

    pub async fn handle(
        stream: TcpStream,
        addr: SocketAddr,
        acceptor: Option<TlsAcceptor>,
        ctx: Arc<Context>,
        handshake_timeout: Duration,
    ) {
        // Held until the connection ends; requests look the handshake up by id.
        let registration = ctx.table.register();
        let conn = Arc::new(Self::new(registration.id(), addr, acceptor.is_some(), ctx));

        let res = match acceptor {
            Some(acceptor) => {
                match accept_tls(stream, &acceptor, registration.recorder(), handshake_timeout).await {
                    Ok(stream) => {
                        log::info!(
                            "[{id:#010x}] [{addr}] connection established",
                            id = conn.id,
                        );
                        conn.clone().serve(stream).await
                    }
                    Err(err) => Err(err),
                }
            }
            None => conn.clone().serve(stream).await,
        };

        match res {
            Ok(()) => log::debug!("[{id:#010x}] [{addr}] connection closed", id = conn.id),
            Err(err) if err.is_trivial() => {
                log::debug!("[{id:#010x}] [{addr}] {err}", id = conn.id);
            }
            Err(err) => log::warn!("[{id:#010x}] [{addr}] connection error: {err}", id = conn.id),
        }
    }

    async fn serve<S>(self: Arc<Self>, stream: S) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let service = service_fn(move |req| {
            let conn = self.clone();
            async move { Ok::<_, Infallible>(conn.handle_request(req).await) }
        });

        http1::Builder::new()
            .keep_alive(true)
            .serve_connection(TokioIo::new(stream), service)
            .await?;

        Ok(())
    }
}

async fn accept_tls(
    stream: TcpStream,
    acceptor: &TlsAcceptor,
    recorder: &HandshakeRecorder,
    handshake_timeout: Duration,
) -> Result<TlsStream<RecordSniffer<TcpStream, HandshakeRecorder>>, Error> {
    let stream = RecordSniffer::new(stream, recorder.clone());

    let stream = time::timeout(handshake_timeout, acceptor.accept(stream))
        .await
        .map_err(|_| Error::HandshakeTimeout)??;

    if let Some(kx) = stream.get_ref().1.negotiated_key_exchange_group() {
        recorder.on_event(HandshakeEvent::GroupNegotiated(KeyExchangeGroup::from(kx.name())));
    }

    Ok(stream)
}

#[cfg(test)]
pub(crate) mod tests {
    use kexprobe::{landmark, probe::tls, GroupPreference};
    use rustls::pki_types::{PrivateKeyDer, ServerName};
    use serde_json::Value;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };
    use tokio_rustls::TlsConnector;

    use super::*;
    use crate::server::{build_acceptor, ALPN_HTTP11};

    /// A context whose landmark state was never fetched.
    pub(crate) fn context() -> Arc<Context> {
        let source = HttpLandmarkSource::new("http://127.0.0.1:9/landmark", Duration::from_secs(1)).unwrap();

        Arc::new(Context {
            landmarks: Arc::new(Landmarks::new(source, landmark::default_base_tai())),
            table: HandshakeTable::new(),
            probe_options: ProbeOptions::default(),
            server_trust_anchor: TrustAnchorId::from(62253),
        })
    }

    fn acceptor(groups: &[KeyExchangeGroup]) -> TlsAcceptor {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["localhost".to_owned()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let key = PrivateKeyDer::try_from(key.serialize_der()).unwrap();

        build_acceptor(vec![cert.der().clone()], key, groups).unwrap()
    }

    /// Serves one TLS connection and asks it for its own report.
    async fn client_report(server_groups: &[KeyExchangeGroup], client_groups: &[KeyExchangeGroup]) -> Value {
        let ctx = context();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let acceptor = acceptor(server_groups);
        let server_ctx = ctx.clone();
        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            Connection::handle(stream, peer, Some(acceptor), server_ctx, Duration::from_secs(5)).await;
        });

        let config = tls::client_config(client_groups, rustls::ALL_VERSIONS, true, &[ALPN_HTTP11]).unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut stream = TlsConnector::from(Arc::new(config))
            .connect(ServerName::try_from("localhost").unwrap(), stream)
            .await
            .unwrap();

        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nAccept: application/json\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let mut resp = Vec::new();
        stream.read_to_end(&mut resp).await.unwrap();
        server.await.unwrap();

        // The entry goes away with the connection.
        assert!(ctx.table.is_empty());

        let resp = String::from_utf8(resp).unwrap();
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        let (_, body) = resp.split_once("\r\n\r\n").unwrap();
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn test_post_quantum_client() {
        let report = client_report(
            &GroupPreference::Preferred.groups(),
            &GroupPreference::Preferred.groups(),
        )
        .await;

        assert_eq!(report["TLS"], Value::Bool(true));
        assert_eq!(report["Kex"], Value::from(0x11ec));
        assert_eq!(report["PQ"], Value::Bool(true));
        assert_eq!(report["HRR"], Value::Bool(false));
        // The classical half of the hybrid may be offered as its own share too.
        assert_eq!(report["Offered"][0], Value::from("X25519MLKEM768"));
    }

    #[tokio::test]
    async fn test_hello_retry_client() {
        let report = client_report(
            &[KeyExchangeGroup::X25519_MLKEM768],
            &GroupPreference::Supported.groups(),
        )
        .await;

        assert_eq!(report["KexName"], Value::from("X25519MLKEM768"));
        assert_eq!(report["PQ"], Value::Bool(true));
        assert_eq!(report["HRR"], Value::Bool(true));
        assert_eq!(report["Offered"], serde_json::json!(["x25519"]));
    }

    #[tokio::test]
    async fn test_classical_client() {
        let report = client_report(&GroupPreference::Preferred.groups(), &[KeyExchangeGroup::SECP256R1]).await;

        assert_eq!(report["Kex"], Value::from(23));
        assert_eq!(report["PQ"], Value::Bool(false));
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let ctx = context();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _silent = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();

        Connection::handle(
            stream,
            peer,
            Some(acceptor(&GroupPreference::Preferred.groups())),
            ctx.clone(),
            Duration::from_millis(200),
        )
        .await;

        assert!(ctx.table.is_empty());
    }
}
