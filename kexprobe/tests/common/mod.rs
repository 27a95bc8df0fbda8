#![allow(dead_code)]

use std::{
    net::{SocketAddr, UdpSocket},
    sync::Arc,
};

use quinn::{crypto::rustls::QuicServerConfig, Endpoint, ServerConfig as QuinnServerConfig};
use rcgen::CertifiedKey;
use rustls::{
    crypto::{aws_lc_rs, CryptoProvider, SupportedKxGroup},
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    ServerConfig, SupportedProtocolVersion,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use tokio_rustls::TlsAcceptor;

pub const MTC_ALGORITHM: &[u8] = &[
    0x30, 0x0c, 0x06, 0x0a, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0xda, 0x4b, 0x2f, 0x00,
];

pub struct Identity {
    pub cert: CertificateDer<'static>,
    pub key: Vec<u8>,
}

pub fn identity() -> Identity {
    let CertifiedKey { cert, key_pair } = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
    Identity {
        cert: cert.der().clone(),
        key: key_pair.serialize_der(),
    }
}

pub fn server_config(
    identity: &Identity,
    groups: &[&'static dyn SupportedKxGroup],
    versions: &[&'static SupportedProtocolVersion],
    alpn: &[&[u8]],
) -> ServerConfig {
    let provider = CryptoProvider {
        kx_groups: groups.to_vec(),
        ..aws_lc_rs::default_provider()
    };

    let mut config = ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(versions)
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(
            vec![identity.cert.clone()],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(identity.key.clone())),
        )
        .unwrap();

    config.alpn_protocols = alpn.iter().map(|proto| proto.to_vec()).collect();
    config
}

/// A TLS server accepting connections until the test ends.
pub async fn tls_server(config: ServerConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(mut tls) = acceptor.accept(stream).await {
                    let mut buf = [0u8; 64];
                    let _ = tls.read(&mut buf).await;
                }
            });
        }
    });

    addr
}

/// A QUIC server holding each connection open until the peer closes it.
pub fn quic_server(config: ServerConfig) -> SocketAddr {
    let crypto = QuicServerConfig::try_from(config).unwrap();
    let endpoint = Endpoint::server(
        QuinnServerConfig::with_crypto(Arc::new(crypto)),
        "127.0.0.1:0".parse().unwrap(),
    )
    .unwrap();
    let addr = endpoint.local_addr().unwrap();

    tokio::spawn(async move {
        while let Some(incoming) = endpoint.accept().await {
            tokio::spawn(async move {
                if let Ok(conn) = incoming.await {
                    conn.closed().await;
                }
            });
        }
    });

    addr
}

/// A TCP server answering every connection with an HTTP error.
pub async fn plaintext_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
            });
        }
    });

    addr
}

/// A TCP server that accepts and never answers.
pub async fn silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// A UDP address nothing listens on.
pub fn closed_udp_port() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap()
}

fn split_tlv(buf: &[u8]) -> (&[u8], &[u8]) {
    let (len, header) = match buf[1] {
        len @ 0..=0x7f => (usize::from(len), 2),
        long => {
            let n = usize::from(long & 0x7f);
            let len = buf[2..2 + n].iter().fold(0, |acc, b| acc << 8 | usize::from(*b));
            (len, 2 + n)
        }
    };
    buf.split_at(header + len)
}

fn content(element: &[u8]) -> &[u8] {
    let header = if element[1] < 0x80 { 2 } else { 2 + usize::from(element[1] & 0x7f) };
    &element[header..]
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xff {
        out.extend([0x81, len as u8]);
    } else {
        out.extend([0x82, (len >> 8) as u8, len as u8]);
    }
    out.extend_from_slice(content);
    out
}

/// Re-labels a certificate with another signature algorithm, in both the
/// TBS and the outer structure. The signature itself no longer verifies.
pub fn relabel(cert: &[u8], algorithm: &[u8]) -> CertificateDer<'static> {
    let body = content(cert);
    let (tbs, rest) = split_tlv(body);
    let (_, signature) = split_tlv(rest);

    let tbs_body = content(tbs);
    let (version, rest) = split_tlv(tbs_body);
    let (serial, rest) = split_tlv(rest);
    let (_, rest) = split_tlv(rest);

    let mut new_tbs = Vec::new();
    new_tbs.extend_from_slice(version);
    new_tbs.extend_from_slice(serial);
    new_tbs.extend_from_slice(algorithm);
    new_tbs.extend_from_slice(rest);

    let mut new_body = tlv(0x30, &new_tbs);
    new_body.extend_from_slice(algorithm);
    new_body.extend_from_slice(signature);

    CertificateDer::from(tlv(0x30, &new_body))
}
