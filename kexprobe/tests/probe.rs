use std::time::Duration;

use async_trait::async_trait;
use kexprobe::{
    probe::{self, Stage},
    Error, GroupPreference, KeyExchangeGroup, LandmarkSource, Landmarks, ProbeOptions, ProbeRequest, ProbeResult,
    Transport, TrustAnchorId,
};
use parking_lot::Mutex;
use rustls::{
    crypto::aws_lc_rs::kx_group::{SECP256R1, X25519, X25519MLKEM768},
    version::{TLS12, TLS13},
};

mod common;

fn request(addr: std::net::SocketAddr) -> ProbeRequest {
    ProbeRequest::new(&addr.to_string(), Some("localhost"))
        .unwrap()
        .with_insecure(true)
}

fn options() -> ProbeOptions {
    ProbeOptions {
        timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_tcp_post_quantum() {
    let identity = common::identity();
    let config = common::server_config(&identity, &[X25519MLKEM768, X25519], &[&TLS13, &TLS12], &[]);
    let addr = common::tls_server(config).await;

    let result = probe::probe(Transport::Tcp, &request(addr), &options()).await;
    let outcome = result.outcome().expect("probe completes");

    assert_eq!(outcome.kex, KeyExchangeGroup::X25519_MLKEM768.code());
    assert_eq!(outcome.kex_name, "X25519MLKEM768");
    assert!(outcome.pq);
    assert_eq!(outcome.hrr, Some(false));
    assert_eq!(outcome.tais, None);
    assert!(!outcome.mtc);
}

#[tokio::test]
async fn test_tcp_hello_retry() {
    let identity = common::identity();
    let config = common::server_config(&identity, &[X25519MLKEM768], &[&TLS13], &[]);
    let addr = common::tls_server(config).await;

    let req = request(addr).with_groups(GroupPreference::Supported);
    let result = probe::probe(Transport::Tcp, &req, &options()).await;
    let outcome = result.outcome().expect("probe completes");

    assert_eq!(outcome.kex, KeyExchangeGroup::X25519_MLKEM768.code());
    assert!(outcome.pq);
    assert_eq!(outcome.hrr, Some(true));
}

#[tokio::test]
async fn test_tcp_classical_tls12() {
    let identity = common::identity();
    let config = common::server_config(&identity, &[SECP256R1], &[&TLS12], &[]);
    let addr = common::tls_server(config).await;

    let result = probe::probe(Transport::Tcp, &request(addr), &options()).await;
    let outcome = result.outcome().expect("probe completes");

    assert_eq!(outcome.kex, 23);
    assert_eq!(outcome.kex_name, "secp256r1");
    assert!(!outcome.pq);
    assert_eq!(outcome.hrr, Some(false));
}

#[tokio::test]
async fn test_tcp_mtc_leaf() {
    let mut identity = common::identity();
    identity.cert = common::relabel(&identity.cert, common::MTC_ALGORITHM);
    let config = common::server_config(&identity, &[X25519MLKEM768, X25519], &[&TLS13], &[]);
    let addr = common::tls_server(config).await;

    let result = probe::probe(Transport::Tcp, &request(addr), &options()).await;
    assert!(result.outcome().expect("probe completes").mtc);
}

#[tokio::test]
async fn test_tcp_verification_failure() {
    let identity = common::identity();
    let config = common::server_config(&identity, &[X25519MLKEM768], &[&TLS13], &[]);
    let addr = common::tls_server(config).await;

    let req = request(addr).with_insecure(false);
    let result = probe::probe(Transport::Tcp, &req, &options()).await;
    let failure = result.failure().expect("self-signed certificate is rejected");
    assert_eq!(failure.stage, Stage::Handshake);
}

#[tokio::test]
async fn test_tcp_not_tls() {
    let addr = common::plaintext_server().await;

    let result = probe::probe(Transport::Tcp, &request(addr), &options()).await;
    let failure = result.failure().expect("plaintext peer fails the handshake");
    assert_eq!(failure.stage, Stage::Handshake);

    let json = serde_json::to_value(&result).unwrap();
    assert!(json["Error"].as_str().unwrap().starts_with("handshake: "));
    assert!(json.get("Kex").is_none());
    assert!(json.get("PQ").is_none());
}

#[tokio::test]
async fn test_tcp_closed_port() {
    let addr = common::closed_port().await;

    let result = probe::probe(Transport::Tcp, &request(addr), &options()).await;
    assert_eq!(result.failure().expect("nothing listens").stage, Stage::Dial);
}

#[tokio::test]
async fn test_quic_closed_port() {
    let addr = common::closed_udp_port();
    let options = ProbeOptions {
        timeout: Duration::from_secs(1),
    };

    let result = probe::probe(Transport::Quic, &request(addr), &options).await;
    let failure = result.failure().expect("nothing listens");
    assert_eq!(failure.stage, Stage::Dial);
    assert!(failure.to_string().starts_with("dial: "));
}

#[tokio::test]
async fn test_tcp_deadline() {
    let addr = common::silent_server().await;
    let options = ProbeOptions {
        timeout: Duration::from_millis(300),
    };

    let result = probe::probe(Transport::Tcp, &request(addr), &options).await;
    assert_eq!(result.failure().unwrap().to_string(), "handshake: timed out");
}

#[tokio::test]
async fn test_quic_post_quantum() {
    let identity = common::identity();
    let config = common::server_config(&identity, &[X25519MLKEM768, X25519], &[&TLS13], &[b"h3"]);
    let addr = common::quic_server(config);

    let result = probe::probe(Transport::Quic, &request(addr), &options()).await;
    let outcome = result.outcome().expect("probe completes");

    assert_eq!(outcome.kex, KeyExchangeGroup::X25519_MLKEM768.code());
    assert!(outcome.pq);
    assert_eq!(outcome.hrr, Some(false));
    // The server does not implement trust anchor negotiation.
    assert_eq!(outcome.tais, None);
}

#[tokio::test]
async fn test_quic_hello_retry() {
    let identity = common::identity();
    let config = common::server_config(&identity, &[X25519MLKEM768], &[&TLS13], &[b"h3"]);
    let addr = common::quic_server(config);

    let req = request(addr).with_groups(GroupPreference::Supported);
    let result = probe::probe(Transport::Quic, &req, &options()).await;
    let outcome = result.outcome().expect("probe completes");

    assert_eq!(outcome.kex_name, "X25519MLKEM768");
    assert_eq!(outcome.hrr, Some(true));
}

#[tokio::test]
async fn test_quic_alpn_mismatch() {
    let identity = common::identity();
    let config = common::server_config(&identity, &[X25519MLKEM768], &[&TLS13], &[b"hq-interop"]);
    let addr = common::quic_server(config);

    let result = probe::probe(Transport::Quic, &request(addr), &options()).await;
    assert_eq!(result.failure().expect("no common protocol").stage, Stage::Handshake);
}

struct CountingSource(Mutex<u32>);

#[async_trait]
impl LandmarkSource for CountingSource {
    async fn fetch(&self) -> Result<String, Error> {
        let mut next = self.0.lock();
        *next += 1;
        Ok(format!("{} 4\n", *next))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_probes_during_refresh() {
    let identity = common::identity();

    // Every server negotiates a different group, so each result can only
    // have come from its own target.
    let targets = [
        (
            Transport::Tcp,
            common::tls_server(common::server_config(&identity, &[X25519MLKEM768], &[&TLS13], &[])).await,
            KeyExchangeGroup::X25519_MLKEM768,
        ),
        (
            Transport::Tcp,
            common::tls_server(common::server_config(&identity, &[SECP256R1], &[&TLS13], &[])).await,
            KeyExchangeGroup::SECP256R1,
        ),
        (
            Transport::Quic,
            common::quic_server(common::server_config(&identity, &[X25519MLKEM768], &[&TLS13], &[b"h3"])),
            KeyExchangeGroup::X25519_MLKEM768,
        ),
        (
            Transport::Quic,
            common::quic_server(common::server_config(&identity, &[X25519], &[&TLS13], &[b"h3"])),
            KeyExchangeGroup::X25519,
        ),
    ];

    let base = "44363.48.7".parse::<TrustAnchorId>().unwrap();
    let landmarks = Landmarks::init(CountingSource(Mutex::new(0)), base).await.unwrap();

    let refresher = {
        let landmarks = landmarks.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                landmarks.refresh().await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let probes = (0..50)
        .map(|i| {
            let landmarks = landmarks.clone();
            let (transport, addr, expected) = targets[i % targets.len()];

            let handle = tokio::spawn(async move {
                let tai = landmarks.latest().unwrap();
                assert_eq!(&tai.segments()[..3], &[44363, 48, 7]);

                let req = request(addr).with_trust_anchors(vec![tai]);
                probe::probe(transport, &req, &options()).await
            });

            (transport, addr, expected, handle)
        })
        .collect::<Vec<_>>();

    for (transport, addr, expected, handle) in probes {
        match handle.await.unwrap() {
            ProbeResult::Completed(outcome) => {
                assert_eq!(outcome.kex, expected.code(), "{transport} {addr}");
                assert_eq!(outcome.pq, expected.is_post_quantum(), "{transport} {addr}");
            }
            ProbeResult::Failed(failure) => panic!("{transport} {addr} failed: {failure}"),
        }
    }

    refresher.await.unwrap();
    assert_eq!(landmarks.latest().unwrap().to_string(), "44363.48.7.21");
}
