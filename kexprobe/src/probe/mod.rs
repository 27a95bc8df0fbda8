//! Active handshake probes.
//!
//! A probe drives one handshake against a remote endpoint, over TLS/TCP or
//! TLS/QUIC, and reports which key exchange group was negotiated. Every
//! probe runs under a single deadline covering name resolution, socket
//! setup, dialing and the handshake. Failures are reported as values
//! naming the stage that failed.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    future::Future,
    net::SocketAddr,
    str::FromStr,
    time::Duration,
};

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::{
    net,
    time::{self, error::Elapsed, Instant},
};

use crate::{error::Error, group::KeyExchangeGroup, tai::TrustAnchorId};

pub use self::{
    quic::QuicProbe,
    result::{HandshakeSummary, ProbeFailure, ProbeOutcome, ProbeResult},
    tcp::TcpProbe,
};

pub mod quic;
mod result;
pub mod tcp;
pub mod tls;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transport {
    Tcp,
    Quic,
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("tcp") {
            Ok(Self::Tcp)
        } else if s.eq_ignore_ascii_case("quic") {
            Ok(Self::Quic)
        } else {
            Err(Error::InvalidTransport(s.to_owned()))
        }
    }
}

impl Display for Transport {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Quic => write!(f, "quic"),
        }
    }
}

/// Which groups the client offers, and in what order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum GroupPreference {
    /// Classical groups first, X25519MLKEM768 last. The client sends a
    /// classical key share, so a server that prefers the hybrid group has
    /// to ask for it with a HelloRetryRequest.
    Supported,
    /// X25519MLKEM768 first, with a key share sent for it up front.
    #[default]
    Preferred,
    Custom(Vec<KeyExchangeGroup>),
}

impl GroupPreference {
    pub fn groups(&self) -> Vec<KeyExchangeGroup> {
        match self {
            Self::Supported => vec![
                KeyExchangeGroup::X25519,
                KeyExchangeGroup::SECP256R1,
                KeyExchangeGroup::SECP384R1,
                KeyExchangeGroup::X25519_MLKEM768,
            ],
            Self::Preferred => vec![
                KeyExchangeGroup::X25519_MLKEM768,
                KeyExchangeGroup::X25519,
                KeyExchangeGroup::SECP256R1,
                KeyExchangeGroup::SECP384R1,
            ],
            Self::Custom(groups) => groups.clone(),
        }
    }

    /// Parses a comma separated list of group names or codepoints.
    pub fn parse_list(s: &str) -> Result<Self, Error> {
        let groups = s
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(KeyExchangeGroup::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        // Fail on input rather than at handshake time.
        tls::provider(&groups)?;

        Ok(Self::Custom(groups))
    }
}

impl FromStr for GroupPreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("supported") {
            Ok(Self::Supported)
        } else if s.eq_ignore_ascii_case("preferred") {
            Ok(Self::Preferred)
        } else {
            Err(Error::InvalidMethod(s.to_owned()))
        }
    }
}

/// A validated probe target.
#[derive(Clone, Debug)]
pub struct ProbeRequest {
    host: String,
    port: u16,
    server_name: ServerName<'static>,
    pub insecure: bool,
    pub groups: GroupPreference,
    /// Identifiers the probe asks to be offered. Never sent: rustls has no
    /// way to add the `trust_anchors` extension to a ClientHello, so they
    /// are only logged.
    pub trust_anchors: Vec<TrustAnchorId>,
}

impl ProbeRequest {
    /// `remote` is `host:port`, with IPv6 literals in brackets. When
    /// `server_name` is empty the host is used.
    pub fn new(remote: &str, server_name: Option<&str>) -> Result<Self, Error> {
        let (host, port) = remote
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidRemote(remote.to_owned()))?;

        // IPv6 literals must be bracketed, otherwise the port is ambiguous.
        let host = match host.strip_prefix('[').and_then(|host| host.strip_suffix(']')) {
            Some(host) => host,
            None if host.contains([':', '[', ']']) => return Err(Error::InvalidRemote(remote.to_owned())),
            None => host,
        };

        let port = port
            .parse::<u16>()
            .map_err(|_| Error::InvalidRemote(remote.to_owned()))?;

        if host.is_empty() || port == 0 {
            return Err(Error::InvalidRemote(remote.to_owned()));
        }

        let name = server_name.filter(|name| !name.is_empty()).unwrap_or(host);
        let server_name = ServerName::try_from(name.to_owned()).map_err(|_| Error::InvalidServerName(name.to_owned()))?;

        Ok(Self {
            host: host.to_owned(),
            port,
            server_name,
            insecure: false,
            groups: GroupPreference::default(),
            trust_anchors: Vec::new(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn server_name(&self) -> &ServerName<'static> {
        &self.server_name
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_groups(mut self, groups: GroupPreference) -> Self {
        self.groups = groups;
        self
    }

    /// Records the trust anchors to offer.
    ///
    /// This does not change what goes on the wire. The ClientHello carries
    /// no `trust_anchors` extension, and servers that key their answer on it
    /// will report `TAIs: null`. The identifiers only show up in debug logs.
    pub fn with_trust_anchors(mut self, trust_anchors: Vec<TrustAnchorId>) -> Self {
        self.trust_anchors = trust_anchors;
        self
    }
}

impl Display for ProbeRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ProbeOptions {
    pub timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Resolve,
    Listen,
    Dial,
    Handshake,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Resolve => write!(f, "resolve"),
            Self::Listen => write!(f, "listen"),
            Self::Dial => write!(f, "dial"),
            Self::Handshake => write!(f, "handshake"),
        }
    }
}

#[async_trait]
pub trait TransportProbe: Send + Sync {
    async fn probe(&self, request: &ProbeRequest, options: &ProbeOptions) -> ProbeResult;
}

pub async fn probe(transport: Transport, request: &ProbeRequest, options: &ProbeOptions) -> ProbeResult {
    if !request.trust_anchors.is_empty() {
        log::debug!(
            "[probe] [{request}] trust anchors requested but not advertised: {}",
            request
                .trust_anchors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let result = match transport {
        Transport::Tcp => TcpProbe.probe(request, options).await,
        Transport::Quic => QuicProbe.probe(request, options).await,
    };

    match &result {
        ProbeResult::Completed(outcome) => log::debug!(
            "[probe] [{request}] [{transport}] negotiated {} (PQ: {}, HRR: {:?})",
            outcome.kex_name,
            outcome.pq,
            outcome.hrr
        ),
        ProbeResult::Failed(failure) => log::debug!("[probe] [{request}] [{transport}] {failure}"),
    }

    result
}

/// One deadline shared by every stage of a probe.
pub(crate) struct Deadline(Instant);

impl Deadline {
    pub(crate) fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    /// Runs one stage, mapping its error or the deadline expiring to a
    /// failure of that stage.
    pub(crate) async fn run<T, E, F>(&self, stage: Stage, fut: F) -> Result<T, ProbeFailure>
    where
        E: Display,
        F: Future<Output = Result<T, E>>,
    {
        match self.within(fut).await {
            Ok(Ok(res)) => Ok(res),
            Ok(Err(err)) => Err(ProbeFailure::new(stage, err)),
            Err(_) => Err(ProbeFailure::new(stage, Error::TimedOut)),
        }
    }

    /// Runs `fut` until the deadline, leaving failures to the caller.
    pub(crate) async fn within<F: Future>(&self, fut: F) -> Result<F::Output, Elapsed> {
        time::timeout_at(self.0, fut).await
    }

    pub(crate) async fn resolve(&self, request: &ProbeRequest) -> Result<SocketAddr, ProbeFailure> {
        self.run(Stage::Resolve, async {
            net::lookup_host((request.host(), request.port()))
                .await?
                .next()
                .ok_or_else(|| Error::Unresolved(request.host().to_owned()))
        })
        .await
    }
}
