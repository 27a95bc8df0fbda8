use std::io::Error as IoError;

use quinn::{crypto::rustls::NoInitialCipherSuite, ConnectError, ConnectionError};
use reqwest::{Error as ReqwestError, StatusCode};
use rustls::Error as RustlsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Rustls(#[from] RustlsError),
    #[error(transparent)]
    NoInitialCipherSuite(#[from] NoInitialCipherSuite),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("invalid remote address: {0}")]
    InvalidRemote(String),
    #[error("no addresses found for {0}")]
    Unresolved(String),
    #[error("invalid transport: {0}")]
    InvalidTransport(String),
    #[error("invalid group selection method: {0}")]
    InvalidMethod(String),
    #[error("invalid server name: {0}")]
    InvalidServerName(String),
    #[error("unknown key exchange group: {0}")]
    UnknownGroup(String),
    #[error("key exchange group not supported by the TLS provider: {0}")]
    UnsupportedGroup(String),
    #[error("invalid trust anchor identifier: {0}")]
    InvalidTrustAnchorId(String),
    #[error("fetching landmark: {0}")]
    LandmarkFetch(#[from] ReqwestError),
    #[error("landmark endpoint returned {0}")]
    LandmarkStatus(StatusCode),
    #[error("invalid landmark header: {0:?}")]
    InvalidLandmarkHeader(String),
    #[error("invalid last landmark: {0:?}")]
    InvalidLandmarkIndex(String),
    #[error("invalid active landmark count: {0:?}")]
    InvalidLandmarkCount(String),
    #[error("{0}: {1}")]
    Socket(&'static str, IoError),
    #[error("timed out")]
    TimedOut,
    #[error("no key exchange group negotiated")]
    NoGroupNegotiated,
}

impl Error {
    /// Errors caused by the caller's input rather than the network.
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidRemote(_)
                | Self::InvalidTransport(_)
                | Self::InvalidMethod(_)
                | Self::InvalidServerName(_)
                | Self::UnknownGroup(_)
                | Self::UnsupportedGroup(_)
                | Self::InvalidTrustAnchorId(_)
        )
    }
}
