use std::io::{Error as IoError, ErrorKind};

use rustls::Error as RustlsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Rustls(#[from] RustlsError),
    #[error(transparent)]
    Probe(#[from] kexprobe::Error),
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    #[error("{0}: {1}")]
    Socket(&'static str, IoError),
    #[error("invalid certificate: no certificate found in PEM")]
    InvalidCertificate,
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(&'static str),
    #[error("TLS handshake timed out")]
    HandshakeTimeout,
}

impl Error {
    /// Errors caused by clients going away, not worth a warning.
    pub fn is_trivial(&self) -> bool {
        match self {
            Self::Io(err) => matches!(
                err.kind(),
                ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
            ),
            Self::Hyper(err) => err.is_incomplete_message() || err.is_canceled(),
            Self::HandshakeTimeout => true,
            _ => false,
        }
    }
}
