//! Record layer sniffing for TLS over TCP.
//!
//! [`RecordSniffer`] sits between a TCP stream and the TLS implementation.
//! Bytes pass through unchanged; plaintext handshake records of both
//! directions are fed to a [`HandshakeReader`] each. A direction stops being
//! inspected once its traffic is encrypted.

use std::{
    io::Result as IoResult,
    pin::Pin,
    task::{ready, Context, Poll},
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::observer::{HandshakeObserver, HandshakeReader};

const CONTENT_CHANGE_CIPHER_SPEC: u8 = 20;
const CONTENT_ALERT: u8 = 21;
const CONTENT_HANDSHAKE: u8 = 22;
const CONTENT_APPLICATION_DATA: u8 = 23;

/// Largest ciphertext record, 2^14 + 2048.
const RECORD_LEN_MAX: usize = 16384 + 2048;

/// ```plain
/// +------+---------+--------+----------+
/// | TYPE | VERSION | LENGTH | FRAGMENT |
/// +------+---------+--------+----------+
/// |  1   |    2    |   2    | Variable |
/// +------+---------+--------+----------+
/// ```
#[derive(Default)]
struct Direction {
    header: Vec<u8>,
    content_type: u8,
    remaining: usize,
    messages: HandshakeReader,
    done: bool,
}

impl Direction {
    fn feed(&mut self, mut buf: &[u8], observer: &dyn HandshakeObserver, tls12: bool) {
        while !buf.is_empty() && !self.done {
            if self.remaining == 0 {
                let take = (5 - self.header.len()).min(buf.len());
                self.header.extend_from_slice(&buf[..take]);
                buf = &buf[take..];

                if self.header.len() < 5 {
                    return;
                }

                self.content_type = self.header[0];
                self.remaining = usize::from(u16::from_be_bytes([self.header[3], self.header[4]]));
                self.header.clear();

                match self.content_type {
                    CONTENT_HANDSHAKE | CONTENT_ALERT if self.remaining <= RECORD_LEN_MAX => {}
                    // The TLS 1.3 compatibility CCS is followed by more
                    // plaintext (a retried hello); in TLS 1.2 it switches to
                    // encrypted handshake records.
                    CONTENT_CHANGE_CIPHER_SPEC if !tls12 => {}
                    _ => {
                        self.done = true;
                        return;
                    }
                }

                continue;
            }

            let take = self.remaining.min(buf.len());
            if self.content_type == CONTENT_HANDSHAKE {
                self.messages.ingest(&buf[..take], observer);
            }
            self.remaining -= take;
            buf = &buf[take..];
        }
    }
}

/// Pass-through stream that reports handshake events to an observer.
pub struct RecordSniffer<S, O> {
    inner: S,
    observer: O,
    inbound: Direction,
    outbound: Direction,
}

impl<S, O: HandshakeObserver> RecordSniffer<S, O> {
    pub fn new(inner: S, observer: O) -> Self {
        Self {
            inner,
            observer,
            inbound: Direction::default(),
            outbound: Direction::default(),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Whether neither direction is inspected any more.
    pub fn is_done(&self) -> bool {
        self.inbound.done && self.outbound.done
    }

    fn tls12(&self) -> bool {
        self.inbound.messages.negotiated_tls12() || self.outbound.messages.negotiated_tls12()
    }
}

impl<S: AsyncRead + Unpin, O: HandshakeObserver + Unpin> AsyncRead for RecordSniffer<S, O> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<IoResult<()>> {
        let this = &mut *self;
        let filled = buf.filled().len();

        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        if !this.inbound.done {
            let tls12 = this.tls12();
            this.inbound.feed(&buf.filled()[filled..], &this.observer, tls12);
        }

        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin, O: HandshakeObserver + Unpin> AsyncWrite for RecordSniffer<S, O> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<IoResult<usize>> {
        let this = &mut *self;
        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;

        if !this.outbound.done {
            let tls12 = this.tls12();
            this.outbound.feed(&buf[..n], &this.observer, tls12);
        }

        Poll::Ready(Ok(n))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
