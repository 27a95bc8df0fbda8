//! Handshake observation.
//!
//! The TLS stacks in use do not report hello retries, and quinn does not
//! report the negotiated group at all. Instead, handshake messages are
//! picked off the wire (TCP) or the CRYPTO stream (QUIC) as they pass
//! through, and turned into [`HandshakeEvent`]s for a [`HandshakeObserver`].

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::{Mutex, RwLock};

use crate::{group::KeyExchangeGroup, tai::TrustAnchorId};

pub use self::reader::HandshakeReader;

pub(crate) mod reader;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HandshakeEvent {
    /// Groups the client sent key shares for in its first ClientHello
    KeySharesOffered(Vec<KeyExchangeGroup>),
    /// Trust anchors listed in the client's first ClientHello
    TrustAnchorsOffered(Vec<TrustAnchorId>),
    /// The server asked the client for a different key share
    HelloRetry { requested: Option<KeyExchangeGroup> },
    /// The group the shared secret was finally derived from
    GroupNegotiated(KeyExchangeGroup),
    /// Trust anchors the server returned in EncryptedExtensions
    TrustAnchorsReturned(Vec<TrustAnchorId>),
}

/// Receives handshake events.
///
/// Called synchronously from the I/O path of a handshake in progress, so
/// implementations must return quickly and must not block.
pub trait HandshakeObserver: Send + Sync {
    fn on_event(&self, event: HandshakeEvent);
}

/// What was observed about one handshake.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HandshakeReport {
    pub offered: Vec<KeyExchangeGroup>,
    pub offered_trust_anchors: Option<Vec<TrustAnchorId>>,
    pub hello_retry: bool,
    pub retry_group: Option<KeyExchangeGroup>,
    pub negotiated: Option<KeyExchangeGroup>,
    pub trust_anchors: Option<Vec<TrustAnchorId>>,
}

impl HandshakeReport {
    fn apply(&mut self, event: HandshakeEvent) {
        match event {
            HandshakeEvent::KeySharesOffered(groups) => {
                if self.offered.is_empty() {
                    self.offered = groups;
                }
            }
            HandshakeEvent::TrustAnchorsOffered(tais) => {
                self.offered_trust_anchors.get_or_insert(tais);
            }
            HandshakeEvent::HelloRetry { requested } => {
                self.hello_retry = true;
                if requested.is_some() {
                    self.retry_group = requested;
                }
            }
            HandshakeEvent::GroupNegotiated(group) => self.negotiated = Some(group),
            HandshakeEvent::TrustAnchorsReturned(tais) => self.trust_anchors = Some(tais),
        }
    }
}

/// Observer that accumulates events into a [`HandshakeReport`].
#[derive(Clone, Default)]
pub struct HandshakeRecorder(Arc<Mutex<HandshakeReport>>);

impl HandshakeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self) -> HandshakeReport {
        self.0.lock().clone()
    }
}

impl HandshakeObserver for HandshakeRecorder {
    fn on_event(&self, event: HandshakeEvent) {
        log::trace!("handshake event: {event:?}");
        self.0.lock().apply(event);
    }
}

pub type ConnectionId = u64;

/// Side table of per-connection handshake recorders.
///
/// A connection registers before its handshake starts and later requests
/// on the same connection look their report up by id. Dropping the
/// [`Registration`] removes the entry.
#[derive(Default)]
pub struct HandshakeTable {
    next_id: AtomicU64,
    entries: RwLock<HashMap<ConnectionId, HandshakeRecorder>>,
}

impl HandshakeTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(self: &Arc<Self>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let recorder = HandshakeRecorder::new();
        self.entries.write().insert(id, recorder.clone());

        Registration {
            id,
            recorder,
            table: self.clone(),
        }
    }

    pub fn report(&self, id: ConnectionId) -> Option<HandshakeReport> {
        self.entries.read().get(&id).map(HandshakeRecorder::report)
    }

    pub fn remove(&self, id: ConnectionId) -> Option<HandshakeReport> {
        self.entries.write().remove(&id).map(|recorder| recorder.report())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

pub struct Registration {
    id: ConnectionId,
    recorder: HandshakeRecorder,
    table: Arc<HandshakeTable>,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn recorder(&self) -> &HandshakeRecorder {
        &self.recorder
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}
