use crate::{group::KeyExchangeGroup, tai::TrustAnchorId};

use super::{HandshakeEvent, HandshakeObserver};

const HANDSHAKE_CLIENT_HELLO: u8 = 1;
const HANDSHAKE_SERVER_HELLO: u8 = 2;
const HANDSHAKE_ENCRYPTED_EXTENSIONS: u8 = 8;
const HANDSHAKE_SERVER_KEY_EXCHANGE: u8 = 12;

const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;
const EXT_KEY_SHARE: u16 = 0x0033;
const EXT_TRUST_ANCHORS: u16 = 0xca34;

const TLS13: u16 = 0x0304;
const ECDHE_NAMED_CURVE: u8 = 3;

/// `ServerHello.random` of a HelloRetryRequest, SHA-256("HelloRetryRequest").
pub(crate) const HELLO_RETRY_REQUEST_RANDOM: [u8; 32] = [
    0xcf, 0x21, 0xad, 0x74, 0xe5, 0x9a, 0x61, 0x11, 0xbe, 0x1d, 0x8c, 0x02, 0x1e, 0x65, 0xb8, 0x91,
    0xc2, 0xa2, 0x11, 0x16, 0x7a, 0xbb, 0x8c, 0x5e, 0x07, 0x9e, 0x09, 0xe2, 0xc8, 0xa8, 0x33, 0x9c,
];

/// Incremental reader for one direction of a TLS handshake message stream.
///
/// ```plain
/// +------+--------+----------+
/// | TYPE | LENGTH |   BODY   |
/// +------+--------+----------+
/// |  1   |   3    | Variable |
/// +------+--------+----------+
/// ```
///
/// Bytes may arrive in arbitrary fragments. Only the message types that
/// carry negotiation results are buffered; everything else is skipped
/// without copying.
#[derive(Default)]
pub struct HandshakeReader {
    header: Vec<u8>,
    pending: Option<Pending>,
    client_hellos: usize,
    tls13: Option<bool>,
}

struct Pending {
    msg_type: u8,
    remaining: usize,
    // `None` while skipping an uninteresting or oversized message.
    body: Option<Vec<u8>>,
}

impl HandshakeReader {
    pub const MESSAGE_LEN_MAX: usize = u16::MAX as usize;

    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a ServerHello selecting TLS 1.2 or below has been read.
    pub fn negotiated_tls12(&self) -> bool {
        self.tls13 == Some(false)
    }

    pub fn ingest(&mut self, mut buf: &[u8], observer: &dyn HandshakeObserver) {
        while !buf.is_empty() {
            match &mut self.pending {
                None => {
                    let take = (4 - self.header.len()).min(buf.len());
                    self.header.extend_from_slice(&buf[..take]);
                    buf = &buf[take..];

                    if self.header.len() < 4 {
                        return;
                    }

                    let msg_type = self.header[0];
                    let len = usize::from(self.header[1]) << 16
                        | usize::from(self.header[2]) << 8
                        | usize::from(self.header[3]);
                    self.header.clear();

                    let interesting = matches!(
                        msg_type,
                        HANDSHAKE_CLIENT_HELLO
                            | HANDSHAKE_SERVER_HELLO
                            | HANDSHAKE_ENCRYPTED_EXTENSIONS
                            | HANDSHAKE_SERVER_KEY_EXCHANGE
                    );

                    let body = (interesting && len <= Self::MESSAGE_LEN_MAX).then(|| Vec::with_capacity(len));

                    if len == 0 {
                        if let Some(body) = body {
                            self.handle_message(msg_type, &body, observer);
                        }
                    } else {
                        self.pending = Some(Pending {
                            msg_type,
                            remaining: len,
                            body,
                        });
                    }
                }

                Some(pending) => {
                    let take = pending.remaining.min(buf.len());
                    if let Some(body) = pending.body.as_mut() {
                        body.extend_from_slice(&buf[..take]);
                    }
                    pending.remaining -= take;
                    buf = &buf[take..];

                    if pending.remaining == 0 {
                        if let Some(Pending {
                            msg_type,
                            body: Some(body),
                            ..
                        }) = self.pending.take()
                        {
                            self.handle_message(msg_type, &body, observer);
                        }
                    }
                }
            }
        }
    }

    fn handle_message(&mut self, msg_type: u8, body: &[u8], observer: &dyn HandshakeObserver) {
        let events = match msg_type {
            HANDSHAKE_CLIENT_HELLO => self.client_hello(body),
            HANDSHAKE_SERVER_HELLO => self.server_hello(body),
            HANDSHAKE_ENCRYPTED_EXTENSIONS => encrypted_extensions(body),
            HANDSHAKE_SERVER_KEY_EXCHANGE => self.server_key_exchange(body),
            _ => None,
        };

        for event in events.into_iter().flatten() {
            observer.on_event(event);
        }
    }

    fn client_hello(&mut self, body: &[u8]) -> Option<Vec<HandshakeEvent>> {
        self.client_hellos += 1;

        let mut r = Cursor::new(body);
        r.skip(2 + 32)?;
        r.vec_u8()?;
        r.vec_u16()?;
        r.vec_u8()?;

        let mut key_shares = Vec::new();
        let mut trust_anchors = None;

        for (ext_type, data) in extensions(&mut r)? {
            match ext_type {
                EXT_KEY_SHARE => key_shares = client_key_shares(data)?,
                EXT_TRUST_ANCHORS => trust_anchors = Some(trust_anchor_list(data)?),
                _ => {}
            }
        }

        if self.client_hellos > 1 {
            // A second ClientHello only follows a HelloRetryRequest.
            return Some(vec![HandshakeEvent::HelloRetry {
                requested: key_shares.first().copied(),
            }]);
        }

        let mut events = vec![HandshakeEvent::KeySharesOffered(key_shares)];
        if let Some(tais) = trust_anchors {
            events.push(HandshakeEvent::TrustAnchorsOffered(tais));
        }
        Some(events)
    }

    fn server_hello(&mut self, body: &[u8]) -> Option<Vec<HandshakeEvent>> {
        let mut r = Cursor::new(body);
        r.skip(2)?;
        let random = r.take(32)?;
        r.vec_u8()?;
        r.skip(2 + 1)?;

        let is_retry = random == &HELLO_RETRY_REQUEST_RANDOM[..];

        // TLS 1.2 ServerHellos may omit extensions entirely.
        let exts = if r.is_empty() { Vec::new() } else { extensions(&mut r)? };

        let mut selected_version = None;
        let mut group = None;

        for (ext_type, data) in exts {
            let mut d = Cursor::new(data);
            match ext_type {
                EXT_SUPPORTED_VERSIONS => selected_version = Some(d.u16()?),
                // Both the HRR `selected_group` and a ServerHello key share
                // start with the group.
                EXT_KEY_SHARE => group = Some(KeyExchangeGroup::new(d.u16()?)),
                _ => {}
            }
        }

        if is_retry {
            return Some(vec![HandshakeEvent::HelloRetry { requested: group }]);
        }

        self.tls13 = Some(selected_version == Some(TLS13));

        Some(group.map(HandshakeEvent::GroupNegotiated).into_iter().collect())
    }

    fn server_key_exchange(&mut self, body: &[u8]) -> Option<Vec<HandshakeEvent>> {
        if !self.negotiated_tls12() {
            return None;
        }

        let mut r = Cursor::new(body);
        if r.u8()? != ECDHE_NAMED_CURVE {
            return None;
        }

        Some(vec![HandshakeEvent::GroupNegotiated(KeyExchangeGroup::new(r.u16()?))])
    }
}

fn encrypted_extensions(body: &[u8]) -> Option<Vec<HandshakeEvent>> {
    let mut r = Cursor::new(body);

    for (ext_type, data) in extensions(&mut r)? {
        if ext_type == EXT_TRUST_ANCHORS {
            return Some(vec![HandshakeEvent::TrustAnchorsReturned(trust_anchor_list(data)?)]);
        }
    }

    None
}

fn extensions<'a>(r: &mut Cursor<'a>) -> Option<Vec<(u16, &'a [u8])>> {
    let mut exts = Cursor::new(r.vec_u16()?);
    let mut out = Vec::new();

    while !exts.is_empty() {
        let ext_type = exts.u16()?;
        let data = exts.vec_u16()?;
        out.push((ext_type, data));
    }

    Some(out)
}

fn client_key_shares(data: &[u8]) -> Option<Vec<KeyExchangeGroup>> {
    let mut r = Cursor::new(data);
    let mut shares = Cursor::new(r.vec_u16()?);
    let mut groups = Vec::new();

    while !shares.is_empty() {
        groups.push(KeyExchangeGroup::new(shares.u16()?));
        shares.vec_u16()?;
    }

    Some(groups)
}

/// `TrustAnchorIdentifier trust_anchors<0..2^16-1>`, each `opaque<1..2^8-1>`.
fn trust_anchor_list(data: &[u8]) -> Option<Vec<TrustAnchorId>> {
    let mut r = Cursor::new(data);
    let mut list = Cursor::new(r.vec_u16()?);
    let mut tais = Vec::new();

    while !list.is_empty() {
        if let Ok(tai) = TrustAnchorId::from_bytes(list.vec_u8()?) {
            tais.push(tai);
        }
    }

    Some(tais)
}

struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.buf.len() < n {
            return None;
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Some(head)
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn vec_u8(&mut self) -> Option<&'a [u8]> {
        let len = self.u8()?;
        self.take(usize::from(len))
    }

    fn vec_u16(&mut self) -> Option<&'a [u8]> {
        let len = self.u16()?;
        self.take(usize::from(len))
    }
}
