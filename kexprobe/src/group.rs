use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

use serde::{Serialize, Serializer};

use crate::error::Error;

/// A TLS key exchange group, as registered in the IANA
/// "TLS Supported Groups" registry.
///
/// ```plain
/// +------------------+----------+-----------------+
/// | NAME             | CODE     | POST-QUANTUM    |
/// +------------------+----------+-----------------+
/// | secp256r1        | 0x0017   | no              |
/// | secp384r1        | 0x0018   | no              |
/// | secp521r1        | 0x0019   | no              |
/// | x25519           | 0x001d   | no              |
/// | x448             | 0x001e   | no              |
/// | X25519Kyber...   | 0xfe3x   | no (draft)      |
/// | X25519Kyber...   | 0x6399   | no (draft)      |
/// | X25519MLKEM768   | 0x11ec   | yes             |
/// +------------------+----------+-----------------+
/// ```
///
/// Values outside the table are carried as-is and never classified as
/// post-quantum.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct KeyExchangeGroup(u16);

struct Entry {
    group: KeyExchangeGroup,
    name: &'static str,
    post_quantum: bool,
}

// The Kyber drafts were superseded by ML-KEM and never standardized, so
// they stay below the post-quantum bar even though their names say otherwise.
const TABLE: &[Entry] = &[
    Entry { group: KeyExchangeGroup::SECP256R1, name: "secp256r1", post_quantum: false },
    Entry { group: KeyExchangeGroup::SECP384R1, name: "secp384r1", post_quantum: false },
    Entry { group: KeyExchangeGroup::SECP521R1, name: "secp521r1", post_quantum: false },
    Entry { group: KeyExchangeGroup::X25519, name: "x25519", post_quantum: false },
    Entry { group: KeyExchangeGroup::X448, name: "x448", post_quantum: false },
    Entry { group: KeyExchangeGroup::X25519_KYBER512_DRAFT00, name: "X25519Kyber512Draft00", post_quantum: false },
    Entry { group: KeyExchangeGroup::X25519_KYBER768_DRAFT00_OLD, name: "X25519Kyber768Draft00Old", post_quantum: false },
    Entry { group: KeyExchangeGroup::P256_KYBER768_DRAFT00, name: "P256Kyber768Draft00", post_quantum: false },
    Entry { group: KeyExchangeGroup::X25519_KYBER768_DRAFT00, name: "X25519Kyber768Draft00", post_quantum: false },
    Entry { group: KeyExchangeGroup::X25519_MLKEM768, name: "X25519MLKEM768", post_quantum: true },
];

impl KeyExchangeGroup {
    pub const SECP256R1: Self = Self(0x0017);
    pub const SECP384R1: Self = Self(0x0018);
    pub const SECP521R1: Self = Self(0x0019);
    pub const X25519: Self = Self(0x001d);
    pub const X448: Self = Self(0x001e);
    pub const X25519_KYBER512_DRAFT00: Self = Self(0xfe30);
    pub const X25519_KYBER768_DRAFT00_OLD: Self = Self(0xfe31);
    pub const P256_KYBER768_DRAFT00: Self = Self(0xfe32);
    pub const X25519_KYBER768_DRAFT00: Self = Self(0x6399);
    pub const X25519_MLKEM768: Self = Self(0x11ec);

    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the IANA codepoint
    pub const fn code(&self) -> u16 {
        self.0
    }

    fn entry(&self) -> Option<&'static Entry> {
        TABLE.iter().find(|entry| entry.group == *self)
    }

    /// Returns the display name from the table, or `None` for unknown groups
    pub fn name(&self) -> Option<&'static str> {
        self.entry().map(|entry| entry.name)
    }

    pub fn is_post_quantum(&self) -> bool {
        self.entry().is_some_and(|entry| entry.post_quantum)
    }

    pub fn is_known(&self) -> bool {
        self.entry().is_some()
    }

    /// Every group in the classification table, in table order.
    pub fn known() -> impl Iterator<Item = Self> {
        TABLE.iter().map(|entry| entry.group)
    }
}

/// Maps a raw negotiated group to its display name and post-quantum verdict.
///
/// Total over `u16`: unknown groups come back as their decimal value and `false`.
pub fn classify(raw: u16) -> (String, bool) {
    let group = KeyExchangeGroup(raw);
    match group.entry() {
        Some(entry) => (entry.name.to_owned(), entry.post_quantum),
        None => (raw.to_string(), false),
    }
}

impl From<u16> for KeyExchangeGroup {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl From<KeyExchangeGroup> for u16 {
    fn from(group: KeyExchangeGroup) -> Self {
        group.0
    }
}

impl From<rustls::NamedGroup> for KeyExchangeGroup {
    fn from(group: rustls::NamedGroup) -> Self {
        Self(u16::from(group))
    }
}

impl Display for KeyExchangeGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for KeyExchangeGroup {
    type Err = Error;

    /// Accepts a table name (case-insensitive), a decimal codepoint or a `0x` hex codepoint.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Some(entry) = TABLE.iter().find(|entry| entry.name.eq_ignore_ascii_case(s)) {
            return Ok(entry.group);
        }

        let code = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u16::from_str_radix(hex, 16),
            None => s.parse::<u16>(),
        };

        code.map(Self).map_err(|_| Error::UnknownGroup(s.to_owned()))
    }
}

impl Serialize for KeyExchangeGroup {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.0)
    }
}
