use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

use serde::{Serialize, Serializer};

use crate::error::Error;

/// Trust anchor identifier, a relative object identifier such as `44363.48.7.12`.
///
/// The canonical text form is the dotted decimal segments. On the wire the
/// identifier is carried as the content octets of a relative OID:
///
/// ```plain
/// 44363.48.7 => 0x82 0xda 0x4b 0x30 0x07
/// ```
///
/// where every segment is encoded base-128, most significant group first,
/// with the high bit set on all but the last byte.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TrustAnchorId {
    segments: Vec<u32>,
}

impl TrustAnchorId {
    pub fn from_segments(segments: Vec<u32>) -> Result<Self, Error> {
        if segments.is_empty() {
            return Err(Error::InvalidTrustAnchorId("no segments".into()));
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[u32] {
        &self.segments
    }

    /// Returns a new identifier with `segment` appended.
    pub fn with_segment(&self, segment: u32) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.segments.len() * 2);

        for segment in &self.segments {
            let mut segment = *segment;
            let mut groups = [0u8; 5];
            let mut len = 0;

            loop {
                groups[len] = (segment & 0x7f) as u8;
                len += 1;
                segment >>= 7;
                if segment == 0 {
                    break;
                }
            }

            for i in (0..len).rev() {
                buf.push(if i == 0 { groups[i] } else { groups[i] | 0x80 });
            }
        }

        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut segments = Vec::new();
        let mut segment: u32 = 0;
        let mut in_segment = false;

        for (i, byte) in bytes.iter().enumerate() {
            // Leading 0x80 would be a non-minimal encoding.
            if !in_segment && *byte == 0x80 {
                return Err(Error::InvalidTrustAnchorId(format!("non-minimal segment at byte {i}")));
            }

            segment = segment
                .checked_mul(128)
                .and_then(|s| s.checked_add(u32::from(byte & 0x7f)))
                .ok_or_else(|| Error::InvalidTrustAnchorId(format!("segment overflow at byte {i}")))?;

            if byte & 0x80 == 0 {
                segments.push(segment);
                segment = 0;
                in_segment = false;
            } else {
                in_segment = true;
            }
        }

        if in_segment {
            return Err(Error::InvalidTrustAnchorId("truncated segment".into()));
        }

        Self::from_segments(segments)
    }
}

impl From<u32> for TrustAnchorId {
    fn from(segment: u32) -> Self {
        Self {
            segments: vec![segment],
        }
    }
}

impl FromStr for TrustAnchorId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::InvalidTrustAnchorId("empty identifier".into()));
        }

        let segments = s
            .split('.')
            .map(|segment| {
                // `u32::from_str` would accept a leading '+'.
                if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(Error::InvalidTrustAnchorId(format!("invalid segment {segment:?} in {s:?}")));
                }
                segment
                    .parse::<u32>()
                    .map_err(|_| Error::InvalidTrustAnchorId(format!("segment {segment} out of range in {s:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_segments(segments)
    }
}

impl Display for TrustAnchorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl Serialize for TrustAnchorId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_round_trip() {
        for s in ["44363.48.7", "44363.48.7.0", "44363.48.7.999999", "62253", "0.4294967295"] {
            let tai = s.parse::<TrustAnchorId>().unwrap();
            assert_eq!(tai.to_string(), s);
        }
    }

    #[test]
    fn test_with_segment() {
        let base = "44363.48.7".parse::<TrustAnchorId>().unwrap();
        assert_eq!(base.with_segment(42).to_string(), "44363.48.7.42");
        assert_eq!(base.with_segment(42).segments(), &[44363, 48, 7, 42]);
        assert_eq!(base.to_string(), "44363.48.7");
    }

    #[test]
    fn test_parse_errors() {
        for s in ["", ".", "1..2", "1.", ".1", "1.a", "+1", "1.-2", "4294967296", "1 .2"] {
            assert!(s.parse::<TrustAnchorId>().is_err(), "{s:?} should not parse");
        }
        assert!(TrustAnchorId::from_segments(Vec::new()).is_err());
    }

    #[test]
    fn test_binary_encoding() {
        let tai = "44363.48.7".parse::<TrustAnchorId>().unwrap();
        assert_eq!(tai.to_bytes(), vec![0x82, 0xda, 0x4b, 0x30, 0x07]);
        assert_eq!(TrustAnchorId::from_bytes(&tai.to_bytes()).unwrap(), tai);

        let tai = "0.127.128.4294967295".parse::<TrustAnchorId>().unwrap();
        assert_eq!(TrustAnchorId::from_bytes(&tai.to_bytes()).unwrap(), tai);
    }

    #[test]
    fn test_binary_errors() {
        assert!(TrustAnchorId::from_bytes(&[]).is_err());
        assert!(TrustAnchorId::from_bytes(&[0x82]).is_err());
        assert!(TrustAnchorId::from_bytes(&[0x80, 0x01]).is_err());
        assert!(TrustAnchorId::from_bytes(&[0xff, 0xff, 0xff, 0xff, 0xff, 0x7f]).is_err());
    }
}
