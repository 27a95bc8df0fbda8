//! Signature algorithm inspection on raw certificates.
//!
//! Certificate models map signature algorithms they do not recognise to a
//! generic "unknown" value, which hides exactly the experimental OIDs this
//! module looks for. The outer `signatureAlgorithm` is therefore read
//! straight from the DER:
//!
//! ```plain
//! Certificate ::= SEQUENCE {
//!     tbsCertificate       TBSCertificate,
//!     signatureAlgorithm   AlgorithmIdentifier,
//!     signatureValue       BIT STRING }
//! ```

use asn1_rs::{Any, FromDer, Oid, Tag};

/// Merkle Tree Certificate proof signature algorithm, `1.3.6.1.4.1.44363.47.0`.
pub const MTC_PROOF_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 44363, 47, 0];

/// Returns the arcs of the outer signature algorithm OID, if the bytes
/// decode far enough to reach it.
pub fn signature_algorithm(der: &[u8]) -> Option<Vec<u64>> {
    let (_, cert) = Any::from_der(der).ok()?;
    if cert.header.tag() != Tag::Sequence {
        return None;
    }

    let (rem, tbs) = Any::from_der(cert.data).ok()?;
    if tbs.header.tag() != Tag::Sequence {
        return None;
    }

    let (_, alg) = Any::from_der(rem).ok()?;
    if alg.header.tag() != Tag::Sequence {
        return None;
    }

    let (_, oid) = Oid::from_der(alg.data).ok()?;
    oid.iter().map(|arcs| arcs.collect())
}

/// Whether the certificate is signed with the MTC proof algorithm.
///
/// Never fails: anything that does not decode is "not an MTC".
pub fn is_mtc(der: &[u8]) -> bool {
    signature_algorithm(der).is_some_and(|arcs| arcs == MTC_PROOF_OID)
}
