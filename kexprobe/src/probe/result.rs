use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{ser::SerializeMap, Serialize, Serializer};

use crate::{group::KeyExchangeGroup, inspect, tai::TrustAnchorId};

use super::Stage;

/// What a transport probe learned from a completed handshake.
#[derive(Clone, Debug, Default)]
pub struct HandshakeSummary {
    pub group: KeyExchangeGroup,
    /// `None` when the peer did not take part in trust anchor negotiation,
    /// or when the transport hides the extension.
    pub trust_anchors: Option<Vec<TrustAnchorId>>,
    pub leaf_certificate: Option<Vec<u8>>,
    /// `None` when the transport cannot tell.
    pub hello_retry: Option<bool>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ProbeOutcome {
    #[serde(rename = "Kex")]
    pub kex: u16,
    #[serde(rename = "KexName")]
    pub kex_name: String,
    #[serde(rename = "PQ")]
    pub pq: bool,
    #[serde(rename = "TAIs")]
    pub tais: Option<Vec<String>>,
    #[serde(rename = "MTC")]
    pub mtc: bool,
    #[serde(rename = "HRR", skip_serializing_if = "Option::is_none")]
    pub hrr: Option<bool>,
}

impl ProbeOutcome {
    pub fn from_summary(summary: &HandshakeSummary) -> Self {
        let (kex_name, pq) = crate::group::classify(summary.group.code());

        Self {
            kex: summary.group.code(),
            kex_name,
            pq,
            tais: summary
                .trust_anchors
                .as_ref()
                .map(|tais| tais.iter().map(ToString::to_string).collect()),
            mtc: summary.leaf_certificate.as_deref().is_some_and(inspect::is_mtc),
            hrr: summary.hello_retry,
        }
    }
}

/// A probe that did not complete, and the stage it stopped in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProbeFailure {
    pub stage: Stage,
    pub message: String,
}

impl ProbeFailure {
    pub fn new(stage: Stage, err: impl Display) -> Self {
        Self {
            stage,
            message: err.to_string(),
        }
    }
}

impl Display for ProbeFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}: {}", self.stage, self.message)
    }
}

impl Serialize for ProbeFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("Error", &self.to_string())?;
        map.end()
    }
}

/// Either a complete outcome or a failure, never a mix of the two.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProbeResult {
    Completed(ProbeOutcome),
    Failed(ProbeFailure),
}

impl ProbeResult {
    pub fn outcome(&self) -> Option<&ProbeOutcome> {
        match self {
            Self::Completed(outcome) => Some(outcome),
            Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ProbeFailure> {
        match self {
            Self::Completed(_) => None,
            Self::Failed(failure) => Some(failure),
        }
    }
}

impl From<HandshakeSummary> for ProbeResult {
    fn from(summary: HandshakeSummary) -> Self {
        Self::Completed(ProbeOutcome::from_summary(&summary))
    }
}

impl From<ProbeFailure> for ProbeResult {
    fn from(failure: ProbeFailure) -> Self {
        Self::Failed(failure)
    }
}
