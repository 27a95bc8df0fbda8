use kexprobe::{classify, HandshakeReport, TrustAnchorId};
use serde::Serialize;

use crate::utils::escape_html;

const INDEX_HTML: &str = include_str!("index.html");

/// What the visiting client's own handshake looked like.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ClientReport {
    #[serde(rename = "TLS")]
    pub tls: bool,
    #[serde(rename = "Kex")]
    pub kex: Option<u16>,
    #[serde(rename = "KexName")]
    pub kex_name: Option<String>,
    #[serde(rename = "PQ")]
    pub pq: bool,
    #[serde(rename = "HRR")]
    pub hrr: bool,
    /// Groups the client sent key shares for up front
    #[serde(rename = "Offered")]
    pub offered: Vec<String>,
    /// `None` when the client did not send the trust_anchors extension
    #[serde(rename = "TAIs")]
    pub tais: Option<Vec<String>>,
    #[serde(rename = "TrustAnchorMatch")]
    pub trust_anchor_match: bool,
}

impl ClientReport {
    pub fn new(tls: bool, report: Option<&HandshakeReport>, server_trust_anchor: &TrustAnchorId) -> Self {
        let Some(report) = report.filter(|_| tls) else {
            return Self {
                tls,
                ..Default::default()
            };
        };

        let (kex, kex_name, pq) = match report.negotiated {
            Some(group) => {
                let (name, pq) = classify(group.code());
                (Some(group.code()), Some(name), pq)
            }
            None => (None, None, false),
        };

        Self {
            tls,
            kex,
            kex_name,
            pq,
            hrr: report.hello_retry,
            offered: report.offered.iter().map(|group| classify(group.code()).0).collect(),
            tais: report
                .offered_trust_anchors
                .as_ref()
                .map(|tais| tais.iter().map(ToString::to_string).collect()),
            trust_anchor_match: report
                .offered_trust_anchors
                .as_ref()
                .is_some_and(|tais| tais.contains(server_trust_anchor)),
        }
    }

    /// Renders the landing page around this report.
    pub fn render(&self, server_trust_anchor: &TrustAnchorId, landmark: Option<&TrustAnchorId>) -> String {
        let verdict = match (self.tls, self.pq) {
            (false, _) => "plain HTTP, no handshake to inspect",
            (true, true) => "post-quantum key agreement",
            (true, false) => "not post-quantum",
        };

        let offered = if self.offered.is_empty() {
            String::from("-")
        } else {
            self.offered.join(", ")
        };

        let tais = match &self.tais {
            Some(tais) if tais.is_empty() => String::from("[]"),
            Some(tais) => tais.join(", "),
            None => String::from("not sent"),
        };

        [
            ("{{VERDICT_CLASS}}", if self.pq { "pq" } else { "classical" }.to_owned()),
            ("{{VERDICT}}", verdict.to_owned()),
            ("{{TLS}}", self.tls.to_string()),
            ("{{KEX}}", self.kex_name.clone().unwrap_or_else(|| String::from("-"))),
            ("{{HRR}}", self.hrr.to_string()),
            ("{{OFFERED}}", offered),
            ("{{TAIS}}", tais),
            ("{{TAI_MATCH}}", self.trust_anchor_match.to_string()),
            ("{{SERVER_TAI}}", server_trust_anchor.to_string()),
            (
                "{{LANDMARK}}",
                landmark.map_or_else(|| String::from("-"), ToString::to_string),
            ),
        ]
        .into_iter()
        .fold(INDEX_HTML.to_owned(), |page, (placeholder, value)| {
            page.replace(placeholder, &escape_html(&value))
        })
    }
}
