//! Landmark tracking for the trust anchor identifier offered in probes.
//!
//! A landmark endpoint publishes a plaintext document whose first line is
//! `<last_landmark> <num_active_landmarks>`. The latest landmark is appended
//! to a base identifier to obtain the TAI that probes offer.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use tokio::time;

use crate::{error::Error, tai::TrustAnchorId};

pub const DEFAULT_LANDMARK_URL: &str = "https://bootstrap-mtca-shard3.cloudflareresearch.com/landmark";
pub const DEFAULT_BASE_TAI: &str = "44363.48.7";
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// [`DEFAULT_BASE_TAI`] as an identifier.
pub fn default_base_tai() -> TrustAnchorId {
    TrustAnchorId::from(44363).with_segment(48).with_segment(7)
}

/// Where the landmark document comes from.
#[async_trait]
pub trait LandmarkSource: Send + Sync {
    async fn fetch(&self) -> Result<String, Error>;
}

/// Fetches the landmark document over HTTP(S).
pub struct HttpLandmarkSource {
    client: Client,
    url: String,
}

impl HttpLandmarkSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl LandmarkSource for HttpLandmarkSource {
    async fn fetch(&self) -> Result<String, Error> {
        let resp = self.client.get(&self.url).send().await?;

        if resp.status() != StatusCode::OK {
            return Err(Error::LandmarkStatus(resp.status()));
        }

        Ok(resp.text().await?)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Landmark {
    pub last: u32,
    pub active: u32,
}

/// Parses the header line of a landmark document.
pub fn parse_landmark(body: &str) -> Result<Landmark, Error> {
    let first_line = body.trim().lines().next().unwrap_or_default();
    let fields = first_line.split_whitespace().collect::<Vec<_>>();

    let [last, active] = fields.as_slice() else {
        return Err(Error::InvalidLandmarkHeader(first_line.to_owned()));
    };

    let last = last
        .parse::<u32>()
        .map_err(|_| Error::InvalidLandmarkIndex((*last).to_owned()))?;
    let active = active
        .parse::<u32>()
        .map_err(|_| Error::InvalidLandmarkCount((*active).to_owned()))?;

    Ok(Landmark { last, active })
}

#[derive(Clone, Debug)]
pub struct LandmarkState {
    pub tai: TrustAnchorId,
    pub landmark: Landmark,
    pub refreshed_at: SystemTime,
}

/// Process-wide latest landmark.
///
/// Only [`Landmarks::refresh`] writes the state, and only after a fully
/// validated fetch. Readers never observe a partially updated value.
pub struct Landmarks<S> {
    source: S,
    base: TrustAnchorId,
    state: RwLock<Option<LandmarkState>>,
}

impl<S: LandmarkSource> Landmarks<S> {
    pub fn new(source: S, base: TrustAnchorId) -> Self {
        Self {
            source,
            base,
            state: RwLock::new(None),
        }
    }

    /// Builds the landmark state and performs the initial fetch.
    pub async fn init(source: S, base: TrustAnchorId) -> Result<Arc<Self>, Error> {
        let landmarks = Arc::new(Self::new(source, base));
        landmarks.refresh().await?;
        Ok(landmarks)
    }

    pub async fn refresh(&self) -> Result<TrustAnchorId, Error> {
        let body = self.source.fetch().await?;
        let landmark = parse_landmark(&body)?;

        // Round-trip through the text form so a bad base can never be stored.
        let tai = self
            .base
            .with_segment(landmark.last)
            .to_string()
            .parse::<TrustAnchorId>()?;

        *self.state.write() = Some(LandmarkState {
            tai: tai.clone(),
            landmark,
            refreshed_at: SystemTime::now(),
        });

        log::info!("updated landmark: last={}, active={}, TAI={tai}", landmark.last, landmark.active);

        Ok(tai)
    }

    pub fn latest(&self) -> Option<TrustAnchorId> {
        self.state.read().as_ref().map(|state| state.tai.clone())
    }

    pub fn state(&self) -> Option<LandmarkState> {
        self.state.read().clone()
    }

    /// Refreshes forever, keeping the last good value on failure.
    pub async fn run_periodic(self: Arc<Self>, interval: Duration) {
        loop {
            time::sleep(interval).await;

            if let Err(err) = self.refresh().await {
                log::warn!("[landmark] failed to refresh: {err}");
            }
        }
    }
}
