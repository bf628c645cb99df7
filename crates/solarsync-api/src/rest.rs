// REST collaborator client
//
// Wraps `reqwest::Client` with base-URL joining and envelope unwrapping.
// The sync core only issues these calls on connect (baseline catch-up),
// on fallback-poll ticks, and when replaying the offline buffer.

use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{Device, MetricsSnapshot, OfflineEntry, Reading};
use crate::transport::TransportConfig;

/// The REST operations the sync core consumes.
///
/// [`RestClient`] is the production implementation; the trait exists so
/// the core can be driven by fakes in tests.
pub trait Backend: Send + Sync + 'static {
    /// `GET /api/devices`
    fn list_devices(&self) -> impl Future<Output = Result<Vec<Device>, Error>> + Send;

    /// `GET /api/metrics/current`
    fn current_metrics(&self) -> impl Future<Output = Result<MetricsSnapshot, Error>> + Send;

    /// `GET /api/devices/{id}/history?limit={limit}`
    fn device_history(
        &self,
        device_id: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Reading>, Error>> + Send;

    /// `POST /api/telemetry/replay`
    fn replay_readings(
        &self,
        batch: &[OfflineEntry],
    ) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Response bodies arrive either bare or wrapped as `{ "data": ... }`.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Self::Wrapped { data } | Self::Bare(data) => data,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplayBody<'a> {
    entries: &'a [OfflineEntry],
}

/// HTTP client for the dashboard backend's REST surface.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RestClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the API root, e.g. `https://solar.example/`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let base_url = Url::parse(base_url)?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(Error::Transport)?;

        parse_body(resp).await
    }

    async fn post_unit(&self, url: Url, body: &impl Serialize) -> Result<(), Error> {
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        check_status(resp).await.map(|_| ())
    }
}

impl Backend for RestClient {
    async fn list_devices(&self) -> Result<Vec<Device>, Error> {
        self.get(self.url("api/devices")?).await
    }

    async fn current_metrics(&self) -> Result<MetricsSnapshot, Error> {
        self.get(self.url("api/metrics/current")?).await
    }

    async fn device_history(&self, device_id: &str, limit: usize) -> Result<Vec<Reading>, Error> {
        let mut url = self.url("api/devices/")?;
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend([device_id, "history"]);
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        self.get(url).await
    }

    async fn replay_readings(&self, batch: &[OfflineEntry]) -> Result<(), Error> {
        self.post_unit(
            self.url("api/telemetry/replay")?,
            &ReplayBody { entries: batch },
        )
        .await
    }
}

/// Map non-success statuses to [`Error::Http`], passing the response through otherwise.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let endpoint = resp.url().path().to_string();
    let message = resp
        .text()
        .await
        .ok()
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

    Err(Error::Http {
        endpoint,
        status: status.as_u16(),
        message,
    })
}

async fn parse_body<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let resp = check_status(resp).await?;
    let body = resp.text().await.map_err(Error::Transport)?;

    serde_json::from_str::<Envelope<T>>(&body)
        .map(Envelope::into_inner)
        .map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
}
