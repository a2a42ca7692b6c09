//! HTTP adapter for the backend sidecar.
//!
//! Plain calls are JSON request/response. Install progress and backend
//! events are newline-delimited JSON streamed over a chunked response.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;

use super::{CommandGateway, EVENT_CHANNEL_CAPACITY, GatewayEvent};
use crate::error::GatewayError;
use crate::progress::{ProgressSink, ProgressUpdate};
use crate::release::{DownloadProgress, InstallationStatus, Release};
use crate::variant::GameVariant;

/// User agent for backend requests
const USER_AGENT: &str = concat!("Ashfall/", env!("CARGO_PKG_VERSION"));

/// One line of the install response stream
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum InstallFrame {
    Progress(DownloadProgress),
    Installing,
    Done(Release),
    Error {
        message: String,
        #[serde(default)]
        not_available: bool,
    },
}

#[derive(serde::Serialize)]
struct LaunchRequest<'a> {
    release_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    world: Option<&'a str>,
}

/// Gateway that talks to the backend over HTTP
#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: reqwest::Url,
    request_timeout: Duration,
    events: broadcast::Sender<GatewayEvent>,
}

impl HttpGateway {
    /// Create a gateway for the backend at `base_url`
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, GatewayError> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| GatewayError::Transport(format!("Invalid backend URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Transport(format!(
                "Backend URL {} cannot have a path",
                base_url
            )));
        }
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(request_timeout)
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            base_url,
            request_timeout,
            events,
        })
    }

    /// Base URL extended by `segments`, each percent-encoded as one path segment
    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                GatewayError::Transport(format!("Backend URL {} cannot have a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn variant_url(&self, variant: GameVariant, segments: &[&str]) -> Result<reqwest::Url, GatewayError> {
        let mut path = vec!["variants", variant.id()];
        path.extend_from_slice(segments);
        self.url(&path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: reqwest::Url) -> Result<T, GatewayError> {
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn post_ack(&self, url: reqwest::Url, body: Option<serde_json::Value>) -> Result<(), GatewayError> {
        let mut request = self.client.post(url).timeout(self.request_timeout);
        if let Some(body) = body {
            request = request.json(&body);
        }
        check_status(request.send().await?).await?;
        Ok(())
    }

    /// Connect to the backend event stream.
    ///
    /// Resolves once connected; the returned future pumps events into the
    /// broadcast until the stream ends.
    pub async fn listen(&self) -> Result<BoxFuture<'static, Result<(), GatewayError>>, GatewayError> {
        let response = self.client.get(self.url(&["events"])?).send().await?;
        let response = check_status(response).await?;
        let events = self.events.clone();

        tracing::info!("Connected to backend event stream");

        Ok(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = Vec::new();
            while let Some(chunk) = stream.next().await {
                buffer.extend_from_slice(&chunk?);
                for line in drain_lines(&mut buffer) {
                    match serde_json::from_str::<GatewayEvent>(&line) {
                        Ok(event) => {
                            let _ = events.send(event);
                        }
                        Err(e) => tracing::warn!("Ignoring malformed backend event: {}", e),
                    }
                }
            }

            tracing::info!("Backend event stream closed");
            Ok::<(), GatewayError>(())
        }
        .boxed())
    }
}

impl CommandGateway for HttpGateway {
    async fn fetch_releases(&self, variant: GameVariant) -> Result<(), GatewayError> {
        self.post_ack(self.variant_url(variant, &["releases", "fetch"])?, None)
            .await
    }

    async fn get_installation_status(
        &self,
        variant: GameVariant,
        release_id: &str,
    ) -> Result<InstallationStatus, GatewayError> {
        self.get_json(self.variant_url(variant, &["releases", release_id, "status"])?)
            .await
    }

    async fn install_release(
        &self,
        variant: GameVariant,
        release_id: &str,
        progress: ProgressSink,
    ) -> Result<Release, GatewayError> {
        let url = self.variant_url(variant, &["releases", release_id, "install"])?;
        let response = self.client.post(url).send().await?;
        let response = check_status(response).await?;

        let mut stream = response.bytes_stream();
        let mut buffer = Vec::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
            for line in drain_lines(&mut buffer) {
                match parse_frame(&line)? {
                    InstallFrame::Progress(p) => {
                        progress.send(ProgressUpdate::Download(p));
                    }
                    InstallFrame::Installing => {
                        progress.installing();
                    }
                    InstallFrame::Done(release) => return Ok(release),
                    InstallFrame::Error {
                        message,
                        not_available,
                    } => {
                        return Err(if not_available {
                            GatewayError::NotAvailable(release_id.to_string())
                        } else {
                            GatewayError::Backend(message)
                        });
                    }
                }
            }
        }

        Err(GatewayError::Transport(
            "install stream ended without a result".to_string(),
        ))
    }

    async fn get_active_release(&self, variant: GameVariant) -> Result<Option<String>, GatewayError> {
        let active: Option<String> = self
            .get_json(self.variant_url(variant, &["active-release"])?)
            .await?;
        Ok(active.filter(|id| !id.is_empty()))
    }

    async fn get_last_played_world(
        &self,
        variant: GameVariant,
    ) -> Result<Option<String>, GatewayError> {
        self.get_json(self.variant_url(variant, &["last-played-world"])?)
            .await
    }

    async fn launch_game(
        &self,
        variant: GameVariant,
        release_id: &str,
        world: Option<&str>,
    ) -> Result<(), GatewayError> {
        let body = serde_json::to_value(LaunchRequest { release_id, world })?;
        self.post_ack(self.variant_url(variant, &["launch"])?, Some(body))
            .await
    }

    async fn master_reset(&self, variant: GameVariant) -> Result<(), GatewayError> {
        self.post_ack(self.variant_url(variant, &["reset"])?, None).await
    }

    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }
}

/// Turn a non-2xx response into a backend error carrying the body text
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(GatewayError::Backend(format!("{} - {}", status, text)))
}

/// Split complete lines off the front of `buffer`, leaving any partial line.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&line);
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}

fn parse_frame(line: &str) -> Result<InstallFrame, GatewayError> {
    Ok(serde_json::from_str(line)?)
}
