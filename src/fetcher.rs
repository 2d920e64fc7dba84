use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::FetchSettings;
use crate::error::TransportError;
use crate::profile::{ProfileProvider, RequestProfile};
use crate::rate_limit::SourceGate;
use crate::registry::{SearchQuery, Source};

/// Phrases that mark a bot-check or captcha page served with a 2xx status.
const BOT_SIGNATURES: &[&str] = &[
    "captcha",
    "unusual activity",
    "cloudflare",
    "verify you are human",
    "automated access",
    "bot check",
    "security check",
    "ddos protection",
    "browser verification",
    "are you a robot",
];

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `Retry-After` as delta-seconds or an HTTP date.
    pub fn retry_after(&self) -> Option<Duration> {
        let value = self.headers.get("retry-after")?.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
        let delta = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
        Some(delta.to_std().unwrap_or(Duration::ZERO))
    }
}

/// One HTTP GET. Implementations must not retry on their own.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, profile: &RequestProfile) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport. One client per proxy, created on first use.
pub struct HttpTransport {
    timeout: Duration,
    clients: Mutex<HashMap<Option<String>, reqwest::Client>>,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client_for(&self, proxy: Option<&str>) -> Result<reqwest::Client, TransportError> {
        let key = proxy.map(str::to_string);
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout.min(Duration::from_secs(10)))
            .redirect(reqwest::redirect::Policy::limited(10));
        if let Some(p) = proxy {
            let proxy = reqwest::Proxy::all(p).map_err(|e| TransportError::Client(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| TransportError::Client(e.to_string()))?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, profile: &RequestProfile) -> Result<TransportResponse, TransportError> {
        let client = self.client_for(profile.proxy.as_deref()).await?;

        let mut request = client
            .get(url)
            .header(reqwest::header::USER_AGENT, &profile.user_agent);
        for (name, value) in &profile.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_lowercase(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response.text().await?;

        Ok(TransportResponse { status, headers, body })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    Status(u16),
    BotCheck(&'static str),
    Transport(String),
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::Status(code) => write!(f, "HTTP {}", code),
            BlockReason::BotCheck(phrase) => write!(f, "bot check page ('{}')", phrase),
            BlockReason::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Ok(u16),
    /// Non-retryable HTTP status.
    Http(u16),
    /// Every attempt was blocked or failed.
    Blocked(BlockReason),
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub url: String,
    pub document: String,
    pub status: FetchStatus,
    pub attempts: u32,
}

impl FetchOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self.status, FetchStatus::Ok(_))
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_cooldown: Duration,
    pub max_cooldown: Duration,
}

impl RetryPolicy {
    pub fn from_settings(fetch: &FetchSettings) -> Self {
        Self {
            max_attempts: fetch.max_attempts.max(1),
            base_cooldown: fetch.base_cooldown(),
            max_cooldown: fetch.max_cooldown(),
        }
    }

    /// Wait before the attempt after `attempt`. A server-provided
    /// `Retry-After` wins over the linear schedule; both are capped.
    pub fn cooldown(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let wait = retry_after.unwrap_or_else(|| self.base_cooldown.saturating_mul(attempt));
        wait.min(self.max_cooldown)
    }
}

pub fn is_blocking_status(status: u16) -> bool {
    matches!(status, 403 | 429 | 503)
}

/// First bot-check phrase found in `body`, if any.
pub fn detect_bot_page(body: &str) -> Option<&'static str> {
    let lower = body.to_lowercase();
    BOT_SIGNATURES.iter().copied().find(|sig| lower.contains(sig))
}

pub struct Fetcher {
    transport: Arc<dyn Transport>,
    profiles: Arc<ProfileProvider>,
    gate: Arc<SourceGate>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        profiles: Arc<ProfileProvider>,
        gate: Arc<SourceGate>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            profiles,
            gate,
            policy,
        }
    }

    pub fn gate(&self) -> &Arc<SourceGate> {
        &self.gate
    }

    /// Fetch the search page for `query` on `source`. Never fails; blocked
    /// or broken sources come back as a status with an empty document.
    pub async fn fetch(&self, source: &Source, query: &SearchQuery) -> FetchOutcome {
        let url = source.search_url(query);
        self.fetch_url(&source.name, &url, self.policy.max_attempts).await
    }

    /// Fetch an arbitrary page, gated under `gate_key`.
    pub async fn fetch_url(&self, gate_key: &str, url: &str, max_attempts: u32) -> FetchOutcome {
        let max_attempts = max_attempts.clamp(1, self.policy.max_attempts.max(1));
        let mut last_reason = BlockReason::Transport("not attempted".into());

        for attempt in 1..=max_attempts {
            let profile = self.profiles.next_profile(gate_key).await;

            let result = {
                let _permit = match self.gate.acquire(gate_key).await {
                    Ok(p) => p,
                    Err(e) => {
                        last_reason = BlockReason::Transport(e.to_string());
                        break;
                    }
                };
                profile.apply_delay().await;
                self.transport.get(url, &profile).await
            };

            let mut retry_after = None;
            let reason = match result {
                Ok(response) if is_blocking_status(response.status) => {
                    retry_after = response.retry_after();
                    BlockReason::Status(response.status)
                }
                Ok(response) if response.is_success() => match detect_bot_page(&response.body) {
                    Some(phrase) => BlockReason::BotCheck(phrase),
                    None => {
                        debug!(url, attempt, status = response.status, "fetched");
                        return FetchOutcome {
                            url: url.to_string(),
                            document: response.body,
                            status: FetchStatus::Ok(response.status),
                            attempts: attempt,
                        };
                    }
                },
                Ok(response) => {
                    info!(url, status = response.status, "non-retryable status");
                    return FetchOutcome {
                        url: url.to_string(),
                        document: String::new(),
                        status: FetchStatus::Http(response.status),
                        attempts: attempt,
                    };
                }
                Err(e) => BlockReason::Transport(e.to_string()),
            };

            self.gate.report_blocked(gate_key).await;

            if attempt < max_attempts {
                let wait = self.policy.cooldown(attempt, retry_after);
                warn!(
                    source = gate_key,
                    attempt,
                    reason = %reason,
                    "blocked, cooling down for {:?}",
                    wait
                );
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
            } else {
                warn!(source = gate_key, attempt, reason = %reason, "giving up");
            }
            last_reason = reason;
        }

        FetchOutcome {
            url: url.to_string(),
            document: String::new(),
            status: FetchStatus::Blocked(last_reason),
            attempts: max_attempts,
        }
    }
}
