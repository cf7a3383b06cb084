//! Verification stages used by the probe policy
//!
//! Each stage answers one question about a candidate and never writes
//! anything. Network failures are folded into the returned
//! [`StageOutcome`] instead of being propagated.

use crate::config::ProbeConfig;
use crate::error::StageError;
use crate::proxy::models::{Candidate, StageKind, StageOutcome};
use async_trait::async_trait;
use reqwest::{header, Client, Proxy as ReqwestProxy, StatusCode, Url};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// `server` header value that marks a Cloudflare-fronted proxy
const CLOUDFLARE: &str = "cloudflare";

/// A single verification strategy
#[async_trait]
pub trait ProbeStage: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn probe(&self, candidate: &Candidate) -> StageOutcome;
}

/// Run `fut` under both the client timeout and an outer deadline
async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, StageError>
where
    F: Future<Output = Result<T, reqwest::Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) if e.is_timeout() => Err(StageError::Timeout(timeout)),
        Ok(Err(e)) => Err(StageError::Request(e)),
        Err(_) => Err(StageError::Timeout(timeout)),
    }
}

/// True for the answer a working Cloudflare-fronted proxy gives to a plain
/// request for a foreign host.
pub fn is_cloudflare_block(status: StatusCode, server: Option<&str>) -> bool {
    status == StatusCode::BAD_REQUEST
        && server.is_some_and(|s| s.trim().eq_ignore_ascii_case(CLOUDFLARE))
}

/// Stage A: fetch a well-known URL through the candidate acting as an HTTP
/// proxy and inspect the reply.
#[derive(Debug, Clone)]
pub struct DirectProbe {
    url: String,
    timeout: Duration,
}

impl DirectProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    /// A fresh client per candidate since the proxy is part of the client
    fn create_client(&self, candidate: &Candidate) -> Result<Client, StageError> {
        let proxy = ReqwestProxy::all(candidate.proxy_url()).map_err(StageError::Client)?;
        Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()
            .map_err(StageError::Client)
    }

    async fn fetch(&self, candidate: &Candidate) -> Result<(StatusCode, Option<String>), StageError> {
        let client = self.create_client(candidate)?;
        let response = bounded(self.timeout, client.get(&self.url).send()).await?;

        let server = response
            .headers()
            .get(header::SERVER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Ok((response.status(), server))
    }
}

#[async_trait]
impl ProbeStage for DirectProbe {
    fn kind(&self) -> StageKind {
        StageKind::Direct
    }

    async fn probe(&self, candidate: &Candidate) -> StageOutcome {
        match self.fetch(candidate).await {
            Ok((status, server)) if is_cloudflare_block(status, server.as_deref()) => {
                StageOutcome::Active
            }
            Ok((status, server)) => StageOutcome::Inactive(format!(
                "status {}, server {}",
                status.as_u16(),
                server.as_deref().unwrap_or("-")
            )),
            Err(e) => StageOutcome::Unreachable(e.to_string()),
        }
    }
}

/// Body shapes the verification service is known to return
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VerifyResponse {
    Status { status: String },
    ProxyIp(Vec<ProxyIpEntry>),
}

#[derive(Debug, Deserialize)]
struct ProxyIpEntry {
    #[serde(default)]
    proxyip: bool,
}

/// Interpret a verification response body.
///
/// `{"status": "active"}` is the only active answer in object form; the list
/// form is active when its first entry carries `"proxyip": true`.
pub fn parse_verify_body(body: &str) -> Result<bool, StageError> {
    let parsed: VerifyResponse = serde_json::from_str(body)?;
    Ok(match parsed {
        VerifyResponse::Status { status } => status == "active",
        VerifyResponse::ProxyIp(entries) => entries.first().is_some_and(|e| e.proxyip),
    })
}

/// Stage B: ask an external verification service about the candidate.
#[derive(Debug, Clone)]
pub struct VerificationApi {
    client: Client,
    url: String,
    host: String,
    timeout: Duration,
}

impl VerificationApi {
    pub fn new(
        url: impl Into<String>,
        host: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StageError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(StageError::Client)?;

        Ok(Self {
            client,
            url: url.into(),
            host: host.into(),
            timeout,
        })
    }

    /// Expand the endpoint for one candidate.
    ///
    /// Templates containing `{ip}` or `{port}` are filled in place; anything
    /// else gets `ip`, `host`, `port` and `tls` query parameters.
    pub fn request_url(&self, candidate: &Candidate) -> Result<Url, StageError> {
        let port = candidate.port.to_string();

        if self.url.contains("{ip}") || self.url.contains("{port}") {
            let url = self
                .url
                .replace("{ip}", &candidate.address)
                .replace("{port}", &port);
            return Url::parse(&url).map_err(|e| StageError::Url(format!("{url}: {e}")));
        }

        Url::parse_with_params(
            &self.url,
            [
                ("ip", candidate.address.as_str()),
                ("host", self.host.as_str()),
                ("port", port.as_str()),
                ("tls", "true"),
            ],
        )
        .map_err(|e| StageError::Url(format!("{}: {e}", self.url)))
    }

    async fn verify(&self, candidate: &Candidate) -> Result<bool, StageError> {
        let url = self.request_url(candidate)?;
        let response = bounded(self.timeout, self.client.get(url).send()).await?;

        if response.status() != StatusCode::OK {
            return Err(StageError::Status(response.status()));
        }

        let body = bounded(self.timeout, response.text()).await?;
        parse_verify_body(&body)
    }
}

#[async_trait]
impl ProbeStage for VerificationApi {
    fn kind(&self) -> StageKind {
        StageKind::Verify
    }

    async fn probe(&self, candidate: &Candidate) -> StageOutcome {
        match self.verify(candidate).await {
            Ok(true) => StageOutcome::Active,
            Ok(false) => StageOutcome::Inactive("verification service reports inactive".into()),
            Err(e @ (StageError::Status(_) | StageError::Body(_))) => {
                StageOutcome::Inactive(e.to_string())
            }
            Err(e) => StageOutcome::Unreachable(e.to_string()),
        }
    }
}

/// Build the stage named by `kind` from a probe configuration
pub fn build_stage(kind: StageKind, config: &ProbeConfig) -> Result<Box<dyn ProbeStage>, StageError> {
    let stage: Box<dyn ProbeStage> = match kind {
        StageKind::Direct => Box::new(DirectProbe::new(&config.direct_url, config.timeout)),
        StageKind::Verify => Box::new(VerificationApi::new(
            &config.verify_url,
            &config.verify_host,
            config.timeout,
        )?),
    };
    Ok(stage)
}
