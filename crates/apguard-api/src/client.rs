// Access-point controller REST client.
//
// Base path: configurable (e.g. http://127.0.0.1:8841/v1/)
// Auth: optional bearer token

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{ApcConfig, StationTable};
use crate::transport::TransportConfig;

// ── Error response shape ─────────────────────────────────────────────

#[derive(serde::Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Bulk rule upload body.
#[derive(Serialize)]
struct RuleBatch<'a, R: Serialize> {
    rules: &'a [R],
    replace: bool,
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for the access-point controller.
///
/// Reads the active SSID profile configuration and the live station
/// table, and mirrors firewall rules upstream.
pub struct ApcClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApcClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build from a base URL and transport config.
    pub fn new(base_url: &str, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Self::from_reqwest(base_url, http)
    }

    /// Wrap an existing `reqwest::Client` (caller manages auth headers).
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let base_url = Self::normalize_base_url(base_url)?;
        Ok(Self { http, base_url })
    }

    /// Ensure the base URL ends with `/` so relative joins stay under it.
    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let mut url = Url::parse(raw)?;
        let path = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{path}/"));
        Ok(url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Fetch the active configuration, including the SSID profile map.
    pub async fn get_config(&self) -> Result<ApcConfig, Error> {
        self.get("config/active").await
    }

    /// Fetch the complete station-to-SSID (and PSK group) mapping.
    pub async fn get_all_ssid_status(&self) -> Result<StationTable, Error> {
        self.get("status/ssid").await
    }

    /// Create or replace a single rule.
    pub async fn update_rule<R: Serialize + Sync>(&self, pid: &str, rule: &R) -> Result<(), Error> {
        self.put_no_response(&format!("rules/{pid}"), rule).await
    }

    /// Upload a batch of rules. With `replace`, the controller drops every
    /// rule not in the batch.
    pub async fn update_rules<R: Serialize + Sync>(
        &self,
        rules: &[R],
        replace: bool,
    ) -> Result<(), Error> {
        self.post_no_response("rules", &RuleBatch { rules, replace })
            .await
    }

    /// Delete a rule. Deleting an unknown rule is not an error.
    pub async fn delete_rule(&self, pid: &str) -> Result<(), Error> {
        match self.delete(&format!("rules/{pid}")).await {
            Err(e) if e.is_not_found() => {
                debug!(pid, "rule already absent upstream");
                Ok(())
            }
            other => other,
        }
    }

    // ── URL builder ──────────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("GET {url}");

        let resp = self.http.get(url).send().await?;
        self.handle_response(resp).await
    }

    async fn put_no_response<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<(), Error> {
        let url = self.url(path)?;
        debug!("PUT {url}");

        let resp = self.http.put(url).json(body).send().await?;
        self.handle_empty(resp).await
    }

    async fn post_no_response<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<(), Error> {
        let url = self.url(path)?;
        debug!("POST {url}");

        let resp = self.http.post(url).json(body).send().await?;
        self.handle_empty(resp).await
    }

    async fn delete(&self, path: &str) -> Result<(), Error> {
        let url = self.url(path)?;
        debug!("DELETE {url}");

        let resp = self.http.delete(url).send().await?;
        self.handle_empty(resp).await
    }

    // ── Response handling ────────────────────────────────────────────

    async fn handle_response<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await?;
            serde_json::from_str(&body).map_err(|e| {
                let preview: String = body.chars().take(200).collect();
                Error::Deserialization {
                    message: format!("{e} (body preview: {preview:?})"),
                    body,
                }
            })
        } else {
            Err(self.parse_error(status, resp).await)
        }
    }

    async fn handle_empty(&self, resp: reqwest::Response) -> Result<(), Error> {
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(self.parse_error(status, resp).await)
        }
    }

    async fn parse_error(&self, status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Error::Unauthorized;
        }

        let raw = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&raw)
            .ok()
            .and_then(|e| e.message.or(e.error))
            .unwrap_or_else(|| {
                if raw.is_empty() {
                    status.to_string()
                } else {
                    raw
                }
            });

        Error::Http {
            status: status.as_u16(),
            message,
        }
    }
}
