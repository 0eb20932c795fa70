// src/registry/client.rs
use std::collections::BTreeMap;

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, warn};
use url::Url;

use super::attrs::ServerAttr;
use super::query::{AttrMap, ServiceServers, StatusMap, StatusQuery};

/// Client for the load balancer's upstream management API.
///
/// The remote balancer is the single source of truth: nothing is cached, and
/// every read is a live request. HTTP and transport failures are logged with
/// the offending URL and surface as empty or partial results, never as
/// errors; the only error a caller sees is a 200 response whose body fails to
/// parse, which signals an API contract change.
pub struct RegistryClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
}

/// One upstream pool as reported by the discovery endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSummary {
    #[serde(default)]
    pub peers: Vec<PeerRecord>,
    #[serde(default)]
    pub zone: Option<String>,
}

/// Minimal view of a pool member from the discovery payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerRecord {
    pub id: u64,
    pub server: String,
}

impl RegistryClient {
    /// Construction performs no I/O; bad credentials only show up on the
    /// first request.
    pub fn new(base_url: Url, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url,
            username: username.into(),
            password: password.into(),
        }
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url> {
        let raw = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);
        raw.parse()
            .with_context(|| format!("invalid endpoint URL: {raw}"))
    }

    pub(crate) fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.username, Some(&self.password))
    }

    pub(crate) fn http_patch(&self, url: Url) -> RequestBuilder {
        self.http.patch(url)
    }

    /// Fetch the discovery payload: every configured service with its peers.
    ///
    /// Non-200 responses and transport failures yield an empty map.
    pub async fn upstream_info(&self) -> Result<BTreeMap<String, UpstreamSummary>> {
        let url = self.endpoint("/stream/upstreams/")?;
        let resp = match self.authed(self.http.get(url.clone())).send().await {
            Ok(resp) => resp,
            Err(err) => {
                error!("GET {url} failed: {err}");
                return Ok(BTreeMap::new());
            }
        };

        if resp.status() != StatusCode::OK {
            error!(
                "unexpected response from GET {url}: status code {}",
                resp.status()
            );
            return Ok(BTreeMap::new());
        }

        resp.json()
            .await
            .with_context(|| format!("unparseable upstream payload from {url}"))
    }

    /// Names of the configured services. Empty on discovery failure.
    pub async fn services(&self) -> Result<Vec<String>> {
        Ok(self.upstream_info().await?.into_keys().collect())
    }

    /// Number of peers in one service, or `None` if the service is not in
    /// the discovery payload.
    pub async fn server_count(&self, service: &str) -> Result<Option<usize>> {
        Ok(self
            .upstream_info()
            .await?
            .get(service)
            .map(|upstream| upstream.peers.len()))
    }

    /// Server ids currently present in one service, read live.
    ///
    /// `None` means the service could not be read (HTTP failure or unknown
    /// service), which is distinct from a readable service with no servers.
    pub async fn server_ids(&self, service: &str) -> Result<Option<Vec<u64>>> {
        let query = StatusQuery::new()
            .with_services([service])
            .with_fields([ServerAttr::Id]);
        let status = self.server_status(&query).await?;
        Ok(status
            .get(service)
            .map(|servers| servers.keys().copied().collect()))
    }

    /// Read server status for the queried services.
    ///
    /// One request per service, issued in order; a failed service is logged
    /// and skipped so the result is partial rather than aborted. Each
    /// returned record is restricted to the requested fields.
    pub async fn server_status(&self, query: &StatusQuery) -> Result<StatusMap> {
        let services = match &query.services {
            Some(list) => list.clone(),
            None => self.services().await?,
        };
        let fields = query.effective_fields();

        let server_index = match query.server_index {
            Some(index) if services.len() != 1 => {
                warn!(
                    "server index {index} ignored: {} services requested",
                    services.len()
                );
                None
            }
            other => other,
        };

        let mut status = StatusMap::new();
        for service in &services {
            let url = self.endpoint(&format!("/stream/upstreams/{service}/servers/"))?;
            let resp = match self.authed(self.http.get(url.clone())).send().await {
                Ok(resp) => resp,
                Err(err) => {
                    error!("GET {url} failed: {err}");
                    continue;
                }
            };
            if resp.status() != StatusCode::OK {
                error!(
                    "unexpected response from GET {url}: status code {}",
                    resp.status()
                );
                continue;
            }

            let records: Vec<serde_json::Map<String, Value>> = resp
                .json()
                .await
                .with_context(|| format!("unparseable server list from {url}"))?;

            let mut servers = ServiceServers::new();
            for (index, record) in records.iter().enumerate() {
                if server_index.is_some_and(|want| want != index) {
                    continue;
                }
                let Some(id) = record.get(ServerAttr::Id.as_str()).and_then(Value::as_u64)
                else {
                    warn!("server record without a numeric id in {service}, skipping");
                    continue;
                };
                let mut attrs = AttrMap::new();
                for field in &fields {
                    if let Some(value) = record.get(field.as_str()) {
                        attrs.insert(*field, value.clone());
                    }
                }
                servers.insert(id, attrs);
            }
            status.insert(service.clone(), servers);
        }

        Ok(status)
    }

    /// Read one key-value zone. Empty on HTTP failure, like discovery.
    pub async fn stream_keyvals(&self, zone: &str) -> Result<BTreeMap<String, String>> {
        let url = self.endpoint(&format!("/stream/keyvals/{zone}"))?;
        let resp = match self.authed(self.http.get(url.clone())).send().await {
            Ok(resp) => resp,
            Err(err) => {
                error!("GET {url} failed: {err}");
                return Ok(BTreeMap::new());
            }
        };
        if resp.status() != StatusCode::OK {
            error!(
                "unexpected response from GET {url}: status code {}",
                resp.status()
            );
            return Ok(BTreeMap::new());
        }

        let raw: BTreeMap<String, Value> = resp
            .json()
            .await
            .with_context(|| format!("unparseable keyval payload from {url}"))?;
        Ok(raw
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect())
    }
}
