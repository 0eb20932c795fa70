// src/registry/update.rs
use std::collections::BTreeMap;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{error, info};

use super::attrs::AttributePatch;
use super::client::RegistryClient;
use super::query::StatusQuery;

/// Terminal outcome of the apply-then-verify protocol for one server id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Patch accepted and every attribute read back with the requested value.
    Verified,
    /// The PATCH request itself was rejected or failed in transit.
    PatchFailed,
    /// Patch accepted, but at least one read-back value disagreed.
    Mismatch,
    /// Patch accepted, but the server id was absent on read-back.
    NotFound,
}

impl ApplyOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, ApplyOutcome::Verified)
    }
}

/// Per-server outcomes of one `set_server_attributes` call.
#[derive(Debug, Default)]
pub struct UpdateReport {
    pub outcomes: BTreeMap<u64, ApplyOutcome>,
    /// Set when the target servers could not be enumerated at all, so zero
    /// outcomes must not read as success.
    pub service_unreadable: bool,
}

impl UpdateReport {
    fn service_unreadable() -> Self {
        Self {
            service_unreadable: true,
            ..Self::default()
        }
    }

    /// True only if the targets were enumerated and every targeted server
    /// verified. Failures never stop later servers from being attempted, so
    /// this is an AND over all of them, not a short-circuit.
    pub fn all_verified(&self) -> bool {
        !self.service_unreadable && self.outcomes.values().all(ApplyOutcome::is_verified)
    }
}

impl RegistryClient {
    /// Apply a patch to one server, or to every server currently in the
    /// service when `server_id` is `None`.
    ///
    /// Each server runs the full apply-then-verify protocol before the next
    /// one starts. There are no retries and no rollback: the remote state is
    /// authoritative, and a verification mismatch is only reported.
    pub async fn set_server_attributes(
        &self,
        service: &str,
        patch: &AttributePatch,
        server_id: Option<u64>,
    ) -> Result<UpdateReport> {
        let targets = match server_id {
            Some(id) => vec![id],
            None => match self.server_ids(service).await? {
                Some(ids) => ids,
                None => {
                    error!("cannot enumerate servers for {service}, nothing applied");
                    return Ok(UpdateReport::service_unreadable());
                }
            },
        };
        info!("service {service} has {} target server(s)", targets.len());

        let mut report = UpdateReport::default();
        for id in targets {
            let outcome = if self.apply_patch(service, id, patch).await? {
                self.verify_patch(service, id, patch).await?
            } else {
                ApplyOutcome::PatchFailed
            };
            report.outcomes.insert(id, outcome);
        }
        Ok(report)
    }

    async fn apply_patch(&self, service: &str, id: u64, patch: &AttributePatch) -> Result<bool> {
        let url = self.endpoint(&format!("/stream/upstreams/{service}/servers/{id}"))?;
        for (attr, value) in patch.iter() {
            info!("setting {service} server #{id} {attr} = {value}");
        }

        let resp = match self
            .authed(self.http_patch(url.clone()))
            .json(&patch.body())
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                error!("PATCH {url} failed: {err}");
                return Ok(false);
            }
        };

        if resp.status() != StatusCode::OK {
            error!(
                "unexpected response from PATCH {url}: status code {}",
                resp.status()
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Re-read the target server restricted to the patched fields and
    /// compare each value against what was requested.
    async fn verify_patch(
        &self,
        service: &str,
        id: u64,
        patch: &AttributePatch,
    ) -> Result<ApplyOutcome> {
        let query = StatusQuery::new()
            .with_services([service])
            .with_fields(patch.fields());
        let status = self.server_status(&query).await?;

        let Some(attrs) = status.get(service).and_then(|servers| servers.get(&id)) else {
            error!("unknown server id {id} for {service}");
            return Ok(ApplyOutcome::NotFound);
        };

        let mut verified = true;
        for (attr, want) in patch.iter() {
            let matched = attrs.get(attr).is_some_and(|got| values_match(got, want));
            info!(
                "verifying {service} server #{id} {attr} = {want}: {}",
                if matched { "PASS" } else { "FAIL" }
            );
            verified &= matched;
        }

        Ok(if verified {
            ApplyOutcome::Verified
        } else {
            ApplyOutcome::Mismatch
        })
    }
}

/// Case-insensitive comparison over the string form, so a requested
/// `"true"` matches a JSON `true` on read-back.
fn values_match(got: &Value, want: &Value) -> bool {
    canonical(got).eq_ignore_ascii_case(&canonical(want))
}

fn canonical(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
