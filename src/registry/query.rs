// src/registry/query.rs
use std::collections::BTreeMap;

use serde_json::Value;

use super::attrs::ServerAttr;

/// Attribute name -> value for one server record.
pub type AttrMap = BTreeMap<ServerAttr, Value>;

/// Server id -> attributes for one service.
pub type ServiceServers = BTreeMap<u64, AttrMap>;

/// Service name -> server id -> attributes.
///
/// A service appears as a key only if its read succeeded; an absent key
/// means that service's request failed.
pub type StatusMap = BTreeMap<String, ServiceServers>;

/// Parameters for a server status read.
#[derive(Debug, Clone, Default)]
pub struct StatusQuery {
    /// Services to query; `None` means every discovered service.
    pub services: Option<Vec<String>>,
    /// Attributes to retrieve; `None` means address and down flag.
    pub fields: Option<Vec<ServerAttr>>,
    /// Positional restriction to a single server, honored only when exactly
    /// one service is queried.
    pub server_index: Option<usize>,
}

impl StatusQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = Some(services.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_fields<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = ServerAttr>,
    {
        self.fields = Some(fields.into_iter().collect());
        self
    }

    pub fn with_server_index(mut self, index: usize) -> Self {
        self.server_index = Some(index);
        self
    }

    pub(crate) fn effective_fields(&self) -> Vec<ServerAttr> {
        self.fields
            .clone()
            .unwrap_or_else(|| vec![ServerAttr::Server, ServerAttr::Down])
    }
}
