// src/registry/attrs.rs
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// The fixed set of server attributes the management API exposes.
///
/// Patches and field filters are restricted to this set; anything else is
/// rejected at the boundary before a request is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerAttr {
    Backup,
    Down,
    FailTimeout,
    Id,
    MaxConns,
    MaxFails,
    Server,
    Weight,
}

impl ServerAttr {
    pub const ALL: [ServerAttr; 8] = [
        ServerAttr::Backup,
        ServerAttr::Down,
        ServerAttr::FailTimeout,
        ServerAttr::Id,
        ServerAttr::MaxConns,
        ServerAttr::MaxFails,
        ServerAttr::Server,
        ServerAttr::Weight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerAttr::Backup => "backup",
            ServerAttr::Down => "down",
            ServerAttr::FailTimeout => "fail_timeout",
            ServerAttr::Id => "id",
            ServerAttr::MaxConns => "max_conns",
            ServerAttr::MaxFails => "max_fails",
            ServerAttr::Server => "server",
            ServerAttr::Weight => "weight",
        }
    }
}

impl fmt::Display for ServerAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown server attribute: {0}")]
pub struct UnknownAttr(pub String);

impl FromStr for ServerAttr {
    type Err = UnknownAttr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServerAttr::ALL
            .iter()
            .find(|attr| attr.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownAttr(s.to_string()))
    }
}

/// A partial set of server attributes a caller wants to change.
///
/// Built from operator-supplied `name:value` pairs; names outside
/// [`ServerAttr::ALL`] are dropped with a warning so a request the API would
/// reject for an unrecognized field is never sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributePatch {
    entries: BTreeMap<ServerAttr, Value>,
}

impl AttributePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, attr: ServerAttr, value: Value) {
        self.entries.insert(attr, value);
    }

    /// Build a patch from string pairs, filtering out unrecognized names.
    ///
    /// Values are parsed as JSON scalars where possible (`"true"` becomes a
    /// boolean, `"5"` a number) and kept as strings otherwise, so the PATCH
    /// body carries the types the API expects.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut patch = Self::new();
        for (name, raw) in pairs {
            match name.parse::<ServerAttr>() {
                Ok(attr) => patch.set(attr, parse_scalar(raw)),
                Err(err) => warn!("ignoring attribute in patch: {err}"),
            }
        }
        patch
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The attribute names this patch touches, in stable order.
    pub fn fields(&self) -> Vec<ServerAttr> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ServerAttr, &Value)> {
        self.entries.iter()
    }

    /// JSON object used as the PATCH request body.
    pub fn body(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(attr, value)| (attr.as_str().to_string(), value.clone()))
                .collect(),
        )
    }
}

fn parse_scalar(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Bool(_) | Value::Number(_) | Value::Null)) => v,
        _ => Value::String(raw.to_string()),
    }
}
