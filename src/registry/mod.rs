// src/registry/mod.rs
mod attrs;
mod client;
mod query;
mod update;

pub use attrs::{AttributePatch, ServerAttr, UnknownAttr};
pub use client::{PeerRecord, RegistryClient, UpstreamSummary};
pub use query::{AttrMap, ServiceServers, StatusMap, StatusQuery};
pub use update::{ApplyOutcome, UpdateReport};
