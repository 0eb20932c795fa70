// src/main.rs
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use upstreamctl::{
    config::{self, Config},
    registry::{AttributePatch, RegistryClient, ServerAttr, StatusMap, StatusQuery},
};

#[derive(Parser)]
#[command(name = "upstreamctl", version)]
#[command(about = "Operate Nginx stream upstream pools over the REST management API")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the management hosts from the config file
    #[arg(short = 'a', long = "host", global = true, value_name = "HOST")]
    hosts: Vec<String>,

    /// Override the management API port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Log filter (e.g. "debug" or "upstreamctl=trace")
    #[arg(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the configured upstream services
    Services,

    /// Show server status per service
    Status {
        /// Services to query (default: every discovered service)
        #[arg(short, long = "service", value_name = "NAME")]
        services: Vec<String>,

        /// Restrict to one server position; only honored for a single service
        #[arg(short = 'i', long)]
        server_index: Option<usize>,

        /// Attributes to show (default: server, down)
        #[arg(short, long = "field", value_parser = ServerAttr::from_str)]
        fields: Vec<ServerAttr>,
    },

    /// Set server attributes and verify them on read-back
    Set {
        /// Service whose servers get patched
        service: String,

        /// Attribute assignments as name:value pairs (e.g. down:true)
        #[arg(required = true, value_name = "NAME:VALUE")]
        attributes: Vec<String>,

        /// Patch a single server id (default: every server in the service)
        #[arg(short = 'i', long)]
        server_id: Option<u64>,
    },

    /// Print a key-value zone as name:port lines sorted by port
    Domains {
        /// Keyval zone to read
        #[arg(short, long, default_value = "los")]
        zone: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("upstreamctl=info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = config::load_config(&cli.config).await?;
    if !cli.hosts.is_empty() {
        config.hosts = cli.hosts.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    config.validate()?;

    let mut ok = true;
    for host in &config.hosts {
        let client = client_for(&config, host)?;
        println!("=== {host} ===");
        ok &= match &cli.command {
            Commands::Services => run_services(&client).await?,
            Commands::Status {
                services,
                server_index,
                fields,
            } => run_status(&client, services, *server_index, fields).await?,
            Commands::Set {
                service,
                attributes,
                server_id,
            } => run_set(&client, service, attributes, *server_id).await?,
            Commands::Domains { zone } => run_domains(&client, zone).await?,
        };
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn client_for(config: &Config, host: &str) -> Result<RegistryClient> {
    Ok(RegistryClient::new(
        config.base_url(host)?,
        &config.username,
        &config.password,
    ))
}

async fn run_services(client: &RegistryClient) -> Result<bool> {
    for service in client.services().await? {
        println!("{service}");
    }
    Ok(true)
}

async fn run_status(
    client: &RegistryClient,
    services: &[String],
    server_index: Option<usize>,
    fields: &[ServerAttr],
) -> Result<bool> {
    let mut query = StatusQuery::new();
    if !services.is_empty() {
        query = query.with_services(services.iter().cloned());
    }
    if !fields.is_empty() {
        query = query.with_fields(fields.iter().copied());
    }
    if let Some(index) = server_index {
        query = query.with_server_index(index);
    }

    let status = client.server_status(&query).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(true)
}

async fn run_set(
    client: &RegistryClient,
    service: &str,
    attributes: &[String],
    server_id: Option<u64>,
) -> Result<bool> {
    let mut pairs = Vec::new();
    for raw in attributes {
        let Some((name, value)) = raw.split_once(':') else {
            bail!("malformed attribute assignment (expected name:value): {raw}");
        };
        pairs.push((name, value));
    }
    let patch = AttributePatch::from_pairs(pairs);
    if patch.is_empty() {
        bail!("no recognized attributes to set");
    }

    let query = StatusQuery::new()
        .with_services([service])
        .with_fields(patch.fields());

    let before = restrict_to_server(client.server_status(&query).await?, server_id);
    println!("BEFORE:\n{}", serde_json::to_string_pretty(&before)?);

    let report = client.set_server_attributes(service, &patch, server_id).await?;

    let after = restrict_to_server(client.server_status(&query).await?, server_id);
    println!("AFTER:\n{}", serde_json::to_string_pretty(&after)?);

    Ok(report.all_verified())
}

/// When a single server is being patched, show only that server in the
/// before/after status.
fn restrict_to_server(mut status: StatusMap, server_id: Option<u64>) -> StatusMap {
    if let Some(id) = server_id {
        for servers in status.values_mut() {
            servers.retain(|record_id, _| *record_id == id);
        }
    }
    status
}

async fn run_domains(client: &RegistryClient, zone: &str) -> Result<bool> {
    let mut entries: Vec<(String, String)> =
        client.stream_keyvals(zone).await?.into_iter().collect();
    entries.sort_by_key(|(_, port)| port.parse::<u32>().unwrap_or(u32::MAX));
    for (name, port) in entries {
        println!("{name}:{port}");
    }
    Ok(true)
}
