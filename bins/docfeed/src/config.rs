use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use docfeed_api::{DEFAULT_COLLECTION, DEFAULT_DATABASE};
use docfeed_store_mongodb::MongoStoreConfig;
use docfeed_workload::{ProducerParams, WatcherParams};

use crate::error::DocfeedError;

#[derive(Parser)]
#[command(name = "docfeed", about = "Change-feed workload for a document store")]
pub struct Cli {
    /// Debug mode
    #[arg(long, global = true)]
    pub debug: bool,

    /// Path to docfeed.toml
    #[arg(long, global = true, default_value = "docfeed.toml", env = "DOCFEED_CONFIG")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Runs a producer that inserts and updates records in a DocumentDB.
    RunProducer(ProducerArgs),
    /// Runs a change-stream consumer that outputs records from a DocumentDB change-stream.
    RunConsumer(ConsumerArgs),
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct CommonArgs {
    /// Full connection string to a DocumentDB. Example:
    /// mongodb://<username>:<password>@<host>:27017/?ssl=true&ssl_ca_certs=rds-combined-ca-bundle.pem&replicaSet=rs0&readPreference=secondaryPreferred&retryWrites=false
    #[arg(long, env = "DOCFEED_CONNECTION_STRING", hide_env_values = true)]
    pub connection_string: Option<String>,

    /// Database name (default myNewDB). Producer and consumer must agree
    /// on it; the namespace is logged at startup.
    #[arg(long)]
    pub database: Option<String>,

    /// Collection name (default people). Must match the other side.
    #[arg(long)]
    pub collection: Option<String>,

    /// Stop the run after this many seconds
    #[arg(long)]
    pub deadline: Option<u64>,
}

#[derive(Args, Clone, Debug)]
pub struct ProducerArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Number of records to insert (default 1)
    #[arg(long)]
    pub inserts: Option<usize>,

    /// Number of updates to perform on each inserted record (default 10)
    #[arg(long)]
    pub updates: Option<usize>,

    /// Milliseconds to pause before inserting another record (default 10)
    #[arg(long)]
    pub delay_between_inserts: Option<u64>,

    /// Milliseconds to pause before performing an update (default 10)
    #[arg(long)]
    pub delay_between_updates: Option<u64>,
}

#[derive(Args, Clone, Debug)]
pub struct ConsumerArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Stop after this many change events
    #[arg(long)]
    pub max_events: Option<u64>,
}

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    pub connection_string: Option<String>,
    pub database: Option<String>,
    pub collection: Option<String>,
    #[serde(default)]
    pub producer: ProducerSection,
    #[serde(default)]
    pub consumer: ConsumerSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProducerSection {
    pub inserts: Option<usize>,
    pub updates: Option<usize>,
    pub delay_between_inserts_ms: Option<u64>,
    pub delay_between_updates_ms: Option<u64>,
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConsumerSection {
    pub max_events: Option<u64>,
    pub deadline_secs: Option<u64>,
}

pub fn load_config(path: &str) -> Result<Config, DocfeedError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| DocfeedError::Config { context: "read", detail: format!("'{path}': {e}") })?;
    toml::from_str(&content)
        .map_err(|e| DocfeedError::Config { context: "parse", detail: format!("'{path}': {e}") })
}

/// The config file is optional; a present but broken one is an error.
pub fn load_config_or_default(path: &str) -> Result<Config, DocfeedError> {
    if !std::path::Path::new(path).exists() {
        return Ok(Config::default());
    }
    load_config(path)
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

/// Store coordinates after merging: config file < env/CLI.
#[derive(Debug, Clone)]
pub struct Target {
    pub connection_string: String,
    pub database: String,
    pub collection: String,
}

impl Target {
    fn new(args: &CommonArgs, cfg: &Config) -> Result<Self, DocfeedError> {
        let connection_string = args
            .connection_string
            .clone()
            .or_else(|| cfg.connection_string.clone())
            .ok_or(DocfeedError::Config {
                context: "connection",
                detail: "--connection-string (or DOCFEED_CONNECTION_STRING) is required".into(),
            })?;

        Ok(Self {
            connection_string,
            database: args.database.clone().or_else(|| cfg.database.clone()).unwrap_or_else(|| DEFAULT_DATABASE.into()),
            collection: args
                .collection
                .clone()
                .or_else(|| cfg.collection.clone())
                .unwrap_or_else(|| DEFAULT_COLLECTION.into()),
        })
    }

    pub fn store_config(&self) -> MongoStoreConfig {
        MongoStoreConfig {
            connection_string: self.connection_string.clone(),
            database: self.database.clone(),
            collection: self.collection.clone(),
            ping: true,
        }
    }

    /// `db.collection`, safe to log (no credentials).
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

pub struct EffectiveProducer {
    pub target: Target,
    pub params: ProducerParams,
    pub deadline: Option<Duration>,
}

impl EffectiveProducer {
    pub fn new(args: &ProducerArgs, cfg: &Config) -> Result<Self, DocfeedError> {
        let defaults = ProducerParams::default();
        let section = &cfg.producer;
        let params = ProducerParams {
            inserts: args.inserts.or(section.inserts).unwrap_or(defaults.inserts),
            updates: args.updates.or(section.updates).unwrap_or(defaults.updates),
            delay_between_inserts: args
                .delay_between_inserts
                .or(section.delay_between_inserts_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.delay_between_inserts),
            delay_between_updates: args
                .delay_between_updates
                .or(section.delay_between_updates_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.delay_between_updates),
        };

        Ok(Self {
            target: Target::new(&args.common, cfg)?,
            params,
            deadline: args.common.deadline.or(section.deadline_secs).map(Duration::from_secs),
        })
    }
}

pub struct EffectiveConsumer {
    pub target: Target,
    pub params: WatcherParams,
    pub deadline: Option<Duration>,
}

impl EffectiveConsumer {
    pub fn new(args: &ConsumerArgs, cfg: &Config) -> Result<Self, DocfeedError> {
        let section = &cfg.consumer;
        Ok(Self {
            target: Target::new(&args.common, cfg)?,
            params: WatcherParams { max_events: args.max_events.or(section.max_events) },
            deadline: args.common.deadline.or(section.deadline_secs).map(Duration::from_secs),
        })
    }
}
