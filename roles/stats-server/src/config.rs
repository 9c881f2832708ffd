use serde::Deserialize;
use std::{env, fs};

#[derive(Debug, Clone)]
pub struct Config {
    pub bus_address: String,
    pub bus_topic: String,
    pub bus_group: String,
    pub http_address: String,
    pub db_path: String,
    pub flush_interval_secs: u64,
    pub flush_batch_size: usize,
    pub worker_idle_secs: u32,
}

#[derive(Debug, Default, Deserialize)]
struct StatsServerConfig {
    #[serde(default)]
    bus: BusConfig,
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    flush: FlushConfig,
}

#[derive(Debug, Default, Deserialize)]
struct BusConfig {
    address: Option<String>,
    topic: Option<String>,
    group: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerConfig {
    http_listen_address: Option<String>,
    db_path: Option<String>,
    worker_idle_secs: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct FlushConfig {
    interval_secs: Option<u64>,
    batch_size: Option<usize>,
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

impl Config {
    pub fn from_args() -> Result<Self, Box<dyn std::error::Error>> {
        let args: Vec<String> = env::args().collect();

        let config_str = arg_value(&args, "--config")
            .or_else(|| arg_value(&args, "-c"))
            .map(|path| fs::read_to_string(path).unwrap_or_default())
            .unwrap_or_default();
        let file: StatsServerConfig = if config_str.is_empty() {
            StatsServerConfig::default()
        } else {
            toml::from_str(&config_str)?
        };

        Ok(Config {
            bus_address: arg_value(&args, "--bus-address")
                .or(file.bus.address)
                .unwrap_or_else(|| "127.0.0.1:9092".to_string()),
            bus_topic: file.bus.topic.unwrap_or_else(|| "ShareLog".to_string()),
            bus_group: file.bus.group.unwrap_or_else(|| "stats-live".to_string()),
            http_address: arg_value(&args, "--http-address")
                .or(file.server.http_listen_address)
                .unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            db_path: arg_value(&args, "--db-path")
                .or(file.server.db_path)
                .unwrap_or_else(|| "data/stats.db".to_string()),
            flush_interval_secs: file.flush.interval_secs.unwrap_or(15),
            flush_batch_size: file.flush.batch_size.unwrap_or(200),
            worker_idle_secs: file.server.worker_idle_secs.unwrap_or(3600),
        })
    }
}
