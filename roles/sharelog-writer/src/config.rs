use serde::Deserialize;
use std::{env, fs};

#[derive(Debug, Clone)]
pub struct Config {
    pub bus_address: String,
    pub bus_topic: String,
    pub bus_group: String,
    pub data_dir: String,
    pub flush_threshold: usize,
    pub idle_flush_secs: u64,
    pub housekeeping_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
struct WriterFileConfig {
    #[serde(default)]
    bus: BusConfig,
    #[serde(default)]
    writer: WriterConfig,
}

#[derive(Debug, Default, Deserialize)]
struct BusConfig {
    address: Option<String>,
    topic: Option<String>,
    group: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WriterConfig {
    data_dir: Option<String>,
    flush_threshold: Option<usize>,
    idle_flush_secs: Option<u64>,
    housekeeping_secs: Option<u64>,
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
        let file: WriterFileConfig = if config_str.is_empty() {
            WriterFileConfig::default()
        } else {
            toml::from_str(&config_str)?
        };

        Ok(Config {
            bus_address: arg_value(&args, "--bus-address")
                .or(file.bus.address)
                .unwrap_or_else(|| "127.0.0.1:9092".to_string()),
            bus_topic: file.bus.topic.unwrap_or_else(|| "ShareLog".to_string()),
            bus_group: file.bus.group.unwrap_or_else(|| "sharelog-writer".to_string()),
            data_dir: arg_value(&args, "--data-dir")
                .or(file.writer.data_dir)
                .unwrap_or_else(|| "data/sharelog".to_string()),
            flush_threshold: file.writer.flush_threshold.unwrap_or(8_000),
            idle_flush_secs: file.writer.idle_flush_secs.unwrap_or(1).max(1),
            housekeeping_secs: file.writer.housekeeping_secs.unwrap_or(300).max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_deserialization() {
        let toml_str = r#"
            [bus]
            address = "10.0.0.5:9092"
            group = "writer-2"

            [writer]
            data_dir = "/var/lib/pool/sharelog"
            flush_threshold = 4000
            idle_flush_secs = 2
        "#;
        let config: WriterFileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.bus.address, Some("10.0.0.5:9092".to_string()));
        assert_eq!(config.bus.group, Some("writer-2".to_string()));
        assert_eq!(
            config.writer.data_dir,
            Some("/var/lib/pool/sharelog".to_string())
        );
        assert_eq!(config.writer.flush_threshold, Some(4000));
        assert_eq!(config.writer.idle_flush_secs, Some(2));
        assert_eq!(config.writer.housekeeping_secs, None);
    }
}
