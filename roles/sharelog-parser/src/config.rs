use serde::Deserialize;
use std::{env, fs};

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: String,
    pub db_path: String,
    /// Target day as a Unix timestamp; defaults to today when unset.
    pub date: Option<u32>,
    pub flush_interval_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ParserFileConfig {
    #[serde(default)]
    parser: ParserConfig,
}

#[derive(Debug, Default, Deserialize)]
struct ParserConfig {
    data_dir: Option<String>,
    db_path: Option<String>,
    flush_interval_secs: Option<u64>,
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// Parse a `YYYYMMDD` day into the Unix timestamp of its UTC start.
fn parse_day(day: &str) -> Result<u32, Box<dyn std::error::Error>> {
    let date = chrono::NaiveDate::parse_from_str(day, "%Y%m%d")?;
    let start = date
        .and_hms_opt(0, 0, 0)
        .ok_or("invalid day")?
        .and_utc()
        .timestamp();
    Ok(start as u32)
}

impl Config {
    pub fn from_args() -> Result<Self, Box<dyn std::error::Error>> {
        let args: Vec<String> = env::args().collect();

        let config_str = arg_value(&args, "--config")
            .or_else(|| arg_value(&args, "-c"))
            .map(|path| fs::read_to_string(path).unwrap_or_default())
            .unwrap_or_default();
        let file: ParserFileConfig = if config_str.is_empty() {
            ParserFileConfig::default()
        } else {
            toml::from_str(&config_str)?
        };

        let date = match arg_value(&args, "--date") {
            Some(day) => Some(parse_day(&day)?),
            None => None,
        };

        Ok(Config {
            data_dir: arg_value(&args, "--data-dir")
                .or(file.parser.data_dir)
                .unwrap_or_else(|| "data/sharelog".to_string()),
            db_path: arg_value(&args, "--db-path")
                .or(file.parser.db_path)
                .unwrap_or_else(|| "data/stats.db".to_string()),
            date,
            flush_interval_secs: file.parser.flush_interval_secs.unwrap_or(30).max(1),
        })
    }
}
