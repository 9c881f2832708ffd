use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

mod config;

use config::Config;
use sharelog_parser::db::StatsDb;
use sharelog_parser::parser::{ShareLogParser, SECS_PER_DAY};

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_args()?;
    let date = config.date.unwrap_or_else(unix_now);

    let db = StatsDb::new(&config.db_path).await?;
    let mut parser = ShareLogParser::new(&config.data_dir, date);
    info!("starting sharelog-parser");
    info!("replaying {}", parser.file_path().display());

    let today = unix_now() - unix_now() % SECS_PER_DAY;
    if parser.date() < today {
        // sealed day: one memory-mapped pass, then flush everything
        let records = parser.process_unchanged()?;
        let rows = db.flush_day_stats(parser.date(), parser.workers_mut()).await?;
        info!("sealed day replayed: {records} records, {rows} stat rows");
        return Ok(());
    }

    // growing day: tail the live file until the day seals and drains
    let flush_interval = Duration::from_secs(config.flush_interval_secs);
    let mut last_flush = Instant::now();
    loop {
        let records = match parser.process_growing() {
            Ok(records) => records,
            Err(e) => {
                // the writer may not have produced the file yet
                debug!("share log not readable yet: {e}");
                0
            }
        };
        if records > 0 {
            debug!("processed {records} records");
        }

        let day_over = unix_now() >= parser.date() + SECS_PER_DAY;
        let at_eof = parser.is_reach_eof().unwrap_or(true);

        if last_flush.elapsed() >= flush_interval || (day_over && at_eof) {
            let rows = db.flush_day_stats(parser.date(), parser.workers_mut()).await?;
            if rows > 0 {
                info!("flushed {rows} stat rows");
            }
            last_flush = Instant::now();
        }

        if day_over && at_eof {
            info!("day sealed and drained, exiting");
            return Ok(());
        }
        if at_eof {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}
