use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod config;

use config::Config;
use share_bus::BusConsumer;
use sharelog_protocol::Share;
use sharelog_writer::writer::ShareLogWriter;

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}

fn flush(writer: &mut ShareLogWriter) {
    if let Err(e) = writer.flush_to_disk() {
        error!("share log flush failed, will retry: {e}");
    }
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
    info!("starting sharelog-writer");
    info!(
        "bus: {} topic {} group {}",
        config.bus_address, config.bus_topic, config.bus_group
    );
    info!("data dir: {}", config.data_dir);

    let mut writer = ShareLogWriter::new(&config.data_dir)?;
    let mut consumer = BusConsumer::new(
        config.bus_address.clone(),
        config.bus_topic.clone(),
        config.bus_group.clone(),
    );

    // the bus is read in its own task so the flush timers never cancel a
    // half-received frame
    let (payload_tx, mut payload_rx) = mpsc::channel::<Vec<u8>>(16_384);
    let bus_task = tokio::spawn(async move {
        loop {
            match consumer.recv().await {
                Ok(payload) => {
                    if payload_tx.send(payload).await.is_err() {
                        return Ok(());
                    }
                }
                Err(e) => {
                    error!("share bus failed: {e}");
                    return Err(e);
                }
            }
        }
    });

    let mut idle_flush = tokio::time::interval(Duration::from_secs(config.idle_flush_secs));
    idle_flush.tick().await; // the first tick completes immediately
    let housekeeping = Duration::from_secs(config.housekeeping_secs);
    let mut last_housekeeping = Instant::now();
    let mut malformed: u64 = 0;

    loop {
        tokio::select! {
            payload = payload_rx.recv() => {
                match payload {
                    Some(payload) => {
                        match Share::from_bytes(&payload) {
                            Ok(share) => writer.push(share),
                            Err(e) => {
                                malformed += 1;
                                if malformed == 1 || malformed % 1000 == 0 {
                                    warn!("dropping malformed share ({malformed} so far): {e}");
                                }
                            }
                        }
                        if writer.buffered() >= config.flush_threshold {
                            flush(&mut writer);
                        }
                    }
                    None => {
                        // bus task exited; persist what is left and report
                        flush(&mut writer);
                        bus_task.await??;
                        return Ok(());
                    }
                }
            }
            _ = idle_flush.tick() => {
                flush(&mut writer);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested, flushing buffer");
                flush(&mut writer);
                return Ok(());
            }
        }

        if last_housekeeping.elapsed() >= housekeeping {
            writer.try_close_old_handles(unix_now());
            last_housekeeping = Instant::now();
        }
    }
}
