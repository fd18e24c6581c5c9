//! Store writer and retry sweeper loops.
//!
//! The writer drains the telemetry channel: each update gets an arrival
//! stamp, then a reachability probe decides between a direct write and the
//! disk cache. Only a write deadline sends a record to the cache; a store
//! that answers with a rejection is treated as a permanent verdict on that
//! record. The sweeper periodically replays cached records once the store
//! answers pings again, deleting each file only after its fate is settled.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protobuf::meshtastic::KiezboxMessage;

use super::{point, spill, Store, StoreError};

/// Drain the telemetry channel into the store, spilling to `cache_dir`
/// whenever the store is unreachable or a write runs into its deadline.
pub async fn run_db_writer<S: Store>(
    mut telemetry_rx: mpsc::Receiver<KiezboxMessage>,
    store: Arc<S>,
    cache_dir: PathBuf,
    token: CancellationToken,
) {
    loop {
        let mut message = tokio::select! {
            _ = token.cancelled() => {
                info!("Store writer stopped");
                return;
            }
            maybe = telemetry_rx.recv() => match maybe {
                Some(message) => message,
                None => {
                    info!("Telemetry channel closed");
                    return;
                }
            },
        };

        if let Some(update) = message.update.as_mut() {
            update.arrival_time = Some(chrono::Utc::now().timestamp());
        }

        if !store.ping().await {
            warn!("No store connection, caching update");
            spill_or_log(&cache_dir, &message);
            continue;
        }

        let point = match point::update_to_point(&message) {
            Ok(point) => point,
            Err(e) => {
                warn!("Dropping malformed update: {:#}", e);
                continue;
            }
        };

        match store.write_point(&point).await {
            Ok(()) => debug!("Update written to store"),
            Err(StoreError::Timeout) => {
                warn!("Store write timed out, caching update");
                spill_or_log(&cache_dir, &message);
            }
            Err(e) => warn!("Store refused update: {}", e),
        }
    }
}

fn spill_or_log(cache_dir: &Path, message: &KiezboxMessage) {
    match spill::spill_message(cache_dir, message) {
        Ok(path) => debug!("Cached update at {}", path.display()),
        Err(e) => warn!("Failed to cache update: {:#}", e),
    }
}

/// Periodically replay cached records. Skips the whole round when the store
/// does not answer pings.
pub async fn run_db_retry<S: Store>(
    store: Arc<S>,
    cache_dir: PathBuf,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("Retry sweeper stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        if !store.ping().await {
            debug!("No store connection, skipping retry");
            continue;
        }

        let records = match spill::list_records(&cache_dir) {
            Ok(records) => records,
            Err(e) => {
                warn!("Cannot list cache directory: {:#}", e);
                continue;
            }
        };
        if records.is_empty() {
            continue;
        }
        info!("Store connected, retrying {} cached updates", records.len());

        for path in records {
            if token.is_cancelled() {
                return;
            }
            replay_record(store.as_ref(), &path).await;
        }
    }
}

/// Replay one cached record. The file is deleted once its fate is settled:
/// written, refused by the store, or unreadable. Only a deadline keeps it
/// for the next round.
async fn replay_record<S: Store>(store: &S, path: &Path) {
    let message = match spill::read_message(path) {
        Ok(message) => message,
        Err(e) => {
            // Raced with nothing — the writer never rewrites a record — so an
            // unreadable file is junk; a vanished one was already handled.
            if path.exists() {
                warn!("Unreadable cached record, deleting: {:#}", e);
                remove_or_log(path);
            }
            return;
        }
    };

    let point = match point::update_to_point(&message) {
        Ok(point) => point,
        Err(e) => {
            warn!("Cached record does not convert, deleting: {:#}", e);
            remove_or_log(path);
            return;
        }
    };

    match store.write_point(&point).await {
        Ok(()) => {
            debug!("Replayed cached record {}", path.display());
            remove_or_log(path);
        }
        Err(StoreError::Timeout) => {
            debug!("Store still slow, keeping {}", path.display());
        }
        Err(e) => {
            warn!("Store refused cached record, deleting: {}", e);
            remove_or_log(path);
        }
    }
}

fn remove_or_log(path: &Path) {
    if let Err(e) = spill::remove_record(path) {
        warn!("{:#}", e);
    }
}
