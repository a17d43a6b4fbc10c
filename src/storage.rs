// STORAGE: Trade bucket aggregation and persistence
// Trades are folded into fixed-window OHLCV buckets; sealed buckets are
// appended to a JSONL file and kept in a bounded in-memory ring for the
// indicator pipeline.

use crate::indicators::PriceData;
use crate::types::TradeEvent;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PriceBucket {
    pub symbol: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trade_count: u64,
}

impl PriceBucket {
    pub fn to_price_data(&self) -> PriceData {
        PriceData {
            high: self.high,
            low: self.low,
            close: self.close,
            ts: self.window_end,
        }
    }
}

/// Folds trades into fixed-window buckets. A trade past the current
/// window seals the bucket and starts the next one.
pub struct BucketAggregator {
    window_secs: i64,
    current: Option<PriceBucket>,
}

impl BucketAggregator {
    pub fn new(window_secs: i64) -> Self {
        Self {
            window_secs: window_secs.max(1),
            current: None,
        }
    }

    fn window_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp() - ts.timestamp().rem_euclid(self.window_secs);
        Utc.timestamp_opt(secs, 0).single().unwrap_or(ts)
    }

    /// Fold one trade in. Returns the sealed previous bucket when the
    /// trade opens a new window.
    pub fn apply(&mut self, trade: &TradeEvent) -> Option<PriceBucket> {
        let start = self.window_start(trade.trade_ts);
        let price = trade.price.0;
        let qty = trade.qty.0;

        match self.current.as_mut() {
            Some(bucket) if bucket.window_start == start => {
                if price > bucket.high {
                    bucket.high = price;
                }
                if price < bucket.low {
                    bucket.low = price;
                }
                bucket.close = price;
                bucket.volume += qty;
                bucket.trade_count += 1;
                None
            }
            _ => {
                let sealed = self.current.take();
                self.current = Some(PriceBucket {
                    symbol: trade.symbol.clone(),
                    window_start: start,
                    window_end: start + Duration::seconds(self.window_secs),
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: qty,
                    trade_count: 1,
                });
                sealed
            }
        }
    }

    /// Seal and return the in-progress bucket, if any.
    pub fn flush(&mut self) -> Option<PriceBucket> {
        self.current.take()
    }
}

pub trait BucketSink: Send + Sync {
    fn store(&self, bucket: &PriceBucket) -> Result<()>;
}

/// Append-only JSONL store, one bucket per line.
pub struct JsonlBucketStore {
    path: PathBuf,
}

impl JsonlBucketStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_recent(&self, n: usize) -> Result<Vec<PriceBucket>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let mut buckets: VecDeque<PriceBucket> = VecDeque::with_capacity(n);
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PriceBucket>(&line) {
                Ok(bucket) => {
                    if buckets.len() == n {
                        buckets.pop_front();
                    }
                    buckets.push_back(bucket);
                }
                Err(e) => warn!(error = %e, "STORAGE: skipping malformed bucket line"),
            }
        }
        Ok(buckets.into())
    }
}

impl BucketSink for JsonlBucketStore {
    fn store(&self, bucket: &PriceBucket) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let line = serde_json::to_string(bucket)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

/// Bounded in-memory view of the latest sealed buckets.
#[derive(Clone)]
pub struct RecentBuckets {
    inner: Arc<Mutex<VecDeque<PriceBucket>>>,
    capacity: usize,
}

impl RecentBuckets {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, bucket: PriceBucket) {
        if let Ok(mut ring) = self.inner.lock() {
            if ring.len() == self.capacity {
                ring.pop_front();
            }
            ring.push_back(bucket);
        }
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<PriceBucket> {
        self.inner
            .lock()
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn price_data(&self) -> Vec<PriceData> {
        self.inner
            .lock()
            .map(|ring| ring.iter().map(|b| b.to_price_data()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|ring| ring.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
