//! Rolling dedup store used by the Router's duplicate gate (spec §4.2,
//! §6 "dedup key: first 64 bits of SHA-256 of
//! strategyId|instrumentToken|side|quantity|floor(now_ms/300000)").
//!
//! The 5-minute floor buckets requests so that two placements of the same
//! order a few seconds apart collide, while the same strategy legitimately
//! re-entering the same instrument ten minutes later does not.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::domain::{OrderRequest, Side};

const DEFAULT_BUCKET_MS: i64 = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey(pub u64);

impl DedupKey {
    pub fn compute(request: &OrderRequest, now_epoch_ms: i64, bucket_ms: i64) -> Self {
        let bucket = now_epoch_ms.div_euclid(bucket_ms);
        let side = match request.side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let material = format!(
            "{}|{}|{}|{}|{}",
            request.strategy_id.as_deref().unwrap_or(""),
            request.instrument_token,
            side,
            request.quantity,
            bucket,
        );
        let digest = Sha256::digest(material.as_bytes());
        let bytes: [u8; 8] = digest[..8].try_into().expect("sha256 digest is >= 8 bytes");
        Self(u64::from_be_bytes(bytes))
    }
}

/// Rolling store of recently admitted dedup keys. Entries older than `ttl`
/// are lazily swept on insert rather than via a background task, so the
/// store never needs its own thread.
pub struct IdempotencyStore {
    seen: DashMap<DedupKey, std::time::Instant>,
    ttl: Duration,
    bucket_ms: i64,
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
            bucket_ms: DEFAULT_BUCKET_MS,
        }
    }

    pub fn key_for(&self, request: &OrderRequest, now_epoch_ms: i64) -> DedupKey {
        DedupKey::compute(request, now_epoch_ms, self.bucket_ms)
    }

    /// Returns `true` if this key was already admitted within the window.
    pub fn is_duplicate(&self, key: DedupKey) -> bool {
        match self.seen.get(&key) {
            Some(seen_at) => seen_at.elapsed() < self.ttl,
            None => false,
        }
    }

    /// Records admission of this key. Callers should check
    /// [`is_duplicate`](Self::is_duplicate) first; this never overwrites an
    /// existing timestamp with an earlier one would produce, since it's
    /// only called once per admission.
    pub fn mark(&self, key: DedupKey) {
        self.seen.insert(key, std::time::Instant::now());
        self.sweep();
    }

    fn sweep(&self) {
        self.seen.retain(|_, seen_at| seen_at.elapsed() < self.ttl);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for IdempotencyStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
