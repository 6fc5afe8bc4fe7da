//! Binary tick-file layout (spec §6): a 32-byte header followed by
//! fixed-width 88-byte tick records, big-endian throughout so the format is
//! portable across architectures.
//!
//! ```text
//! Header (32 bytes):
//!   u64 magic             0x5449434B46494C45  ("TICKFILE" in ASCII)
//!   u32 version           1
//!   u32 tick_count
//!   u64 created_at_epoch_ms
//!   u64 crc32             CRC-32 of every tick record that follows
//!
//! Tick record (88 bytes), one per tick:
//!   u64 timestamp_epoch_ms
//!   u64 instrument_token
//!   f64 last_price
//!   f64 open
//!   f64 high
//!   f64 low
//!   f64 close
//!   u64 volume
//!   f64 oi
//!   f64 oi_change
//!   u64 received_at_nanos
//! ```

use crate::domain::RecordedTick;
use crate::errors::CoreError;

pub const MAGIC: u64 = 0x5449_434B_4649_4C45;
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 32;
pub const TICK_RECORD_LEN: usize = 88;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
    pub tick_count: u32,
    pub created_at_epoch_ms: u64,
    pub crc32: u64,
}

impl FileHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..8].copy_from_slice(&MAGIC.to_be_bytes());
        buf[8..12].copy_from_slice(&self.version.to_be_bytes());
        buf[12..16].copy_from_slice(&self.tick_count.to_be_bytes());
        buf[16..24].copy_from_slice(&self.created_at_epoch_ms.to_be_bytes());
        buf[24..32].copy_from_slice(&self.crc32.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        if buf.len() < HEADER_LEN {
            return Err(CoreError::ValidationFailure {
                field: "tick_file_header".into(),
                reason: format!("expected at least {HEADER_LEN} bytes, got {}", buf.len()),
            });
        }
        let magic = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        if magic != MAGIC {
            return Err(CoreError::ValidationFailure {
                field: "tick_file_header".into(),
                reason: format!("bad magic: expected {MAGIC:#x}, got {magic:#x}"),
            });
        }
        let version = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(CoreError::ValidationFailure {
                field: "tick_file_header".into(),
                reason: format!("unsupported version {version}"),
            });
        }
        Ok(Self {
            version,
            tick_count: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
            created_at_epoch_ms: u64::from_be_bytes(buf[16..24].try_into().unwrap()),
            crc32: u64::from_be_bytes(buf[24..32].try_into().unwrap()),
        })
    }
}

pub fn encode_tick(tick: &RecordedTick) -> [u8; TICK_RECORD_LEN] {
    let mut buf = [0u8; TICK_RECORD_LEN];
    buf[0..8].copy_from_slice(&tick.timestamp_epoch_ms.to_be_bytes());
    buf[8..16].copy_from_slice(&tick.instrument_token.to_be_bytes());
    buf[16..24].copy_from_slice(&tick.last_price.to_be_bytes());
    buf[24..32].copy_from_slice(&tick.open.to_be_bytes());
    buf[32..40].copy_from_slice(&tick.high.to_be_bytes());
    buf[40..48].copy_from_slice(&tick.low.to_be_bytes());
    buf[48..56].copy_from_slice(&tick.close.to_be_bytes());
    buf[56..64].copy_from_slice(&tick.volume.to_be_bytes());
    buf[64..72].copy_from_slice(&tick.oi.to_be_bytes());
    buf[72..80].copy_from_slice(&tick.oi_change.to_be_bytes());
    buf[80..88].copy_from_slice(&tick.received_at_nanos.to_be_bytes());
    buf
}

pub fn decode_tick(buf: &[u8]) -> Result<RecordedTick, CoreError> {
    if buf.len() < TICK_RECORD_LEN {
        return Err(CoreError::ValidationFailure {
            field: "tick_record".into(),
            reason: format!("expected {TICK_RECORD_LEN} bytes, got {}", buf.len()),
        });
    }
    Ok(RecordedTick {
        timestamp_epoch_ms: u64::from_be_bytes(buf[0..8].try_into().unwrap()),
        instrument_token: u64::from_be_bytes(buf[8..16].try_into().unwrap()),
        last_price: f64::from_be_bytes(buf[16..24].try_into().unwrap()),
        open: f64::from_be_bytes(buf[24..32].try_into().unwrap()),
        high: f64::from_be_bytes(buf[32..40].try_into().unwrap()),
        low: f64::from_be_bytes(buf[40..48].try_into().unwrap()),
        close: f64::from_be_bytes(buf[48..56].try_into().unwrap()),
        volume: u64::from_be_bytes(buf[56..64].try_into().unwrap()),
        oi: f64::from_be_bytes(buf[64..72].try_into().unwrap()),
        oi_change: f64::from_be_bytes(buf[72..80].try_into().unwrap()),
        received_at_nanos: u64::from_be_bytes(buf[80..88].try_into().unwrap()),
    })
}

pub fn crc32_of_ticks(ticks: &[RecordedTick]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for tick in ticks {
        hasher.update(&encode_tick(tick));
    }
    hasher.finalize()
}
