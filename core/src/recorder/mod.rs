//! Tick Recorder (spec §4.11): buffers incoming ticks and flushes them to a
//! tick file whenever the buffer crosses a size threshold or a 5-minute
//! timer fires, whichever comes first. The file is gzip-compressed once the
//! recording session closes.

pub mod format;
pub mod player;

pub use player::Player;

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::domain::RecordedTick;
use crate::errors::{CoreError, CoreResult};
use format::{encode_tick, FileHeader, FORMAT_VERSION};

pub const DEFAULT_FLUSH_THRESHOLD: usize = 1_000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub directory: PathBuf,
    pub flush_threshold: usize,
    pub flush_interval: Duration,
    pub compress_on_close: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./recordings"),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            compress_on_close: true,
        }
    }
}

/// A single recording session. Writes bare tick records to a `.raw` staging
/// file as they're flushed, then prepends the header and (optionally)
/// gzip-compresses into the final `.tick` file on close.
pub struct Recorder {
    config: RecorderConfig,
    buffer: Mutex<Vec<RecordedTick>>,
    raw_path: PathBuf,
    final_path: PathBuf,
    raw_file: Mutex<BufWriter<File>>,
    tick_count: AtomicU32,
    created_at_epoch_ms: u64,
}

impl Recorder {
    pub fn start(config: RecorderConfig, session_name: &str) -> CoreResult<Self> {
        fs::create_dir_all(&config.directory)
            .map_err(|e| CoreError::ValidationFailure { field: "recorder.directory".into(), reason: e.to_string() })?;

        let raw_path = config.directory.join(format!("{session_name}.raw"));
        let final_path = config.directory.join(format!("{session_name}.tick"));
        let raw_file = File::create(&raw_path)
            .map_err(|e| CoreError::ValidationFailure { field: "recorder.raw_file".into(), reason: e.to_string() })?;

        Ok(Self {
            config,
            buffer: Mutex::new(Vec::new()),
            raw_path,
            final_path,
            raw_file: Mutex::new(BufWriter::new(raw_file)),
            tick_count: AtomicU32::new(0),
            created_at_epoch_ms: Utc::now().timestamp_millis() as u64,
        })
    }

    /// Buffers `tick`, flushing to disk immediately if the threshold is
    /// crossed.
    pub fn record(&self, tick: RecordedTick) -> CoreResult<()> {
        let should_flush = {
            let mut buf = self.buffer.lock();
            buf.push(tick);
            buf.len() >= self.config.flush_threshold
        };
        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes every buffered tick to the staging file.
    pub fn flush(&self) -> CoreResult<()> {
        let ticks = {
            let mut buf = self.buffer.lock();
            std::mem::take(&mut *buf)
        };
        if ticks.is_empty() {
            return Ok(());
        }
        let mut file = self.raw_file.lock();
        for tick in &ticks {
            file.write_all(&encode_tick(tick))
                .map_err(|e| CoreError::ValidationFailure { field: "recorder.flush".into(), reason: e.to_string() })?;
        }
        file.flush().map_err(|e| CoreError::ValidationFailure { field: "recorder.flush".into(), reason: e.to_string() })?;
        self.tick_count.fetch_add(ticks.len() as u32, Ordering::AcqRel);
        Ok(())
    }

    /// Flushes remaining ticks, prepends the header to the staged data, and
    /// gzip-compresses it if configured. Returns the final file path.
    pub fn close(self) -> CoreResult<PathBuf> {
        self.flush()?;
        drop(self.raw_file.into_inner());

        let mut raw_bytes = Vec::new();
        File::open(&self.raw_path)
            .and_then(|mut f| f.read_to_end(&mut raw_bytes))
            .map_err(|e| CoreError::ValidationFailure { field: "recorder.close".into(), reason: e.to_string() })?;

        let crc = crc32fast::hash(&raw_bytes);
        let header = FileHeader {
            version: FORMAT_VERSION,
            tick_count: self.tick_count.load(Ordering::Acquire),
            created_at_epoch_ms: self.created_at_epoch_ms,
            crc32: crc as u64,
        };

        let output = File::create(&self.final_path)
            .map_err(|e| CoreError::ValidationFailure { field: "recorder.close".into(), reason: e.to_string() })?;

        let write_err = |e: std::io::Error| CoreError::ValidationFailure { field: "recorder.close".into(), reason: e.to_string() };

        if self.config.compress_on_close {
            let mut encoder = GzEncoder::new(output, Compression::default());
            encoder.write_all(&header.encode()).map_err(write_err)?;
            encoder.write_all(&raw_bytes).map_err(write_err)?;
            encoder.finish().map_err(write_err)?;
        } else {
            let mut writer = BufWriter::new(output);
            writer.write_all(&header.encode()).map_err(write_err)?;
            writer.write_all(&raw_bytes).map_err(write_err)?;
        }

        if let Err(e) = fs::remove_file(&self.raw_path) {
            warn!(error = %e, path = %self.raw_path.display(), "failed to remove recorder staging file");
        }

        info!(path = %self.final_path.display(), tick_count = self.tick_count.load(Ordering::Acquire), "recording closed");
        Ok(self.final_path)
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }
}
