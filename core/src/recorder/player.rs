//! Replay Player (spec §4.11): streams a recorded tick file back out at a
//! configurable speed, standing in for a live feed during backtests. Will
//! not start while the gateway is in Live mode — replay is a
//! simulated-mode-only tool so a live session can never be accidentally fed
//! historical ticks.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::info;

use crate::domain::{CoreEvent, RecordedTick, ReplayComplete, ReplayProgress, TickEvent, TickSource};
use crate::errors::{CoreError, CoreResult};
use crate::gateway::ExecutionMode;

use super::format::{self, FileHeader};

pub const MIN_SPEED: f64 = 0.5;
pub const MAX_SPEED: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub speed: f64,
    pub instrument_filter: Option<HashSet<u64>>,
}

impl PlayerConfig {
    pub fn new(speed: f64) -> Self {
        Self { speed: speed.clamp(MIN_SPEED, MAX_SPEED), instrument_filter: None }
    }

    pub fn with_filter(mut self, instruments: HashSet<u64>) -> Self {
        self.instrument_filter = Some(instruments);
        self
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self::new(1.0)
    }
}

pub struct Player {
    source: String,
    config: PlayerConfig,
    ticks: Vec<RecordedTick>,
    paused: AtomicBool,
    stopped: AtomicBool,
}

impl Player {
    /// Loads a tick file (gzip or raw) and validates its header and CRC
    /// before accepting it.
    pub fn load(path: impl AsRef<Path>, config: PlayerConfig) -> CoreResult<Self> {
        let path = path.as_ref();
        let mut raw = Vec::new();
        File::open(path)
            .and_then(|mut f| f.read_to_end(&mut raw))
            .map_err(|e| CoreError::ValidationFailure { field: "tick_file".into(), reason: e.to_string() })?;

        let bytes = if raw.starts_with(&[0x1f, 0x8b]) {
            let mut decoder = flate2::read::GzDecoder::new(raw.as_slice());
            let mut decoded = Vec::new();
            decoder
                .read_to_end(&mut decoded)
                .map_err(|e| CoreError::ValidationFailure { field: "tick_file".into(), reason: e.to_string() })?;
            decoded
        } else {
            raw
        };

        let header = FileHeader::decode(&bytes)?;
        let body = &bytes[format::HEADER_LEN..];
        let expected_len = header.tick_count as usize * format::TICK_RECORD_LEN;
        if body.len() != expected_len {
            return Err(CoreError::ValidationFailure {
                field: "tick_file".into(),
                reason: format!("body length {} does not match header tick_count {}", body.len(), header.tick_count),
            });
        }
        let crc = crc32fast::hash(body) as u64;
        if crc != header.crc32 {
            return Err(CoreError::ValidationFailure {
                field: "tick_file".into(),
                reason: "CRC mismatch: tick file is corrupt".into(),
            });
        }

        let mut ticks = Vec::with_capacity(header.tick_count as usize);
        for chunk in body.chunks_exact(format::TICK_RECORD_LEN) {
            ticks.push(format::decode_tick(chunk)?);
        }

        Ok(Self {
            source: path.display().to_string(),
            config,
            ticks,
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn tick_count(&self) -> usize {
        self.ticks.len()
    }

    /// Streams every tick through `emit`, pacing playback at `config.speed`
    /// times real time (so 2.0 plays twice as fast as the recording was
    /// captured). Refuses to run while `mode` is Live.
    pub fn run(&self, mode: ExecutionMode, mut emit: impl FnMut(CoreEvent)) -> CoreResult<()> {
        if mode == ExecutionMode::Live {
            return Err(CoreError::ValidationFailure {
                field: "execution_mode".into(),
                reason: "replay cannot run against a live gateway".into(),
            });
        }

        let total = self.ticks.len() as u64;
        let mut previous_ts: Option<u64> = None;
        let mut played: u64 = 0;

        for tick in &self.ticks {
            if self.stopped.load(Ordering::Acquire) {
                break;
            }
            while self.paused.load(Ordering::Acquire) {
                if self.stopped.load(Ordering::Acquire) {
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(50));
            }

            if let Some(prev) = previous_ts {
                let delta_ms = tick.timestamp_epoch_ms.saturating_sub(prev);
                let paced = (delta_ms as f64 / self.config.speed) as u64;
                if paced > 0 {
                    std::thread::sleep(Duration::from_millis(paced));
                }
            }
            previous_ts = Some(tick.timestamp_epoch_ms);

            if self
                .config
                .instrument_filter
                .as_ref()
                .is_some_and(|set| !set.contains(&tick.instrument_token))
            {
                continue;
            }

            emit(CoreEvent::Tick(TickEvent {
                instrument_token: tick.instrument_token,
                last_price: tick.last_price,
                timestamp_epoch_ms: tick.timestamp_epoch_ms,
                source: TickSource::Replay(self.source.clone()),
            }));

            played += 1;
            if played % 100 == 0 || played == total {
                emit(CoreEvent::ReplayProgress(ReplayProgress {
                    source: self.source.clone(),
                    ticks_played: played,
                    ticks_total: total,
                    speed: self.config.speed,
                }));
            }
        }

        info!(source = %self.source, played, total, "replay finished");
        emit(CoreEvent::ReplayComplete(ReplayComplete { source: self.source.clone(), ticks_played: played }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{Recorder, RecorderConfig};

    fn tick(n: u64, instrument: u64) -> RecordedTick {
        RecordedTick {
            timestamp_epoch_ms: 1_700_000_000_000 + n * 10,
            instrument_token: instrument,
            last_price: 100.0 + n as f64,
            open: 100.0,
            high: 100.0,
            low: 100.0,
            close: 100.0,
            volume: n,
            oi: 0.0,
            oi_change: 0.0,
            received_at_nanos: n,
        }
    }

    fn write_sample_file(dir: &Path, compressed: bool) -> PathBuf {
        let config = RecorderConfig { directory: dir.to_path_buf(), flush_threshold: 100, compress_on_close: compressed, ..Default::default() };
        let recorder = Recorder::start(config, "sample").unwrap();
        for n in 0..5 {
            recorder.record(tick(n, 1)).unwrap();
        }
        recorder.close().unwrap()
    }

    #[test]
    fn refuses_to_run_in_live_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample_file(dir.path(), false);
        let player = Player::load(&path, PlayerConfig::new(10.0)).unwrap();
        let err = player.run(ExecutionMode::Live, |_| {}).unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailure { .. }));
    }

    #[test]
    fn speed_is_clamped_to_the_allowed_range() {
        assert_eq!(PlayerConfig::new(0.1).speed, MIN_SPEED);
        assert_eq!(PlayerConfig::new(100.0).speed, MAX_SPEED);
        assert_eq!(PlayerConfig::new(2.0).speed, 2.0);
    }

    #[test]
    fn plays_every_tick_and_emits_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample_file(dir.path(), true);
        let player = Player::load(&path, PlayerConfig::new(MAX_SPEED)).unwrap();
        let mut tick_events = 0;
        let mut completed = false;
        player
            .run(ExecutionMode::Simulated, |event| match event {
                CoreEvent::Tick(_) => tick_events += 1,
                CoreEvent::ReplayComplete(_) => completed = true,
                _ => {}
            })
            .unwrap();
        assert_eq!(tick_events, 5);
        assert!(completed);
    }

    #[test]
    fn instrument_filter_drops_unmatched_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let config = RecorderConfig { directory: dir.path().to_path_buf(), flush_threshold: 100, compress_on_close: false, ..Default::default() };
        let recorder = Recorder::start(config, "mixed").unwrap();
        recorder.record(tick(0, 1)).unwrap();
        recorder.record(tick(1, 2)).unwrap();
        let path = recorder.close().unwrap();

        let mut filter = HashSet::new();
        filter.insert(1u64);
        let player = Player::load(&path, PlayerConfig::new(MAX_SPEED).with_filter(filter)).unwrap();
        let mut seen = Vec::new();
        player
            .run(ExecutionMode::Simulated, |event| {
                if let CoreEvent::Tick(t) = event {
                    seen.push(t.instrument_token);
                }
            })
            .unwrap();
        assert_eq!(seen, vec![1]);
    }

    #[test]
    fn corrupt_crc_is_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample_file(dir.path(), false);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();
        assert!(Player::load(&path, PlayerConfig::default()).is_err());
    }
}
