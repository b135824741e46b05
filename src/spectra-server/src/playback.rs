//! IQ playback: reads a prior IQ recording back into the Sample Bridge
//! in place of the live Device Source, honoring pause/resume/seek/loop
//! and a configurable rate factor. The read loop thread and any `seek`
//! command share one lock around the file handle and logical frame
//! index.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use spectra_core::{SampleBlock, SpectraError, SpectraResult};

use spectra_backend::SampleBridge;

const MIN_RATE_FACTOR: f32 = 0.25;
const MAX_RATE_FACTOR: f32 = 4.0;

struct FileState {
    file: File,
    frame_index: u64,
}

struct Shared {
    file_state: Mutex<FileState>,
    paused: AtomicBool,
    stopped: AtomicBool,
    loop_enabled: AtomicBool,
    rate_factor_millis: AtomicU64,
}

impl Shared {
    fn rate_factor(&self) -> f32 {
        f32::from_bits(self.rate_factor_millis.load(Ordering::Relaxed) as u32)
    }

    fn set_rate_factor(&self, value: f32) {
        let clamped = value.clamp(MIN_RATE_FACTOR, MAX_RATE_FACTOR);
        self.rate_factor_millis
            .store(clamped.to_bits() as u64, Ordering::Relaxed);
    }
}

pub struct PlaybackHandle {
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
    pub filename: String,
}

impl PlaybackHandle {
    pub fn start(
        path: PathBuf,
        filename: String,
        sample_rate: f64,
        center_freq: f64,
        block_samples: usize,
        bridge: Arc<SampleBridge>,
        live_gate: Arc<AtomicBool>,
    ) -> SpectraResult<Self> {
        let file = File::open(&path)
            .map_err(|e| SpectraError::InvalidConfig(format!("cannot open {filename}: {e}")))?;
        let shared = Arc::new(Shared {
            file_state: Mutex::new(FileState { file, frame_index: 0 }),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            loop_enabled: AtomicBool::new(false),
            rate_factor_millis: AtomicU64::new(1.0f32.to_bits() as u64),
        });
        live_gate.store(true, Ordering::Release);

        let thread_shared = Arc::clone(&shared);
        let join = std::thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                run_playback_loop(
                    thread_shared,
                    sample_rate,
                    center_freq,
                    block_samples,
                    bridge,
                    live_gate,
                )
            })
            .map_err(|e| SpectraError::InternalError(format!("spawn playback thread failed: {e}")))?;

        Ok(Self {
            shared,
            join: Some(join),
            filename,
        })
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
    }

    pub fn set_rate(&self, value: f32) {
        self.shared.set_rate_factor(value);
    }

    pub fn set_loop(&self, enabled: bool) {
        self.shared.loop_enabled.store(enabled, Ordering::Release);
    }

    /// Repositions to `frame_index` (logical complex-sample index),
    /// acquiring the same lock the read loop holds while reading.
    pub fn seek(&self, frame_index: u64) -> SpectraResult<()> {
        let mut state = self.shared.file_state.lock().expect("playback mutex poisoned");
        state
            .file
            .seek(SeekFrom::Start(frame_index * 8))
            .map_err(|e| SpectraError::InternalError(format!("seek failed: {e}")))?;
        state.frame_index = frame_index;
        Ok(())
    }

    pub fn stop(mut self) {
        self.shared.stopped.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run_playback_loop(
    shared: Arc<Shared>,
    sample_rate: f64,
    center_freq: f64,
    block_samples: usize,
    bridge: Arc<SampleBridge>,
    live_gate: Arc<AtomicBool>,
) {
    let block_duration = block_samples as f64 / sample_rate.max(1.0);
    let mut seq: u64 = 0;
    let mut raw = vec![0u8; block_samples * 2 * 4];

    while !shared.stopped.load(Ordering::Acquire) {
        if shared.paused.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(20));
            continue;
        }

        let read_result = {
            let mut state = shared.file_state.lock().expect("playback mutex poisoned");
            let n = read_fill(&mut state.file, &mut raw);
            if n > 0 {
                state.frame_index += (n / 8) as u64;
            }
            n
        };

        if read_result == 0 {
            if shared.loop_enabled.load(Ordering::Acquire) {
                let mut state = shared.file_state.lock().expect("playback mutex poisoned");
                if state.file.seek(SeekFrom::Start(0)).is_err() {
                    break;
                }
                state.frame_index = 0;
                continue;
            }
            break;
        }

        let samples = raw[..read_result]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect::<Vec<_>>();
        bridge.push(SampleBlock {
            samples,
            center_freq,
            sample_rate,
            seq,
        });
        seq += 1;

        let rate = shared.rate_factor().max(MIN_RATE_FACTOR);
        std::thread::sleep(Duration::from_secs_f64(block_duration / rate as f64));
    }

    live_gate.store(false, Ordering::Release);
}

fn read_fill(file: &mut File, buf: &mut [u8]) -> usize {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(_) => break,
        }
    }
    total - (total % 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn rate_factor_clamps_to_bounds() {
        let shared = Shared {
            file_state: Mutex::new(FileState {
                file: tempfile::tempfile().unwrap(),
                frame_index: 0,
            }),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            loop_enabled: AtomicBool::new(false),
            rate_factor_millis: AtomicU64::new(1.0f32.to_bits() as u64),
        };
        shared.set_rate_factor(10.0);
        assert_eq!(shared.rate_factor(), MAX_RATE_FACTOR);
        shared.set_rate_factor(0.01);
        assert_eq!(shared.rate_factor(), MIN_RATE_FACTOR);
    }

    #[test]
    fn seek_repositions_file_and_index() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[0u8; 64]).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let shared = Shared {
            file_state: Mutex::new(FileState { file, frame_index: 0 }),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            loop_enabled: AtomicBool::new(false),
            rate_factor_millis: AtomicU64::new(1.0f32.to_bits() as u64),
        };
        let handle = PlaybackHandle {
            shared: Arc::new(shared),
            join: None,
            filename: "x.iq".to_string(),
        };
        handle.seek(3).unwrap();
        let state = handle.shared.file_state.lock().unwrap();
        assert_eq!(state.frame_index, 3);
    }
}
