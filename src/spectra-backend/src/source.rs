//! Device Source abstraction: `configure`/`start`/`stop` over a hardware
//! or synthetic IQ stream, plus a producer thread that blocks on hardware
//! I/O and backs off on a run of read failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use spectra_core::{DeviceParams, SampleBlock, SpectraError, SpectraResult};

use crate::bridge::SampleBridge;

/// Hardware (or simulated) sample producer. One instance is reused across
/// repeated `start`/`stop` cycles for the life of the session; `configure`
/// while streaming must fail with `Busy` at the coordinator layer.
pub trait DeviceSource: Send {
    fn configure(&mut self, params: DeviceParams) -> SpectraResult<()>;

    /// Acquires whatever hardware resources (or no-ops for synthetic
    /// sources) are needed before `read_into` can be called. Safe to call
    /// again after `stop` to reacquire.
    fn start(&mut self) -> SpectraResult<()>;

    /// Releases any hardware resources acquired by `start`, so that a
    /// second, independent attempt to open the same device succeeds.
    fn stop(&mut self) -> SpectraResult<()>;

    /// Fills `out` (interleaved I/Q, `out.len()` even) completely, or
    /// returns `DeviceUnavailable` on unrecoverable failure.
    fn read_into(&mut self, out: &mut [f32]) -> SpectraResult<()>;
}

/// Silent source: fixed output, used where the test only needs a
/// syntactically valid stream.
#[derive(Debug, Default)]
pub struct MockSource {
    params: DeviceParams,
}

impl DeviceSource for MockSource {
    fn configure(&mut self, params: DeviceParams) -> SpectraResult<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    fn start(&mut self) -> SpectraResult<()> {
        Ok(())
    }

    fn stop(&mut self) -> SpectraResult<()> {
        Ok(())
    }

    fn read_into(&mut self, out: &mut [f32]) -> SpectraResult<()> {
        out.fill(0.0);
        Ok(())
    }
}

/// Deterministic tone-plus-noise source so end-to-end tests can assert on
/// spectral content instead of silence.
pub struct SyntheticSource {
    params: DeviceParams,
    tone_hz: f64,
    noise_amplitude: f32,
    phase: f64,
    rng_state: u64,
}

impl SyntheticSource {
    #[must_use]
    pub fn new(tone_hz: f64, noise_amplitude: f32) -> Self {
        Self {
            params: DeviceParams::default(),
            tone_hz,
            noise_amplitude,
            phase: 0.0,
            rng_state: 0x9E3779B97F4A7C15,
        }
    }

    fn next_noise(&mut self) -> f32 {
        // xorshift64*, deterministic so tests are reproducible.
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        let unit = (self.rng_state >> 11) as f64 / (1u64 << 53) as f64;
        (unit as f32 * 2.0 - 1.0) * self.noise_amplitude
    }
}

impl DeviceSource for SyntheticSource {
    fn configure(&mut self, params: DeviceParams) -> SpectraResult<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    fn start(&mut self) -> SpectraResult<()> {
        Ok(())
    }

    fn stop(&mut self) -> SpectraResult<()> {
        Ok(())
    }

    fn read_into(&mut self, out: &mut [f32]) -> SpectraResult<()> {
        let angular = 2.0 * std::f64::consts::PI * self.tone_hz / self.params.sample_rate;
        for pair in out.chunks_exact_mut(2) {
            let i = (self.phase.cos() as f32) + self.next_noise();
            let q = (self.phase.sin() as f32) + self.next_noise();
            pair[0] = i;
            pair[1] = q;
            self.phase += angular;
        }
        Ok(())
    }
}

/// Runs the producer loop on its own OS thread until `shutdown` is set or
/// the source reports `DeviceUnavailable`. Named builder thread,
/// error-streak backoff, one cleanup path on exit.
///
/// `run` is the coordinator's desired streaming state (true while a
/// session is `Live`/`SweepRunning`, false at `Idle`); the thread calls
/// `source.start()`/`source.stop()` on each edge and mirrors the actual
/// state into `active`, so a `stop` command can poll `active` until the
/// device handle is confirmed released.
#[allow(clippy::too_many_arguments)]
pub fn spawn_producer(
    mut source: Box<dyn DeviceSource>,
    bridge: Arc<SampleBridge>,
    block_samples: usize,
    sample_rate: f64,
    center_freq: f64,
    shutdown: Arc<AtomicBool>,
    status_tx: Sender<SpectraError>,
    retune_rx: Receiver<DeviceParams>,
    yield_to_playback: Arc<AtomicBool>,
    run: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("device-source".to_string())
        .spawn(move || {
            let mut error_streak: u32 = 0;
            let mut seq: u64 = 0;
            let mut center_freq = center_freq;
            let mut sample_rate = sample_rate;
            let mut device_started = false;
            while !shutdown.load(Ordering::Acquire) {
                let should_run = run.load(Ordering::Acquire);
                if should_run && !device_started {
                    match source.start() {
                        Ok(()) => {
                            device_started = true;
                            active.store(true, Ordering::Release);
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "device start failed");
                            let _ = status_tx.send(err);
                            std::thread::sleep(Duration::from_millis(100));
                            continue;
                        }
                    }
                } else if !should_run && device_started {
                    if let Err(err) = source.stop() {
                        tracing::warn!(error = %err, "device stop failed");
                    }
                    device_started = false;
                    active.store(false, Ordering::Release);
                }
                if !should_run {
                    std::thread::sleep(Duration::from_millis(20));
                    continue;
                }
                while let Ok(params) = retune_rx.try_recv() {
                    match source.configure(params.clone()) {
                        Ok(()) => {
                            center_freq = params.center_freq;
                            sample_rate = params.sample_rate;
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "retune rejected");
                            let _ = status_tx.send(err);
                        }
                    }
                }
                if yield_to_playback.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(20));
                    continue;
                }
                let mut samples = vec![0.0f32; block_samples * 2];
                match source.read_into(&mut samples) {
                    Ok(()) => {
                        error_streak = 0;
                        bridge.push(SampleBlock {
                            samples,
                            center_freq,
                            sample_rate,
                            seq,
                        });
                        seq += 1;
                    }
                    Err(err) => {
                        error_streak = error_streak.saturating_add(1);
                        tracing::warn!(error = %err, streak = error_streak, "device read failed");
                        let _ = status_tx.send(SpectraError::DeviceUnavailable(err.to_string()));
                        let backoff_ms = 10u64.saturating_mul(1 << error_streak.min(4)).min(250);
                        std::thread::sleep(Duration::from_millis(backoff_ms));
                        if error_streak >= 8 {
                            break;
                        }
                    }
                }
            }
            if device_started {
                let _ = source.stop();
                active.store(false, Ordering::Release);
            }
            bridge.poison();
            tracing::info!("device source thread exiting");
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_source_fills_zeros() {
        let mut source = MockSource::default();
        source.configure(DeviceParams::default()).unwrap();
        let mut buf = vec![1.0; 16];
        source.read_into(&mut buf).unwrap();
        assert!(buf.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn synthetic_source_is_bounded_and_deterministic() {
        let mut a = SyntheticSource::new(1000.0, 0.01);
        let mut b = SyntheticSource::new(1000.0, 0.01);
        a.configure(DeviceParams::default()).unwrap();
        b.configure(DeviceParams::default()).unwrap();
        let mut buf_a = vec![0.0; 32];
        let mut buf_b = vec![0.0; 32];
        a.read_into(&mut buf_a).unwrap();
        b.read_into(&mut buf_b).unwrap();
        assert_eq!(buf_a, buf_b);
        assert!(buf_a.iter().all(|&v| v.abs() <= 1.02));
    }

    #[test]
    fn mock_source_start_stop_are_repeatable() {
        let mut source = MockSource::default();
        source.start().unwrap();
        source.stop().unwrap();
        source.start().unwrap();
        source.stop().unwrap();
    }

    #[test]
    fn producer_releases_device_when_run_flag_drops() {
        let bridge = Arc::new(SampleBridge::new(4));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (_retune_tx, retune_rx) = std::sync::mpsc::channel();
        let (status_tx, _status_rx) = std::sync::mpsc::channel();
        let run = Arc::new(AtomicBool::new(true));
        let active = Arc::new(AtomicBool::new(false));
        let yield_to_playback = Arc::new(AtomicBool::new(false));

        let handle = spawn_producer(
            Box::new(MockSource::default()),
            Arc::clone(&bridge),
            8,
            1e6,
            1e8,
            Arc::clone(&shutdown),
            status_tx,
            retune_rx,
            yield_to_playback,
            Arc::clone(&run),
            Arc::clone(&active),
        )
        .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !active.load(Ordering::Acquire) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(active.load(Ordering::Acquire), "device never reported started");

        run.store(false, Ordering::Release);
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while active.load(Ordering::Acquire) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!active.load(Ordering::Acquire), "device was not released");

        shutdown.store(true, Ordering::Release);
        handle.join().unwrap();
    }
}
