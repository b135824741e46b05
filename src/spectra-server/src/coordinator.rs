//! Session Coordinator. Owns the authoritative [`SessionState`],
//! dispatches client commands under a single async mode lock, and
//! bridges the native Device Source / DSP worker threads into the
//! broadcast fan-out.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde_json::Value;
use spectra_backend::{spawn_producer, DeviceSource, SampleBridge};
use spectra_core::{
    DetectorConfig, DeviceParams, DspConfig, Panorama, RecorderState, SessionMode, SessionState,
    SpectraError, SpectraResult, SweepMode, SweepPlan, SweepSegment, WindowKind,
};
use spectra_dsp::agc::{GainRequest, SoftwareAgc};
use spectra_dsp::detector::{SignalDetector, SignalEvent};
use spectra_dsp::pipeline::DspPipeline;
use spectra_dsp::sweep::{SweepEngine, SweepOutcome, SweepState};
use spectra_protocol::{
    encode_panorama, encode_server_frame, encode_spectrum, encode_sweep_segment, frame_to_wire,
    sanitize_filename, ClientCommand, ServerFrame, SignalEventData,
};
use tokio::sync::{mpsc as tokio_mpsc, Mutex as AsyncMutex};

use crate::config::ServerConfig;
use crate::playback::PlaybackHandle;
use crate::recorder::Recorder;

const BRIDGE_CAPACITY: usize = 64;
const BRIDGE_POP_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(250);
const DEVICE_RELEASE_DEADLINE: std::time::Duration = std::time::Duration::from_secs(2);
const DEVICE_RELEASE_POLL: std::time::Duration = std::time::Duration::from_millis(20);

enum WorkerCommand {
    Reconfigure(DspConfig),
    EnterSweep {
        plan: SweepPlan,
        averages: u32,
        settling_skip: u32,
        output_bins: usize,
        fft_size: usize,
        window_kind: WindowKind,
        sweep_id: u32,
        sweep_mode: SweepMode,
    },
    ExitSweep,
}

enum WorkerEvent {
    Frame(spectra_core::SpectrumFrame),
    SweepSegment(SweepSegment),
    SweepPanorama(Panorama),
    SweepFinished,
    SweepAborted,
    Fault(SpectraError),
}

pub struct Coordinator {
    state: AsyncMutex<SessionState>,
    bridge: Arc<SampleBridge>,
    retune_tx: std_mpsc::Sender<DeviceParams>,
    worker_tx: std_mpsc::Sender<WorkerCommand>,
    gain_bits: Arc<AtomicU32>,
    live_gate: Arc<AtomicBool>,
    device_running: Arc<AtomicBool>,
    device_active: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    recorder: Arc<Mutex<Recorder>>,
    playback: Mutex<Option<PlaybackHandle>>,
    agc: Mutex<SoftwareAgc>,
    agc_enabled: AtomicBool,
    detector: Mutex<SignalDetector>,
    usable_fraction: f64,
    settling_skip_blocks: u32,
    block_samples: usize,
    next_sweep_id: AtomicU32,
    recordings_dir: PathBuf,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        config: &ServerConfig,
        source: Box<dyn DeviceSource + Send>,
        fanout: Arc<crate::fanout::BroadcastFanout>,
    ) -> SpectraResult<(Arc<Coordinator>, Vec<JoinHandle<()>>)> {
        let bridge = Arc::new(SampleBridge::new(BRIDGE_CAPACITY));
        let shutdown = Arc::new(AtomicBool::new(false));
        let live_gate = Arc::new(AtomicBool::new(false));
        let device_running = Arc::new(AtomicBool::new(false));
        let device_active = Arc::new(AtomicBool::new(false));
        let (retune_tx, retune_rx) = std_mpsc::channel::<DeviceParams>();
        let (status_tx, status_rx) = std_mpsc::channel::<SpectraError>();
        let (worker_tx, worker_rx) = std_mpsc::channel::<WorkerCommand>();
        let (event_tx, mut event_rx) = tokio_mpsc::unbounded_channel::<WorkerEvent>();

        let block_samples = config.dsp.fft_size;
        let mut source = source;
        source
            .configure(config.device)
            .map_err(|e| SpectraError::DeviceUnavailable(e.to_string()))?;

        let producer = spawn_producer(
            source,
            Arc::clone(&bridge),
            block_samples,
            config.device.sample_rate,
            config.device.center_freq,
            Arc::clone(&shutdown),
            status_tx,
            retune_rx,
            Arc::clone(&live_gate),
            Arc::clone(&device_running),
            Arc::clone(&device_active),
        )
        .map_err(|e| SpectraError::InternalError(format!("spawn producer failed: {e}")))?;

        let gain_bits = Arc::new(AtomicU32::new(config.device.gain.to_bits()));

        let recorder = Arc::new(Mutex::new(Recorder::new(
            config.recorder.directory.clone(),
            config.recorder.storage_budget_bytes,
        )?));

        let worker = spawn_worker(
            Arc::clone(&bridge),
            Arc::clone(&shutdown),
            Arc::clone(&gain_bits),
            Arc::clone(&recorder),
            config.dsp.clone(),
            worker_rx,
            event_tx,
            retune_tx.clone(),
        )?;

        std::thread::spawn(move || {
            while let Ok(err) = status_rx.recv() {
                tracing::warn!(error = %err, "device status event");
            }
        });

        let coordinator = Arc::new(Coordinator {
            state: AsyncMutex::new(SessionState {
                mode: SessionMode::Idle,
                dsp_config: config.dsp.clone(),
                device: config.device,
                recorder: RecorderState::default(),
                detector: config.detector.clone(),
                device_connected: true,
                device_error: None,
                dropped_sample_blocks: 0,
                next_sweep_id: 0,
            }),
            bridge,
            retune_tx,
            worker_tx,
            gain_bits,
            live_gate,
            device_running,
            device_active,
            shutdown,
            recorder,
            playback: Mutex::new(None),
            agc: Mutex::new(SoftwareAgc::default()),
            agc_enabled: AtomicBool::new(false),
            detector: Mutex::new(SignalDetector::new(config.detector.clone())),
            usable_fraction: config.sweep.usable_fraction,
            settling_skip_blocks: config.sweep.settling_skip_blocks,
            block_samples,
            next_sweep_id: AtomicU32::new(0),
            recordings_dir: config.recorder.directory.clone(),
        });

        let consumer_handle = Arc::clone(&coordinator);
        let consumer_fanout = fanout;
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                consumer_handle.handle_worker_event(event, &consumer_fanout).await;
            }
        });

        Ok((coordinator, vec![producer, worker]))
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    async fn handle_worker_event(&self, event: WorkerEvent, fanout: &crate::fanout::BroadcastFanout) {
        match event {
            WorkerEvent::Frame(frame) => {
                let mode = self.state.lock().await.mode;
                if !matches!(mode, SessionMode::Live | SessionMode::SweepRunning) {
                    return;
                }
                self.run_agc(&frame).await;
                self.run_detector(&frame, fanout);
                if self.recorder.lock().expect("recorder mutex poisoned").spectrum_recording_active() {
                    let _ = self
                        .recorder
                        .lock()
                        .expect("recorder mutex poisoned")
                        .append_spectrum_frame(&frame);
                }
                let wire = frame_to_wire(&frame);
                fanout.publish_live(encode_spectrum(&wire));
            }
            WorkerEvent::SweepSegment(segment) => {
                fanout.publish_sweep_segment(encode_sweep_segment(&segment));
            }
            WorkerEvent::SweepPanorama(panorama) => {
                fanout.publish_panorama(encode_panorama(&panorama, true));
            }
            WorkerEvent::SweepFinished => {
                let mut state = self.state.lock().await;
                state.mode = SessionMode::Live;
                let _ = self.retune_tx.send(state.device);
            }
            WorkerEvent::SweepAborted => {
                let mut state = self.state.lock().await;
                state.mode = SessionMode::Idle;
                let _ = self.retune_tx.send(state.device);
            }
            WorkerEvent::Fault(err) => {
                let mut state = self.state.lock().await;
                state.device_error = Some(err.to_string());
                let frame = ServerFrame::Error {
                    message: err.to_string(),
                };
                fanout.publish_text(encode_server_frame(&frame));
            }
        }
    }

    async fn run_agc(&self, frame: &spectra_core::SpectrumFrame) {
        if !self.agc_enabled.load(Ordering::Acquire) {
            return;
        }
        let request = {
            let mut agc = self.agc.lock().expect("agc mutex poisoned");
            agc.observe(frame.peak_power, std::time::Instant::now())
        };
        let Some(request) = request else {
            return;
        };
        let step_db = SoftwareAgc::step_db();
        let delta = match request {
            GainRequest::Increase => step_db,
            GainRequest::Decrease => -step_db,
        };
        let mut state = self.state.lock().await;
        let new_gain = state.device.gain + delta;
        let candidate = DeviceParams {
            gain: new_gain,
            ..state.device
        };
        if candidate.validate().is_ok() {
            state.device.gain = new_gain;
            self.gain_bits.store(new_gain.to_bits(), Ordering::Release);
            let _ = self.retune_tx.send(candidate);
        }
    }

    fn run_detector(&self, frame: &spectra_core::SpectrumFrame, fanout: &crate::fanout::BroadcastFanout) {
        let events = {
            let mut detector = self.detector.lock().expect("detector mutex poisoned");
            detector.process_frame(frame, frame.timestamp)
        };
        for event in events {
            let (kind, signal) = match event {
                SignalEvent::New(s) => ("new", s),
                SignalEvent::Update(s) => ("update", s),
                SignalEvent::Lost(s) => ("lost", s),
            };
            let frame = ServerFrame::SignalEvent {
                data: SignalEventData {
                    event: kind.to_string(),
                    signal_id: signal.signal_id,
                    center_freq: signal.center_freq,
                    bandwidth: signal.bandwidth,
                    peak_power: signal.peak_power,
                },
            };
            fanout.publish_text(encode_server_frame(&frame));
        }
    }

    pub async fn status_frame(&self) -> ServerFrame {
        let state = self.state.lock().await.clone();
        ServerFrame::Status { data: state }
    }

    pub async fn handle_command(&self, command: ClientCommand) -> ServerFrame {
        match self.dispatch(command).await {
            Ok(frame) => frame,
            Err(err) => ServerFrame::Error {
                message: err.to_string(),
            },
        }
    }

    async fn dispatch(&self, command: ClientCommand) -> SpectraResult<ServerFrame> {
        match command {
            ClientCommand::Start => {
                let mut state = self.state.lock().await;
                if state.mode == SessionMode::Idle {
                    self.device_running.store(true, Ordering::Release);
                    state.mode = SessionMode::Live;
                }
                Ok(ServerFrame::Status { data: state.clone() })
            }
            ClientCommand::Stop => {
                self.device_running.store(false, Ordering::Release);
                self.await_device_released().await;
                let mut state = self.state.lock().await;
                state.mode = SessionMode::Idle;
                Ok(ServerFrame::Status { data: state.clone() })
            }
            ClientCommand::SetFrequency { value } => {
                self.retune(|p| p.center_freq = value).await
            }
            ClientCommand::SetGain { value } => {
                let frame = self.retune(|p| p.gain = value).await?;
                self.gain_bits.store(value.to_bits(), Ordering::Release);
                Ok(frame)
            }
            ClientCommand::SetBandwidth { value } => self.retune(|p| p.bandwidth = value).await,
            ClientCommand::SetSampleRate { value } => {
                self.retune(|p| p.sample_rate = value).await
            }
            ClientCommand::SetFftSize { value } => {
                let mut state = self.state.lock().await;
                if state.mode != SessionMode::Idle {
                    return Err(SpectraError::busy("cannot change FFT size while streaming"));
                }
                let mut dsp = state.dsp_config.clone();
                dsp.fft_size = value;
                dsp.validate()?;
                self.worker_tx
                    .send(WorkerCommand::Reconfigure(dsp.clone()))
                    .map_err(|_| SpectraError::InternalError("worker channel closed".into()))?;
                state.dsp_config = dsp;
                Ok(ServerFrame::Status { data: state.clone() })
            }
            ClientCommand::SetDsp { params } => self.merge_dsp_config(params).await,
            ClientCommand::SetAgc { enabled } => {
                self.agc_enabled.store(enabled, Ordering::Release);
                let state = self.state.lock().await;
                Ok(ServerFrame::Status { data: state.clone() })
            }
            ClientCommand::SweepStart {
                mode,
                freq_start,
                freq_end,
                sample_rate,
                averages,
            } => self.start_sweep(&mode, freq_start, freq_end, sample_rate, averages).await,
            ClientCommand::SweepStop => {
                self.worker_tx
                    .send(WorkerCommand::ExitSweep)
                    .map_err(|_| SpectraError::InternalError("worker channel closed".into()))?;
                let mut state = self.state.lock().await;
                state.mode = SessionMode::Live;
                Ok(ServerFrame::Status { data: state.clone() })
            }
            ClientCommand::DetectionEnable { enabled } => {
                let mut state = self.state.lock().await;
                state.detector.enabled = enabled;
                self.detector
                    .lock()
                    .expect("detector mutex poisoned")
                    .set_config(state.detector.clone());
                Ok(ServerFrame::Status { data: state.clone() })
            }
            ClientCommand::DetectionSet { params } => {
                let mut state = self.state.lock().await;
                state.detector.threshold_db = params.threshold_db;
                self.detector
                    .lock()
                    .expect("detector mutex poisoned")
                    .set_config(state.detector.clone());
                Ok(ServerFrame::Status { data: state.clone() })
            }
            ClientCommand::RecIqStart => {
                let state = self.state.lock().await;
                let now = wall_clock_seconds();
                self.recorder
                    .lock()
                    .expect("recorder mutex poisoned")
                    .start_iq(state.device.sample_rate, state.device.center_freq, now)?;
                drop(state);
                let mut state = self.state.lock().await;
                state.recorder.iq_recording = true;
                Ok(ServerFrame::Status { data: state.clone() })
            }
            ClientCommand::RecIqStop => {
                self.recorder
                    .lock()
                    .expect("recorder mutex poisoned")
                    .stop_iq(wall_clock_seconds())?;
                let mut state = self.state.lock().await;
                state.recorder.iq_recording = false;
                Ok(ServerFrame::Status { data: state.clone() })
            }
            ClientCommand::RecSpectrumStart => {
                let state = self.state.lock().await;
                let now = wall_clock_seconds();
                self.recorder.lock().expect("recorder mutex poisoned").start_spectrum(
                    state.device.sample_rate,
                    state.device.center_freq,
                    state.dsp_config.fft_size as u32,
                    state.dsp_config.window_kind,
                    now,
                )?;
                drop(state);
                let mut state = self.state.lock().await;
                state.recorder.spectrum_recording = true;
                Ok(ServerFrame::Status { data: state.clone() })
            }
            ClientCommand::RecSpectrumStop => {
                self.recorder
                    .lock()
                    .expect("recorder mutex poisoned")
                    .stop_spectrum(wall_clock_seconds())?;
                let mut state = self.state.lock().await;
                state.recorder.spectrum_recording = false;
                Ok(ServerFrame::Status { data: state.clone() })
            }
            ClientCommand::RecList => {
                let data = self.recorder.lock().expect("recorder mutex poisoned").list()?;
                Ok(ServerFrame::RecList { data })
            }
            ClientCommand::RecDelete { filename } => {
                self.recorder.lock().expect("recorder mutex poisoned").delete(&filename)?;
                let state = self.state.lock().await;
                Ok(ServerFrame::Status { data: state.clone() })
            }
            ClientCommand::PlaybackStart { filename } => self.start_playback(&filename).await,
            ClientCommand::PlaybackPause => {
                if let Some(p) = self.playback.lock().expect("playback mutex poisoned").as_ref() {
                    p.pause();
                }
                let state = self.state.lock().await;
                Ok(ServerFrame::Status { data: state.clone() })
            }
            ClientCommand::PlaybackResume => {
                if let Some(p) = self.playback.lock().expect("playback mutex poisoned").as_ref() {
                    p.resume();
                }
                let state = self.state.lock().await;
                Ok(ServerFrame::Status { data: state.clone() })
            }
            ClientCommand::PlaybackStop => {
                let handle = self.playback.lock().expect("playback mutex poisoned").take();
                if let Some(handle) = handle {
                    handle.stop();
                }
                let mut state = self.state.lock().await;
                state.mode = SessionMode::Idle;
                Ok(ServerFrame::Status { data: state.clone() })
            }
            ClientCommand::PlaybackSpeed { value } => {
                if let Some(p) = self.playback.lock().expect("playback mutex poisoned").as_ref() {
                    p.set_rate(value);
                }
                let state = self.state.lock().await;
                Ok(ServerFrame::Status { data: state.clone() })
            }
            ClientCommand::PlaybackLoop { enabled } => {
                if let Some(p) = self.playback.lock().expect("playback mutex poisoned").as_ref() {
                    p.set_loop(enabled);
                }
                let state = self.state.lock().await;
                Ok(ServerFrame::Status { data: state.clone() })
            }
            ClientCommand::GetStatus | ClientCommand::CheckDevice => {
                let state = self.state.lock().await;
                Ok(ServerFrame::Status { data: state.clone() })
            }
        }
    }

    /// Polls the producer thread's release acknowledgement up to
    /// [`DEVICE_RELEASE_DEADLINE`]. Returns once the device handle is
    /// confirmed released or the deadline passes, whichever is first.
    async fn await_device_released(&self) {
        let deadline = tokio::time::Instant::now() + DEVICE_RELEASE_DEADLINE;
        while self.device_active.load(Ordering::Acquire) {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(DEVICE_RELEASE_POLL).await;
        }
    }

    async fn retune(&self, mutate: impl FnOnce(&mut DeviceParams)) -> SpectraResult<ServerFrame> {
        let mut state = self.state.lock().await;
        let mut candidate = state.device;
        mutate(&mut candidate);
        candidate.validate()?;
        self.retune_tx
            .send(candidate)
            .map_err(|_| SpectraError::InternalError("device channel closed".into()))?;
        state.device = candidate;
        Ok(ServerFrame::Status { data: state.clone() })
    }

    async fn merge_dsp_config(&self, params: Value) -> SpectraResult<ServerFrame> {
        let mut state = self.state.lock().await;
        if state.mode != SessionMode::Idle {
            return Err(SpectraError::busy("cannot change DSP configuration while streaming"));
        }
        let mut current = serde_json::to_value(&state.dsp_config)
            .map_err(|e| SpectraError::InvalidConfig(e.to_string()))?;
        merge_json(&mut current, &params);
        let dsp: DspConfig =
            serde_json::from_value(current).map_err(|e| SpectraError::InvalidConfig(e.to_string()))?;
        dsp.validate()?;
        self.worker_tx
            .send(WorkerCommand::Reconfigure(dsp.clone()))
            .map_err(|_| SpectraError::InternalError("worker channel closed".into()))?;
        state.dsp_config = dsp;
        Ok(ServerFrame::Status { data: state.clone() })
    }

    async fn start_sweep(
        &self,
        mode: &str,
        freq_start: f64,
        freq_end: f64,
        sample_rate: f64,
        averages: u32,
    ) -> SpectraResult<ServerFrame> {
        let sweep_mode = match mode {
            "survey" => SweepMode::Survey,
            "band_monitor" => SweepMode::BandMonitor,
            other => {
                return Err(SpectraError::InvalidConfig(format!(
                    "unknown sweep mode '{other}'"
                )))
            }
        };
        let mut state = self.state.lock().await;
        if state.mode == SessionMode::SweepRunning {
            return Err(SpectraError::busy("a sweep is already running"));
        }
        let output_bins = state.dsp_config.output_bins.unwrap_or(state.dsp_config.fft_size);
        let fft_size = state.dsp_config.fft_size;
        let window_kind = state.dsp_config.window_kind;
        let plan = SweepPlan::compute(
            freq_start,
            freq_end,
            sample_rate,
            self.usable_fraction,
            output_bins,
        )?;
        let sweep_id = self.next_sweep_id.fetch_add(1, Ordering::Relaxed);
        self.device_running.store(true, Ordering::Release);
        self.worker_tx
            .send(WorkerCommand::EnterSweep {
                plan,
                averages: averages.max(1),
                settling_skip: self.settling_skip_blocks,
                output_bins,
                fft_size,
                window_kind,
                sweep_id,
                sweep_mode,
            })
            .map_err(|_| SpectraError::InternalError("worker channel closed".into()))?;
        state.mode = SessionMode::SweepRunning;
        state.next_sweep_id = sweep_id + 1;
        Ok(ServerFrame::Status { data: state.clone() })
    }

    async fn start_playback(&self, raw_filename: &str) -> SpectraResult<ServerFrame> {
        let filename = sanitize_filename(raw_filename);
        if filename.is_empty() {
            return Err(SpectraError::InvalidConfig("empty filename".into()));
        }
        let meta_path = self.recordings_dir.join(format!("{filename}.meta"));
        let content = std::fs::read_to_string(&meta_path)
            .map_err(|e| SpectraError::InvalidConfig(format!("cannot read {filename}.meta: {e}")))?;
        let descriptor: spectra_core::RecordingDescriptor = serde_json::from_str(&content)
            .map_err(|e| SpectraError::InvalidConfig(format!("bad sidecar for {filename}: {e}")))?;

        let handle = PlaybackHandle::start(
            self.recordings_dir.join(&filename),
            filename,
            descriptor.sample_rate,
            descriptor.center_freq,
            self.block_samples,
            Arc::clone(&self.bridge),
            Arc::clone(&self.live_gate),
        )?;
        *self.playback.lock().expect("playback mutex poisoned") = Some(handle);

        let mut state = self.state.lock().await;
        state.mode = SessionMode::Playback;
        Ok(ServerFrame::Status { data: state.clone() })
    }
}

fn merge_json(base: &mut Value, patch: &Value) {
    if let (Value::Object(base_map), Value::Object(patch_map)) = (base, patch) {
        for (key, value) in patch_map {
            base_map.insert(key.clone(), value.clone());
        }
    }
}

fn wall_clock_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[allow(clippy::too_many_arguments)]
fn spawn_worker(
    bridge: Arc<SampleBridge>,
    shutdown: Arc<AtomicBool>,
    gain_bits: Arc<AtomicU32>,
    recorder: Arc<Mutex<Recorder>>,
    initial_dsp: DspConfig,
    worker_rx: std_mpsc::Receiver<WorkerCommand>,
    event_tx: tokio_mpsc::UnboundedSender<WorkerEvent>,
    retune_tx: std_mpsc::Sender<DeviceParams>,
) -> SpectraResult<JoinHandle<()>> {
    let pipeline = DspPipeline::new(initial_dsp)?;
    let handle = std::thread::Builder::new()
        .name("dsp-worker".to_string())
        .spawn(move || {
            let mut sweep: Option<SweepEngine> = None;
            while !shutdown.load(Ordering::Acquire) {
                while let Ok(cmd) = worker_rx.try_recv() {
                    match cmd {
                        WorkerCommand::Reconfigure(dsp) => {
                            if let Err(err) = pipeline.set_param(dsp) {
                                let _ = event_tx.send(WorkerEvent::Fault(err));
                            }
                        }
                        WorkerCommand::EnterSweep {
                            plan,
                            averages,
                            settling_skip,
                            output_bins,
                            fft_size,
                            window_kind,
                            sweep_id,
                            sweep_mode,
                        } => {
                            match SweepEngine::start(
                                plan,
                                averages,
                                settling_skip,
                                output_bins,
                                fft_size,
                                window_kind,
                                sweep_id,
                                sweep_mode,
                            ) {
                                Ok(mut engine) => {
                                    engine.begin_running();
                                    let gain = f32::from_bits(gain_bits.load(Ordering::Acquire));
                                    if let Some(params) = engine.current_step_params(gain) {
                                        let _ = retune_tx.send(params);
                                    }
                                    sweep = Some(engine);
                                }
                                Err(err) => {
                                    let _ = event_tx.send(WorkerEvent::Fault(err));
                                }
                            }
                        }
                        WorkerCommand::ExitSweep => {
                            if let Some(mut engine) = sweep.take() {
                                engine.abort();
                            }
                            let _ = event_tx.send(WorkerEvent::SweepAborted);
                        }
                    }
                }

                let Some(block) = bridge.pop(BRIDGE_POP_TIMEOUT) else {
                    if bridge.is_poisoned() {
                        break;
                    }
                    continue;
                };

                {
                    let mut rec = recorder.lock().expect("recorder mutex poisoned");
                    if rec.iq_recording_active() {
                        if let Err(err) = rec.append_iq_block(&block) {
                            let _ = event_tx.send(WorkerEvent::Fault(err));
                        }
                    }
                }

                if let Some(engine) = sweep.as_mut() {
                    match engine.on_block(&block) {
                        Ok(Some(SweepOutcome::Segment(segment))) => {
                            let gain = f32::from_bits(gain_bits.load(Ordering::Acquire));
                            if let Some(params) = engine.current_step_params(gain) {
                                let _ = retune_tx.send(params);
                            }
                            let _ = event_tx.send(WorkerEvent::SweepSegment(segment));
                        }
                        Ok(Some(SweepOutcome::SegmentAndPanorama(segment, panorama))) => {
                            let _ = event_tx.send(WorkerEvent::SweepSegment(segment));
                            let _ = event_tx.send(WorkerEvent::SweepPanorama(panorama));
                            let _ = event_tx.send(WorkerEvent::SweepFinished);
                        }
                        Ok(None) => {}
                        Err(err) => {
                            let _ = event_tx.send(WorkerEvent::Fault(err));
                        }
                    }
                    if matches!(engine.state(), SweepState::Draining | SweepState::Complete) {
                        sweep = None;
                    }
                } else {
                    let gain = f32::from_bits(gain_bits.load(Ordering::Acquire));
                    match pipeline.process_frame(&block, gain) {
                        Ok(Some(frame)) => {
                            let _ = event_tx.send(WorkerEvent::Frame(frame));
                        }
                        Ok(None) => {}
                        Err(err) => {
                            let _ = event_tx.send(WorkerEvent::Fault(err));
                        }
                    }
                }
            }
            tracing::info!("dsp worker thread exiting");
        })
        .map_err(|e| SpectraError::InternalError(format!("spawn dsp worker failed: {e}")))?;
    Ok(handle)
}
