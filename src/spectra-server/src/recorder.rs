//! IQ and spectrum recorder. Raw complex samples are
//! appended directly to a file; a sidecar `<filename>.meta` JSON record
//! is written on close. Storage is budgeted cumulatively: a baseline
//! usage figure is measured once at startup, and every append adds to
//! it, so the budget tracks total directory size rather than any single
//! file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use spectra_core::{
    RecordingDescriptor, RecordingKind, SampleBlock, SpectraError, SpectraResult, SpectrumFrame,
    WindowKind,
};
use spectra_protocol::sanitize_filename;

struct IqRecording {
    filename: String,
    writer: BufWriter<File>,
    sample_rate: f64,
    center_freq: f64,
    started_at: f64,
    bytes_written: u64,
}

struct SpectrumRecording {
    filename: String,
    writer: BufWriter<File>,
    sample_rate: f64,
    center_freq: f64,
    fft_size: u32,
    window_kind: WindowKind,
    started_at: f64,
    frame_count: u64,
    bytes_written: u64,
}

pub struct Recorder {
    directory: PathBuf,
    storage_budget_bytes: u64,
    baseline_usage_bytes: u64,
    iq: Option<IqRecording>,
    spectrum: Option<SpectrumRecording>,
}

impl Recorder {
    pub fn new(directory: PathBuf, storage_budget_bytes: u64) -> SpectraResult<Self> {
        fs::create_dir_all(&directory)
            .map_err(|e| SpectraError::InternalError(format!("cannot create recordings dir: {e}")))?;
        let baseline_usage_bytes = directory_size(&directory)?;
        Ok(Self {
            directory,
            storage_budget_bytes,
            baseline_usage_bytes,
            iq: None,
            spectrum: None,
        })
    }

    fn used_bytes(&self) -> u64 {
        self.baseline_usage_bytes
            + self.iq.as_ref().map_or(0, |r| r.bytes_written)
            + self.spectrum.as_ref().map_or(0, |r| r.bytes_written)
    }

    pub fn iq_recording_active(&self) -> bool {
        self.iq.is_some()
    }

    pub fn spectrum_recording_active(&self) -> bool {
        self.spectrum.is_some()
    }

    pub fn start_iq(&mut self, sample_rate: f64, center_freq: f64, now: f64) -> SpectraResult<String> {
        if self.iq.is_some() {
            return Err(SpectraError::Busy("IQ recording already in progress".into()));
        }
        let filename = format!("iq_{}.iq", (now * 1000.0) as u64);
        let path = self.directory.join(&filename);
        let file = File::create(&path)
            .map_err(|e| SpectraError::InternalError(format!("cannot create {filename}: {e}")))?;
        self.iq = Some(IqRecording {
            filename: filename.clone(),
            writer: BufWriter::new(file),
            sample_rate,
            center_freq,
            started_at: now,
            bytes_written: 0,
        });
        Ok(filename)
    }

    /// Appends one Sample Block as little-endian interleaved complex
    /// float32 — the one deliberately different byte order in the system.
    pub fn append_iq_block(&mut self, block: &SampleBlock) -> SpectraResult<()> {
        let used_before = self.used_bytes();
        let rec = match &mut self.iq {
            Some(rec) => rec,
            None => return Ok(()),
        };
        let added = (block.samples.len() * 4) as u64;
        if used_before + added > self.storage_budget_bytes {
            return Err(SpectraError::StorageExhausted {
                used_bytes: used_before,
                budget_bytes: self.storage_budget_bytes,
            });
        }
        for &sample in &block.samples {
            rec.writer
                .write_all(&sample.to_le_bytes())
                .map_err(|e| SpectraError::InternalError(format!("IQ write failed: {e}")))?;
        }
        rec.bytes_written += added;
        Ok(())
    }

    pub fn stop_iq(&mut self, now: f64) -> SpectraResult<Option<RecordingDescriptor>> {
        let Some(mut rec) = self.iq.take() else {
            return Ok(None);
        };
        rec.writer
            .flush()
            .map_err(|e| SpectraError::InternalError(format!("IQ flush failed: {e}")))?;
        let descriptor = RecordingDescriptor {
            kind: RecordingKind::Iq,
            filename: rec.filename.clone(),
            byte_size: rec.bytes_written,
            created_at: rec.started_at,
            sample_rate: rec.sample_rate,
            center_freq: rec.center_freq,
            fft_size: None,
            window_kind: None,
            duration_or_frame_count: rec.bytes_written / 8,
        };
        write_sidecar(&self.directory, &rec.filename, &descriptor)?;
        self.baseline_usage_bytes += rec.bytes_written;
        let _ = now;
        Ok(Some(descriptor))
    }

    pub fn start_spectrum(
        &mut self,
        sample_rate: f64,
        center_freq: f64,
        fft_size: u32,
        window_kind: WindowKind,
        now: f64,
    ) -> SpectraResult<String> {
        if self.spectrum.is_some() {
            return Err(SpectraError::Busy("spectrum recording already in progress".into()));
        }
        let filename = format!("spectrum_{}.spec", (now * 1000.0) as u64);
        let path = self.directory.join(&filename);
        let file = File::create(&path)
            .map_err(|e| SpectraError::InternalError(format!("cannot create {filename}: {e}")))?;
        self.spectrum = Some(SpectrumRecording {
            filename: filename.clone(),
            writer: BufWriter::new(file),
            sample_rate,
            center_freq,
            fft_size,
            window_kind,
            started_at: now,
            frame_count: 0,
            bytes_written: 0,
        });
        Ok(filename)
    }

    /// Appends `[u32 length][u32 num_bins][f64 timestamp][f64 center_freq]
    /// [f64 sample_rate][num_bins x f32]`, big-endian, matching the wire
    /// protocol's byte order.
    pub fn append_spectrum_frame(&mut self, frame: &SpectrumFrame) -> SpectraResult<()> {
        let used_before = self.used_bytes();
        let rec = match &mut self.spectrum {
            Some(rec) => rec,
            None => return Ok(()),
        };
        let num_bins = frame.bins.len() as u32;
        let record_len = 4 + 8 + 8 + 8 + (num_bins as u64 * 4);
        let added = record_len + 4;
        if used_before + added > self.storage_budget_bytes {
            return Err(SpectraError::StorageExhausted {
                used_bytes: used_before,
                budget_bytes: self.storage_budget_bytes,
            });
        }
        let write_all = |w: &mut BufWriter<File>| -> std::io::Result<()> {
            w.write_all(&(record_len as u32).to_be_bytes())?;
            w.write_all(&num_bins.to_be_bytes())?;
            w.write_all(&frame.timestamp.to_be_bytes())?;
            w.write_all(&frame.center_freq.to_be_bytes())?;
            w.write_all(&frame.sample_rate.to_be_bytes())?;
            for &bin in &frame.bins {
                w.write_all(&bin.to_be_bytes())?;
            }
            Ok(())
        };
        write_all(&mut rec.writer)
            .map_err(|e| SpectraError::InternalError(format!("spectrum write failed: {e}")))?;
        rec.bytes_written += added;
        rec.frame_count += 1;
        Ok(())
    }

    pub fn stop_spectrum(&mut self, now: f64) -> SpectraResult<Option<RecordingDescriptor>> {
        let Some(mut rec) = self.spectrum.take() else {
            return Ok(None);
        };
        rec.writer
            .flush()
            .map_err(|e| SpectraError::InternalError(format!("spectrum flush failed: {e}")))?;
        let descriptor = RecordingDescriptor {
            kind: RecordingKind::Spectrum,
            filename: rec.filename.clone(),
            byte_size: rec.bytes_written,
            created_at: rec.started_at,
            sample_rate: rec.sample_rate,
            center_freq: rec.center_freq,
            fft_size: Some(rec.fft_size),
            window_kind: Some(rec.window_kind),
            duration_or_frame_count: rec.frame_count,
        };
        write_sidecar(&self.directory, &rec.filename, &descriptor)?;
        self.baseline_usage_bytes += rec.bytes_written;
        let _ = now;
        Ok(Some(descriptor))
    }

    pub fn list(&self) -> SpectraResult<Vec<RecordingDescriptor>> {
        let mut out = Vec::new();
        let entries = fs::read_dir(&self.directory)
            .map_err(|e| SpectraError::InternalError(format!("cannot list recordings: {e}")))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("meta") {
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(descriptor) = serde_json::from_str::<RecordingDescriptor>(&content) {
                        out.push(descriptor);
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn delete(&self, raw_filename: &str) -> SpectraResult<()> {
        let filename = sanitize_filename(raw_filename);
        if filename.is_empty() {
            return Err(SpectraError::InvalidConfig("empty filename".into()));
        }
        let data_path = self.directory.join(&filename);
        let meta_path = self.directory.join(format!("{filename}.meta"));
        let _ = fs::remove_file(&data_path);
        let _ = fs::remove_file(&meta_path);
        Ok(())
    }
}

fn write_sidecar(directory: &Path, filename: &str, descriptor: &RecordingDescriptor) -> SpectraResult<()> {
    let meta_path = directory.join(format!("{filename}.meta"));
    let content = serde_json::to_string_pretty(descriptor)
        .map_err(|e| SpectraError::InternalError(format!("sidecar encode failed: {e}")))?;
    fs::write(&meta_path, content)
        .map_err(|e| SpectraError::InternalError(format!("sidecar write failed: {e}")))
}

fn directory_size(directory: &Path) -> SpectraResult<u64> {
    let mut total = 0u64;
    let entries = fs::read_dir(directory)
        .map_err(|e| SpectraError::InternalError(format!("cannot measure baseline usage: {e}")))?;
    for entry in entries.flatten() {
        if let Ok(metadata) = entry.metadata() {
            if metadata.is_file() {
                total += metadata.len();
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iq_round_trip_produces_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(dir.path().to_path_buf(), 1_000_000).unwrap();
        recorder.start_iq(1e6, 1e8, 1000.0).unwrap();
        recorder
            .append_iq_block(&SampleBlock {
                samples: vec![0.1, 0.2, 0.3, 0.4],
                center_freq: 1e8,
                sample_rate: 1e6,
                seq: 0,
            })
            .unwrap();
        let descriptor = recorder.stop_iq(1001.0).unwrap().unwrap();
        assert_eq!(descriptor.byte_size, 16);
        assert_eq!(descriptor.duration_or_frame_count, 2);
        let sidecar = dir.path().join(format!("{}.meta", descriptor.filename));
        assert!(sidecar.exists());
    }

    #[test]
    fn storage_budget_halts_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(dir.path().to_path_buf(), 8).unwrap();
        recorder.start_iq(1e6, 1e8, 0.0).unwrap();
        let block = SampleBlock {
            samples: vec![0.0; 8],
            center_freq: 1e8,
            sample_rate: 1e6,
            seq: 0,
        };
        let result = recorder.append_iq_block(&block);
        assert!(matches!(result, Err(SpectraError::StorageExhausted { .. })));
    }

    #[test]
    fn delete_sanitizes_filename() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path().to_path_buf(), 1_000_000).unwrap();
        fs::write(dir.path().join("a.iq"), b"x").unwrap();
        recorder.delete("../../a.iq").unwrap();
        assert!(!dir.path().join("a.iq").exists());
    }

    #[test]
    fn played_back_samples_match_recorded_samples() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        use std::time::Duration;

        use spectra_backend::SampleBridge;

        use crate::playback::PlaybackHandle;

        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(dir.path().to_path_buf(), 1_000_000).unwrap();
        let filename = recorder.start_iq(2e6, 1e8, 0.0).unwrap();
        let captured = vec![0.25_f32, -0.5, 0.75, -1.0, 0.125, 0.625];
        recorder
            .append_iq_block(&SampleBlock {
                samples: captured.clone(),
                center_freq: 1e8,
                sample_rate: 2e6,
                seq: 0,
            })
            .unwrap();
        recorder.stop_iq(1.0).unwrap();

        let bridge = Arc::new(SampleBridge::new(4));
        let live_gate = Arc::new(AtomicBool::new(false));
        let handle = PlaybackHandle::start(
            dir.path().join(&filename),
            filename,
            2e6,
            1e8,
            captured.len() / 2,
            Arc::clone(&bridge),
            Arc::clone(&live_gate),
        )
        .unwrap();

        let block = bridge
            .pop(Duration::from_secs(2))
            .expect("played-back block never arrived");
        assert_eq!(block.samples, captured);

        handle.stop();
        assert!(!live_gate.load(Ordering::Acquire));
    }
}
