//! Crossfade-blends overlapping sweep segment edges into a contiguous
//! panorama, entirely in linear power. Bins no step has written yet are
//! left at [`spectra_core::UNSCANNED_DBFS`].
//!
//! Segments are fed in as dBFS (the same normalized scale the DSP
//! pipeline emits) and converted to `10^(dBFS/10)` internally so the
//! round trip through dB is exact and the weights-sum-to-one invariant
//! holds bin-for-bin.

use spectra_core::{Panorama, SweepMode, UNSCANNED_DBFS};

const POWER_EPSILON: f32 = 1e-20;

pub struct Stitcher {
    freq_start: f64,
    freq_end: f64,
    total_bins: usize,
    linear: Vec<f32>,
    written: Vec<bool>,
    last_written_bin: Option<usize>,
}

impl Stitcher {
    #[must_use]
    pub fn new(freq_start: f64, freq_end: f64, total_bins: usize) -> Self {
        Self {
            freq_start,
            freq_end,
            total_bins,
            linear: vec![0.0; total_bins],
            written: vec![false; total_bins],
            last_written_bin: None,
        }
    }

    fn bin_index(&self, freq: f64) -> usize {
        let frac = (freq - self.freq_start) / (self.freq_end - self.freq_start);
        ((frac * self.total_bins as f64).round() as i64)
            .clamp(0, self.total_bins as i64 - 1) as usize
    }

    /// Adds one step's dBFS bins, covering `[freq_lo, freq_hi]`.
    pub fn add_segment(&mut self, freq_lo: f64, freq_hi: f64, dbfs_bins: &[f32]) {
        if dbfs_bins.is_empty() || self.total_bins == 0 {
            return;
        }
        let lo = self.bin_index(freq_lo);
        let hi = self.bin_index(freq_hi).max(lo + 1).min(self.total_bins);

        let overlap_end = self.last_written_bin.map(|b| b.min(hi.saturating_sub(1)));
        let overlap_len = overlap_end
            .map(|end| if end >= lo { end - lo + 1 } else { 0 })
            .unwrap_or(0);

        for (rank, g) in (lo..hi).enumerate() {
            let src_frac = rank as f64 / (hi - lo).max(1) as f64;
            let src_idx = ((src_frac * dbfs_bins.len() as f64) as usize).min(dbfs_bins.len() - 1);
            let new_linear = db_to_linear(dbfs_bins[src_idx]);

            if overlap_len > 0 && rank < overlap_len && self.written[g] {
                let w = (rank + 1) as f32 / overlap_len as f32;
                self.linear[g] = w * new_linear + (1.0 - w) * self.linear[g];
            } else {
                self.linear[g] = new_linear;
            }
            self.written[g] = true;
        }

        self.last_written_bin = Some(self.last_written_bin.map_or(hi - 1, |prev| prev.max(hi - 1)));
    }

    #[must_use]
    pub fn finish(&self, sweep_id: u32, sweep_mode: SweepMode, sweep_time_ms: f32, timestamp: f64) -> Panorama {
        let bins = self
            .linear
            .iter()
            .zip(self.written.iter())
            .map(|(&p, &w)| if w { linear_to_db(p) } else { UNSCANNED_DBFS })
            .collect();
        Panorama {
            sweep_id,
            sweep_mode,
            freq_start: self.freq_start,
            freq_end: self.freq_end,
            bins,
            sweep_time_ms,
            timestamp,
        }
    }
}

fn db_to_linear(dbfs: f32) -> f32 {
    10f32.powf(dbfs / 10.0)
}

fn linear_to_db(linear: f32) -> f32 {
    10.0 * linear.max(POWER_EPSILON).log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unscanned_bins_carry_sentinel() {
        let stitcher = Stitcher::new(100e6, 130e6, 100);
        let panorama = stitcher.finish(1, SweepMode::Survey, 0.0, 0.0);
        assert!(panorama.bins.iter().all(|&v| v == UNSCANNED_DBFS));
    }

    #[test]
    fn crossfade_neutrality() {
        let mut stitcher = Stitcher::new(100e6, 120e6, 200);
        let const_power_dbfs = -30.0_f32;
        let bins_a = vec![const_power_dbfs; 64];
        let bins_b = vec![const_power_dbfs; 64];

        stitcher.add_segment(100e6, 111e6, &bins_a);
        stitcher.add_segment(109e6, 120e6, &bins_b);

        let panorama = stitcher.finish(1, SweepMode::Survey, 0.0, 0.0);
        for &v in &panorama.bins {
            assert!(v != UNSCANNED_DBFS);
            assert!(
                (v - const_power_dbfs).abs() < 1e-3,
                "expected {const_power_dbfs}, got {v}"
            );
        }
    }

    #[test]
    fn no_plus_3db_seam_with_differing_levels() {
        let mut stitcher = Stitcher::new(0.0, 20.0, 200);
        stitcher.add_segment(0.0, 11.0, &vec![-10.0; 32]);
        stitcher.add_segment(9.0, 20.0, &vec![-10.0; 32]);
        let panorama = stitcher.finish(1, SweepMode::Survey, 0.0, 0.0);
        let max = panorama
            .bins
            .iter()
            .cloned()
            .fold(f32::MIN, f32::max);
        assert!(max < -9.9, "seam inflated peak to {max}");
    }
}
