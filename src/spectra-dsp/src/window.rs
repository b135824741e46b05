//! Window function tables. Each window carries a coherent-gain and a
//! power-gain correction used to normalize the dBFS conversion.

use spectra_core::WindowKind;
use std::f64::consts::PI;

#[derive(Debug, Clone)]
pub struct WindowTable {
    pub weights: Vec<f32>,
    /// Mean of the squared window weights; this is the `window_power_gain`
    /// term in `dBFS = 10*log10(p) - 10*log10(N^2 * window_power_gain)`.
    pub power_gain: f64,
}

impl WindowTable {
    #[must_use]
    pub fn generate(kind: WindowKind, n: usize) -> Self {
        let weights64 = raw_weights(kind, n);
        let power_gain = weights64.iter().map(|w| w * w).sum::<f64>() / n as f64;
        let weights = weights64.iter().map(|&w| w as f32).collect();
        Self { weights, power_gain }
    }
}

fn raw_weights(kind: WindowKind, n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0; n];
    }
    let nm1 = (n - 1) as f64;
    (0..n)
        .map(|i| {
            let x = i as f64;
            match kind {
                WindowKind::Rectangular => 1.0,
                WindowKind::Hanning => 0.5 - 0.5 * (2.0 * PI * x / nm1).cos(),
                WindowKind::Blackman => {
                    0.42 - 0.5 * (2.0 * PI * x / nm1).cos() + 0.08 * (4.0 * PI * x / nm1).cos()
                }
                WindowKind::BlackmanHarris => {
                    0.35875 - 0.48829 * (2.0 * PI * x / nm1).cos()
                        + 0.14128 * (4.0 * PI * x / nm1).cos()
                        - 0.01168 * (6.0 * PI * x / nm1).cos()
                }
                WindowKind::FlatTop => {
                    const A: [f64; 5] = [
                        0.215_578_95,
                        0.416_631_58,
                        0.277_263_158,
                        0.083_578_947,
                        0.006_947_368,
                    ];
                    A[0] - A[1] * (2.0 * PI * x / nm1).cos() + A[2] * (4.0 * PI * x / nm1).cos()
                        - A[3] * (6.0 * PI * x / nm1).cos()
                        + A[4] * (8.0 * PI * x / nm1).cos()
                }
                WindowKind::Kaiser6 | WindowKind::Kaiser10 | WindowKind::Kaiser14 => {
                    let beta = kind.kaiser_beta().unwrap_or(8.6);
                    let ratio = (2.0 * x / nm1) - 1.0;
                    bessel_i0(beta * (1.0 - ratio * ratio).max(0.0).sqrt()) / bessel_i0(beta)
                }
            }
        })
        .collect()
}

/// Modified Bessel function of the first kind, order 0, via its power
/// series. Converges in well under 40 terms for the beta range used here.
fn bessel_i0(x: f64) -> f64 {
    let mut term = 1.0;
    let mut sum = 1.0;
    let half_x_sq = (x / 2.0) * (x / 2.0);
    for k in 1..40 {
        term *= half_x_sq / (k as f64 * k as f64);
        sum += term;
        if term < sum * 1e-16 {
            break;
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangular_window_is_flat() {
        let w = WindowTable::generate(WindowKind::Rectangular, 16);
        assert!(w.weights.iter().all(|&x| (x - 1.0).abs() < 1e-6));
        assert!((w.power_gain - 1.0).abs() < 1e-6);
    }

    #[test]
    fn hanning_window_edges_are_near_zero() {
        let w = WindowTable::generate(WindowKind::Hanning, 64);
        assert!(w.weights[0].abs() < 1e-6);
        assert!((w.weights[63] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn kaiser_window_is_symmetric() {
        let w = WindowTable::generate(WindowKind::Kaiser10, 32);
        for i in 0..16 {
            assert!((w.weights[i] - w.weights[31 - i]).abs() < 1e-5);
        }
    }
}
