//! Real hardware Device Source over SoapySDR, feature-gated behind
//! `soapysdr-sys`. Falls back across device-args candidates on open
//! failure and logs actual vs. requested parameters after configure.

use spectra_core::{DeviceParams, SpectraError, SpectraResult};

use crate::source::DeviceSource;

pub struct RealDeviceSource {
    args: String,
    params: DeviceParams,
    device: Option<soapysdr::Device>,
    stream: Option<soapysdr::RxStream<num_complex::Complex<f32>>>,
    scratch: Vec<num_complex::Complex<f32>>,
}

impl RealDeviceSource {
    pub fn new(args: &str, params: DeviceParams) -> SpectraResult<Self> {
        let mut source = Self {
            args: args.to_string(),
            params,
            device: None,
            stream: None,
            scratch: Vec::new(),
        };
        source.start()?;
        Ok(source)
    }

    fn open(&self) -> SpectraResult<(soapysdr::Device, soapysdr::RxStream<num_complex::Complex<f32>>)> {
        let device = soapysdr::Device::new(self.args.as_str())
            .or_else(|_| soapysdr::Device::new(""))
            .map_err(|e| SpectraError::DeviceUnavailable(e.to_string()))?;

        device
            .set_frequency(soapysdr::Direction::Rx, 0, self.params.center_freq, ())
            .map_err(|e| SpectraError::DeviceUnavailable(e.to_string()))?;
        device
            .set_sample_rate(soapysdr::Direction::Rx, 0, self.params.sample_rate)
            .map_err(|e| SpectraError::DeviceUnavailable(e.to_string()))?;
        device
            .set_bandwidth(soapysdr::Direction::Rx, 0, self.params.bandwidth)
            .map_err(|e| SpectraError::DeviceUnavailable(e.to_string()))?;
        device
            .set_gain(soapysdr::Direction::Rx, 0, self.params.gain as f64)
            .map_err(|e| SpectraError::DeviceUnavailable(e.to_string()))?;

        let actual_freq = device
            .frequency(soapysdr::Direction::Rx, 0)
            .unwrap_or(self.params.center_freq);
        let actual_rate = device
            .sample_rate(soapysdr::Direction::Rx, 0)
            .unwrap_or(self.params.sample_rate);
        tracing::info!(
            requested_freq = self.params.center_freq,
            actual_freq,
            requested_rate = self.params.sample_rate,
            actual_rate,
            "configured soapysdr device"
        );

        let mut stream = device
            .rx_stream::<num_complex::Complex<f32>>(&[0])
            .map_err(|e| SpectraError::DeviceUnavailable(e.to_string()))?;
        stream
            .activate(None)
            .map_err(|e| SpectraError::DeviceUnavailable(e.to_string()))?;

        Ok((device, stream))
    }
}

impl DeviceSource for RealDeviceSource {
    fn configure(&mut self, params: DeviceParams) -> SpectraResult<()> {
        params.validate()?;
        self.params = params;
        let Some(device) = self.device.as_ref() else {
            return Ok(());
        };
        device
            .set_frequency(soapysdr::Direction::Rx, 0, params.center_freq, ())
            .map_err(|e| SpectraError::DeviceUnavailable(e.to_string()))?;
        device
            .set_gain(soapysdr::Direction::Rx, 0, params.gain as f64)
            .map_err(|e| SpectraError::DeviceUnavailable(e.to_string()))
    }

    /// Opens the device and activates the RX stream if not already open.
    /// A no-op when called again without an intervening `stop`.
    fn start(&mut self) -> SpectraResult<()> {
        if self.device.is_some() {
            return Ok(());
        }
        let (device, stream) = self.open()?;
        self.device = Some(device);
        self.stream = Some(stream);
        Ok(())
    }

    /// Deactivates the RX stream and drops the device handle entirely, so
    /// a second, independent open of the same hardware succeeds.
    fn stop(&mut self) -> SpectraResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.deactivate(None);
        }
        self.device = None;
        Ok(())
    }

    fn read_into(&mut self, out: &mut [f32]) -> SpectraResult<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SpectraError::DeviceUnavailable("device not started".into()))?;
        let num_samples = out.len() / 2;
        self.scratch.resize(num_samples, num_complex::Complex::default());
        stream
            .read(&mut [&mut self.scratch[..]], 1_000_000)
            .map_err(|e| SpectraError::DeviceUnavailable(e.to_string()))?;
        for (pair, c) in out.chunks_exact_mut(2).zip(self.scratch.iter()) {
            pair[0] = c.re;
            pair[1] = c.im;
        }
        Ok(())
    }
}

impl Drop for RealDeviceSource {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.deactivate(None);
        }
    }
}
