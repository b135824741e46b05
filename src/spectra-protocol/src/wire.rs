//! Binary wire protocol, big-endian throughout. Fixed-size headers, one
//! allocation per encode call, never retains references to caller
//! buffers past the call.

use spectra_core::{Panorama, SpectraError, SpectraResult, SpectrumFrame, SweepMode, SweepSegment};

pub const PROTOCOL_VERSION: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Spectrum = 0x01,
    SweepSegment = 0x03,
    SweepPanorama = 0x04,
}

impl MsgType {
    fn from_u8(v: u8) -> SpectraResult<Self> {
        match v {
            0x01 => Ok(Self::Spectrum),
            0x03 => Ok(Self::SweepSegment),
            0x04 => Ok(Self::SweepPanorama),
            other => Err(SpectraError::ProtocolError(format!(
                "unknown message type 0x{other:02x}"
            ))),
        }
    }
}

pub mod flags {
    pub const PEAK_HOLD_PRESENT: u16 = 0x0001;
    pub const SWEEP_COMPLETE: u16 = 0x0002;
    pub const SWEEP_IN_PROGRESS: u16 = 0x0004;
}

const HEADER_LEN: usize = 8;
const SPECTRUM_PAYLOAD_HEADER_LEN: usize = 56;
const SWEEP_SEGMENT_PAYLOAD_HEADER_LEN: usize = 44;
const SWEEP_PANORAMA_PAYLOAD_HEADER_LEN: usize = 40;

fn write_header(out: &mut Vec<u8>, msg_type: MsgType, flags: u16, payload_len: u32) {
    out.push(PROTOCOL_VERSION);
    out.push(msg_type as u8);
    out.extend_from_slice(&flags.to_be_bytes());
    out.extend_from_slice(&payload_len.to_be_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> SpectraResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(SpectraError::ProtocolError("frame truncated".into()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> SpectraResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> SpectraResult<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> SpectraResult<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> SpectraResult<f32> {
        Ok(f32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> SpectraResult<f64> {
        Ok(f64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f32_vec(&mut self, n: usize) -> SpectraResult<Vec<f32>> {
        let bytes = self.take(n * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_be_bytes(c.try_into().unwrap()))
            .collect())
    }
}

/// Decoded spectrum frame, plus the derived `peak_freq_offset` carried on
/// the wire (offset of the peak bin from the capture's center frequency).
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumWireFrame {
    pub center_freq: f64,
    pub sample_rate: f64,
    pub bandwidth: f64,
    pub gain: f32,
    pub fft_size: u32,
    pub noise_floor: f32,
    pub peak_power: f32,
    pub peak_freq_offset: f32,
    pub timestamp: f64,
    pub bins: Vec<f32>,
    pub peak_hold: Option<Vec<f32>>,
}

/// Builds the wire frame from a pipeline [`SpectrumFrame`], deriving
/// `peak_freq_offset` from the peak bin's position relative to the band
/// center.
#[must_use]
pub fn frame_to_wire(frame: &SpectrumFrame) -> SpectrumWireFrame {
    let num_bins = frame.num_bins().max(1);
    let bin_width = frame.bandwidth / num_bins as f64;
    let peak_freq_offset = (frame.peak_bin as f64 - num_bins as f64 / 2.0) * bin_width;
    SpectrumWireFrame {
        center_freq: frame.center_freq,
        sample_rate: frame.sample_rate,
        bandwidth: frame.bandwidth,
        gain: frame.gain,
        fft_size: frame.fft_size,
        noise_floor: frame.noise_floor,
        peak_power: frame.peak_power,
        peak_freq_offset: peak_freq_offset as f32,
        timestamp: frame.timestamp,
        bins: frame.bins.clone(),
        peak_hold: frame.peak_hold.clone(),
    }
}

pub fn encode_spectrum(frame: &SpectrumWireFrame) -> Vec<u8> {
    let num_bins = frame.bins.len() as u32;
    let has_peak_hold = frame.peak_hold.is_some();
    let payload_len = SPECTRUM_PAYLOAD_HEADER_LEN as u32
        + num_bins * 4
        + if has_peak_hold { num_bins * 4 } else { 0 };

    let mut out = Vec::with_capacity(HEADER_LEN + payload_len as usize);
    let flags = if has_peak_hold { flags::PEAK_HOLD_PRESENT } else { 0 };
    write_header(&mut out, MsgType::Spectrum, flags, payload_len);

    out.extend_from_slice(&frame.center_freq.to_be_bytes());
    out.extend_from_slice(&frame.sample_rate.to_be_bytes());
    out.extend_from_slice(&frame.bandwidth.to_be_bytes());
    out.extend_from_slice(&frame.gain.to_be_bytes());
    out.extend_from_slice(&frame.fft_size.to_be_bytes());
    out.extend_from_slice(&num_bins.to_be_bytes());
    out.extend_from_slice(&frame.noise_floor.to_be_bytes());
    out.extend_from_slice(&frame.peak_power.to_be_bytes());
    out.extend_from_slice(&frame.peak_freq_offset.to_be_bytes());
    out.extend_from_slice(&frame.timestamp.to_be_bytes());
    for &bin in &frame.bins {
        out.extend_from_slice(&bin.to_be_bytes());
    }
    if let Some(peak_hold) = &frame.peak_hold {
        for &bin in peak_hold {
            out.extend_from_slice(&bin.to_be_bytes());
        }
    }
    out
}

pub fn decode_spectrum(buf: &[u8]) -> SpectraResult<SpectrumWireFrame> {
    let mut r = Reader::new(buf);
    let version = r.u8()?;
    if version != PROTOCOL_VERSION {
        return Err(SpectraError::ProtocolError(format!(
            "unsupported protocol version {version}"
        )));
    }
    let msg_type = MsgType::from_u8(r.u8()?)?;
    if msg_type != MsgType::Spectrum {
        return Err(SpectraError::ProtocolError("not a spectrum frame".into()));
    }
    let frame_flags = r.u16()?;
    let _payload_len = r.u32()?;

    let center_freq = r.f64()?;
    let sample_rate = r.f64()?;
    let bandwidth = r.f64()?;
    let gain = r.f32()?;
    let fft_size = r.u32()?;
    let num_bins = r.u32()? as usize;
    let noise_floor = r.f32()?;
    let peak_power = r.f32()?;
    let peak_freq_offset = r.f32()?;
    let timestamp = r.f64()?;
    let bins = r.f32_vec(num_bins)?;
    let peak_hold = if frame_flags & flags::PEAK_HOLD_PRESENT != 0 {
        Some(r.f32_vec(num_bins)?)
    } else {
        None
    };

    Ok(SpectrumWireFrame {
        center_freq,
        sample_rate,
        bandwidth,
        gain,
        fft_size,
        noise_floor,
        peak_power,
        peak_freq_offset,
        timestamp,
        bins,
        peak_hold,
    })
}

pub fn encode_sweep_segment(segment: &SweepSegment) -> Vec<u8> {
    let num_bins = segment.bins.len() as u32;
    let payload_len = SWEEP_SEGMENT_PAYLOAD_HEADER_LEN as u32 + num_bins * 4;
    let mut out = Vec::with_capacity(HEADER_LEN + payload_len as usize);
    write_header(&mut out, MsgType::SweepSegment, 0, payload_len);

    out.extend_from_slice(&segment.sweep_id.to_be_bytes());
    out.extend_from_slice(&segment.segment_idx.to_be_bytes());
    out.extend_from_slice(&segment.total_segments.to_be_bytes());
    out.extend_from_slice(&segment.freq_lo.to_be_bytes());
    out.extend_from_slice(&segment.freq_hi.to_be_bytes());
    out.extend_from_slice(&segment.sweep_start.to_be_bytes());
    out.extend_from_slice(&segment.sweep_end.to_be_bytes());
    out.extend_from_slice(&num_bins.to_be_bytes());
    for &bin in &segment.bins {
        out.extend_from_slice(&bin.to_be_bytes());
    }
    out
}

pub fn decode_sweep_segment(buf: &[u8]) -> SpectraResult<SweepSegment> {
    let mut r = Reader::new(buf);
    let version = r.u8()?;
    if version != PROTOCOL_VERSION {
        return Err(SpectraError::ProtocolError(format!(
            "unsupported protocol version {version}"
        )));
    }
    let msg_type = MsgType::from_u8(r.u8()?)?;
    if msg_type != MsgType::SweepSegment {
        return Err(SpectraError::ProtocolError("not a sweep segment".into()));
    }
    let _frame_flags = r.u16()?;
    let _payload_len = r.u32()?;

    let sweep_id = r.u32()?;
    let segment_idx = r.u16()?;
    let total_segments = r.u16()?;
    let freq_lo = r.f64()?;
    let freq_hi = r.f64()?;
    let sweep_start = r.f64()?;
    let sweep_end = r.f64()?;
    let num_bins = r.u32()? as usize;
    let bins = r.f32_vec(num_bins)?;

    Ok(SweepSegment {
        sweep_id,
        segment_idx,
        total_segments,
        freq_lo,
        freq_hi,
        sweep_start,
        sweep_end,
        bins,
    })
}

pub fn encode_panorama(panorama: &Panorama, sweep_complete: bool) -> Vec<u8> {
    let num_bins = panorama.bins.len() as u32;
    let payload_len = SWEEP_PANORAMA_PAYLOAD_HEADER_LEN as u32 + num_bins * 4;
    let mut out = Vec::with_capacity(HEADER_LEN + payload_len as usize);
    let flags = if sweep_complete { flags::SWEEP_COMPLETE } else { 0 };
    write_header(&mut out, MsgType::SweepPanorama, flags, payload_len);

    out.extend_from_slice(&panorama.sweep_id.to_be_bytes());
    out.push(match panorama.sweep_mode {
        SweepMode::Survey => 0,
        SweepMode::BandMonitor => 1,
    });
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&panorama.freq_start.to_be_bytes());
    out.extend_from_slice(&panorama.freq_end.to_be_bytes());
    out.extend_from_slice(&num_bins.to_be_bytes());
    out.extend_from_slice(&panorama.sweep_time_ms.to_be_bytes());
    out.extend_from_slice(&panorama.timestamp.to_be_bytes());
    for &bin in &panorama.bins {
        out.extend_from_slice(&bin.to_be_bytes());
    }
    out
}

pub fn decode_panorama(buf: &[u8]) -> SpectraResult<Panorama> {
    let mut r = Reader::new(buf);
    let version = r.u8()?;
    if version != PROTOCOL_VERSION {
        return Err(SpectraError::ProtocolError(format!(
            "unsupported protocol version {version}"
        )));
    }
    let msg_type = MsgType::from_u8(r.u8()?)?;
    if msg_type != MsgType::SweepPanorama {
        return Err(SpectraError::ProtocolError("not a panorama".into()));
    }
    let _frame_flags = r.u16()?;
    let _payload_len = r.u32()?;

    let sweep_id = r.u32()?;
    let sweep_mode = match r.u8()? {
        0 => SweepMode::Survey,
        1 => SweepMode::BandMonitor,
        other => {
            return Err(SpectraError::ProtocolError(format!(
                "unknown sweep mode {other}"
            )))
        }
    };
    let _padding = r.take(3)?;
    let freq_start = r.f64()?;
    let freq_end = r.f64()?;
    let num_bins = r.u32()? as usize;
    let sweep_time_ms = r.f32()?;
    let timestamp = r.f64()?;
    let bins = r.f32_vec(num_bins)?;

    Ok(Panorama {
        sweep_id,
        sweep_mode,
        freq_start,
        freq_end,
        bins,
        sweep_time_ms,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spectrum_frame_round_trips() {
        let frame = SpectrumWireFrame {
            center_freq: 100e6,
            sample_rate: 2e6,
            bandwidth: 2e6,
            gain: 20.0,
            fft_size: 1024,
            noise_floor: -90.0,
            peak_power: -10.0,
            peak_freq_offset: 12345.0,
            timestamp: 1_700_000_000.123,
            bins: vec![-50.0, -40.0, -30.0],
            peak_hold: Some(vec![-45.0, -35.0, -25.0]),
        };
        let encoded = encode_spectrum(&frame);
        let decoded = decode_spectrum(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn spectrum_frame_without_peak_hold_round_trips() {
        let frame = SpectrumWireFrame {
            center_freq: 100e6,
            sample_rate: 2e6,
            bandwidth: 2e6,
            gain: 20.0,
            fft_size: 1024,
            noise_floor: -90.0,
            peak_power: -10.0,
            peak_freq_offset: 0.0,
            timestamp: 0.0,
            bins: vec![-50.0; 8],
            peak_hold: None,
        };
        let encoded = encode_spectrum(&frame);
        assert_eq!(encoded[0], PROTOCOL_VERSION);
        let decoded = decode_spectrum(&encoded).unwrap();
        assert!(decoded.peak_hold.is_none());
    }

    #[test]
    fn sweep_segment_round_trips() {
        let segment = SweepSegment {
            sweep_id: 7,
            segment_idx: 2,
            total_segments: 4,
            freq_lo: 108e6,
            freq_hi: 116e6,
            sweep_start: 100e6,
            sweep_end: 130e6,
            bins: vec![-60.0, -59.5, -58.0],
        };
        let encoded = encode_sweep_segment(&segment);
        let decoded = decode_sweep_segment(&encoded).unwrap();
        assert_eq!(decoded.sweep_id, segment.sweep_id);
        assert_eq!(decoded.segment_idx, segment.segment_idx);
        assert_eq!(decoded.bins, segment.bins);
    }

    #[test]
    fn panorama_round_trips() {
        let panorama = Panorama {
            sweep_id: 3,
            sweep_mode: SweepMode::BandMonitor,
            freq_start: 100e6,
            freq_end: 130e6,
            bins: vec![-70.0; 16],
            sweep_time_ms: 1234.5,
            timestamp: 42.0,
        };
        let encoded = encode_panorama(&panorama, true);
        assert_eq!(encoded[3] & 0x01, 0);
        assert_eq!(u16::from_be_bytes([encoded[2], encoded[3]]), flags::SWEEP_COMPLETE);
        let decoded = decode_panorama(&encoded).unwrap();
        assert_eq!(decoded.sweep_id, panorama.sweep_id);
        assert_eq!(decoded.sweep_mode, panorama.sweep_mode);
        assert_eq!(decoded.bins, panorama.bins);
    }

    #[test]
    fn rejects_truncated_frame() {
        let buf = vec![PROTOCOL_VERSION, 0x01, 0, 0];
        assert!(decode_spectrum(&buf).is_err());
    }

    #[test]
    fn rejects_unknown_message_type() {
        let mut buf = vec![PROTOCOL_VERSION, 0xff];
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        assert!(decode_spectrum(&buf).is_err());
    }
}
