//! Uncompressed audio container — minimal WAV encoding.
//!
//! Pure functions, no I/O. The assembler writes this intermediate container
//! once per job before handing it to the external encoder.

/// Synthesis output format: 24 kHz mono 16-bit signed LE.
pub const SAMPLE_RATE: u32 = 24_000;
pub const CHANNELS: u16 = 1;
pub const BITS_PER_SAMPLE: u16 = 16;

/// Byte length of the fixed RIFF/fmt/data header.
pub const HEADER_LEN: usize = 44;

/// Build the 44-byte container header for `sample_count` mono 16-bit samples.
pub fn wav_header(sample_count: usize, sample_rate: u32) -> [u8; HEADER_LEN] {
    let data_len = (sample_count * 2) as u32;
    let byte_rate = sample_rate * (CHANNELS as u32) * (BITS_PER_SAMPLE as u32) / 8;
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;

    let mut h = [0u8; HEADER_LEN];
    h[0..4].copy_from_slice(b"RIFF");
    h[4..8].copy_from_slice(&(36 + data_len).to_le_bytes());
    h[8..12].copy_from_slice(b"WAVE");
    h[12..16].copy_from_slice(b"fmt ");
    h[16..20].copy_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    h[20..22].copy_from_slice(&1u16.to_le_bytes()); // linear PCM
    h[22..24].copy_from_slice(&CHANNELS.to_le_bytes());
    h[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    h[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    h[32..34].copy_from_slice(&block_align.to_le_bytes());
    h[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    h[36..40].copy_from_slice(b"data");
    h[40..44].copy_from_slice(&data_len.to_le_bytes());
    h
}

/// Encode raw samples as a complete WAV file image.
pub fn write_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + samples.len() * 2);
    buf.extend_from_slice(&wav_header(samples.len(), sample_rate));
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }
    buf
}

/// Header fields of an encoded container, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHeader {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub data_len: u32,
}

impl WavHeader {
    /// Declared audio duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        let bytes_per_second =
            self.sample_rate as f64 * self.channels as f64 * (self.bits_per_sample as f64 / 8.0);
        self.data_len as f64 / bytes_per_second
    }
}

/// Parse the fixed 44-byte header produced by [`write_wav`].
pub fn parse_wav_header(buf: &[u8]) -> Result<WavHeader, &'static str> {
    if buf.len() < HEADER_LEN {
        return Err("too short for WAV header");
    }
    if &buf[0..4] != b"RIFF" || &buf[8..12] != b"WAVE" {
        return Err("missing RIFF/WAVE tags");
    }
    if &buf[12..16] != b"fmt " {
        return Err("missing fmt chunk");
    }
    if u16::from_le_bytes([buf[20], buf[21]]) != 1 {
        return Err("not linear PCM");
    }
    if &buf[36..40] != b"data" {
        return Err("missing data chunk");
    }
    Ok(WavHeader {
        channels: u16::from_le_bytes([buf[22], buf[23]]),
        sample_rate: u32::from_le_bytes([buf[24], buf[25], buf[26], buf[27]]),
        bits_per_sample: u16::from_le_bytes([buf[34], buf[35]]),
        data_len: u32::from_le_bytes([buf[40], buf[41], buf[42], buf[43]]),
    })
}

/// Seconds of audio represented by `sample_count` mono samples.
pub fn duration_seconds(sample_count: usize, sample_rate: u32) -> f64 {
    sample_count as f64 / sample_rate as f64
}
