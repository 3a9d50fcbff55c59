//! Audio fingerprint generation and pairwise similarity.
//!
//! The generator turns a decoded sample buffer into an ordered sequence of
//! 32-bit perceptual hashes, one per overlapping analysis frame. Each hash
//! encodes the sign of the temporal derivative of 33 spectral band energies,
//! so two recordings of the same content produce hash sequences that agree in
//! most bit positions even under mild distortion.
//!
//! Decoding is out of scope: callers hand the generator an [`AudioBuffer`] of
//! already-decoded samples and receive an immutable [`Fingerprint`].

use std::fmt::Write as _;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

/// Analysis window length in samples.
pub const FRAME_SIZE: usize = 4096;
/// Hop between consecutive frames (50% overlap).
pub const HOP_SIZE: usize = FRAME_SIZE / 2;
/// Number of contiguous, equal-width spectral bands per frame.
pub const NUM_BANDS: usize = 33;

/// Decoded audio handed to the generator. Owned by the caller; the generator
/// only borrows it for the duration of one `generate` call.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved or mono samples, as decoded.
    pub samples: Vec<f32>,
    /// Samples per second.
    pub sample_rate: u32,
    /// Channel count; informational, the generator treats samples as one stream.
    pub channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }
}

/// Compact perceptual summary of an audio signal.
///
/// `hashes` is temporally ordered (one entry per analysis frame). `raw_hash`
/// is a fixed hex serialization of the hash sequence — eight lowercase hex
/// digits per hash, most significant bit first — used as a cache and index
/// key. Immutable once produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub hashes: Vec<u32>,
    pub duration_ms: u64,
    pub raw_hash: String,
}

impl Fingerprint {
    /// Number of per-frame hashes.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Fraction of agreeing bits over the first `min(len, other.len)` hash
    /// pairs, in `[0, 1]`.
    ///
    /// Truncation to the shorter sequence is deliberate: it keeps the metric
    /// cheap and symmetric, at the cost of ignoring the tail of the longer
    /// fingerprint. Returns `0.0` when either side has no hashes; comparing a
    /// non-empty fingerprint with itself yields exactly `1.0`.
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        if self.hashes.is_empty() || other.hashes.is_empty() {
            return 0.0;
        }

        let min_len = self.hashes.len().min(other.hashes.len());
        let mut matching_bits = 0u64;
        for (a, b) in self.hashes.iter().zip(&other.hashes).take(min_len) {
            matching_bits += u64::from(32 - (a ^ b).count_ones());
        }

        matching_bits as f64 / (32 * min_len) as f64
    }
}

/// Turns sample buffers into [`Fingerprint`]s.
///
/// Holds a pre-planned forward FFT; construction is cheap enough for
/// throwaway use but a long-lived service should reuse one instance.
pub struct FingerprintGenerator {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl FingerprintGenerator {
    pub fn new() -> Self {
        let fft = FftPlanner::new().plan_fft_forward(FRAME_SIZE);
        // Hamming window, applied per frame to reduce spectral leakage.
        let window = (0..FRAME_SIZE)
            .map(|i| {
                0.54 - 0.46 * (2.0 * std::f32::consts::PI * i as f32 / (FRAME_SIZE - 1) as f32).cos()
            })
            .collect();
        Self { fft, window }
    }

    /// Generate a fingerprint from decoded samples.
    ///
    /// Fails closed: an empty or undersized buffer (fewer samples than one
    /// analysis frame) yields an empty hash sequence and zero duration, never
    /// an error. The first frame's derivative is taken against an all-zero
    /// feature vector, and that reference state is reset on every call, so
    /// repeated calls over the same buffer are fully deterministic.
    pub fn generate(&self, audio: &AudioBuffer) -> Fingerprint {
        if audio.samples.len() < FRAME_SIZE || audio.sample_rate == 0 {
            return Fingerprint::default();
        }

        let duration_ms = audio.samples.len() as u64 * 1000 / u64::from(audio.sample_rate);
        let num_frames = (audio.samples.len() - FRAME_SIZE) / HOP_SIZE + 1;

        let mut hashes = Vec::with_capacity(num_frames);
        let mut prev_features = [0.0f32; NUM_BANDS];
        let mut frame = vec![Complex::new(0.0f32, 0.0); FRAME_SIZE];

        for i in 0..num_frames {
            let start = i * HOP_SIZE;
            for (slot, (&sample, &w)) in frame
                .iter_mut()
                .zip(audio.samples[start..start + FRAME_SIZE].iter().zip(&self.window))
            {
                *slot = Complex::new(sample * w, 0.0);
            }

            self.fft.process(&mut frame);

            let features = band_features(&frame[..FRAME_SIZE / 2]);
            hashes.push(features_to_hash(&features, &prev_features));
            prev_features = features;
        }

        let mut raw_hash = String::with_capacity(hashes.len() * 8);
        for hash in &hashes {
            // write! to a String cannot fail
            let _ = write!(raw_hash, "{hash:08x}");
        }

        Fingerprint {
            hashes,
            duration_ms,
            raw_hash,
        }
    }
}

impl Default for FingerprintGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Group the magnitude spectrum into equal-width bands; per-band feature is
/// the log-compressed energy `ln(1 + Σ |X|²)`.
fn band_features(spectrum: &[Complex<f32>]) -> [f32; NUM_BANDS] {
    let mut features = [0.0f32; NUM_BANDS];
    let bins_per_band = spectrum.len() / NUM_BANDS;

    for (band, feature) in features.iter_mut().enumerate() {
        let start = band * bins_per_band;
        let end = ((band + 1) * bins_per_band).min(spectrum.len());
        let energy: f32 = spectrum[start..end].iter().map(Complex::norm_sqr).sum();
        *feature = energy.ln_1p();
    }

    features
}

/// One bit per band: set iff that band's energy rose relative to the previous
/// frame. The sign of the temporal derivative is robust to overall gain.
///
/// Only the first 32 band derivatives fit a 32-bit hash; the last band still
/// contributes as derivative context for the next frame but has no bit of
/// its own.
fn features_to_hash(features: &[f32; NUM_BANDS], prev_features: &[f32; NUM_BANDS]) -> u32 {
    let mut hash = 0u32;
    for (i, (cur, prev)) in features.iter().zip(prev_features).enumerate().take(32) {
        if cur - prev > 0.0 {
            hash |= 1 << i;
        }
    }
    hash
}
