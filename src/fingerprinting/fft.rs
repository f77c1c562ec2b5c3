//! Hamming-windowed, zero-padded real FFT energy frames.

use chfft::RFft1D;

use crate::params;

/// Computes energy spectrum frames from analysis windows.
///
/// Input windows of up to [`params::WINDOW_SIZE`] samples are multiplied
/// by a Hamming window, zero-padded to [`params::FFT_SIZE`] and passed
/// through a real FFT; the output frame holds the per-bin energies
/// (squared magnitudes) of the positive-frequency half plus DC and
/// Nyquist.
pub struct FftProcessor {
    fft: RFft1D<f32>,
    window: Vec<f32>,
    padded: Vec<f32>,
}

impl FftProcessor {
    pub fn new() -> Self {
        // Hamming window over the non-padded frame
        let scale = 2.0 * std::f32::consts::PI / (params::WINDOW_SIZE as f32 - 1.0);
        let window = (0..params::WINDOW_SIZE)
            .map(|n| 0.54 - 0.46 * (scale * n as f32).cos())
            .collect();

        Self {
            fft: RFft1D::new(params::FFT_SIZE),
            window,
            padded: vec![0.0; params::FFT_SIZE],
        }
    }

    /// Transform one analysis window into an energy frame. Windows shorter
    /// than [`params::WINDOW_SIZE`] (the flush tail) are zero-padded like
    /// the rest of the frame.
    pub fn energy_frame(&mut self, samples: &[f32], frame: &mut Vec<f32>) {
        debug_assert!(samples.len() <= params::WINDOW_SIZE);

        for slot in self.padded.iter_mut() {
            *slot = 0.0;
        }
        for (i, &s) in samples.iter().enumerate() {
            self.padded[i] = s * self.window[i];
        }

        let spectrum = self.fft.forward(&self.padded);
        debug_assert_eq!(spectrum.len(), params::SPECTRUM_BINS);

        frame.clear();
        frame.extend(spectrum.iter().map(|c| c.re * c.re + c.im * c.im));
    }
}

impl Default for FftProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_and_positivity() {
        let mut fft = FftProcessor::new();
        let mut frame = Vec::new();
        let samples = vec![0.5f32; params::WINDOW_SIZE];
        fft.energy_frame(&samples, &mut frame);
        assert_eq!(frame.len(), params::SPECTRUM_BINS);
        assert!(frame.iter().all(|&e| e >= 0.0));
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let mut fft = FftProcessor::new();
        let mut frame = Vec::new();

        // 1 kHz tone at 11025 Hz -> bin ~ 1000/DF ~ 185.8
        let samples: Vec<f32> = (0..params::WINDOW_SIZE)
            .map(|n| {
                (2.0 * std::f32::consts::PI * 1000.0 * n as f32 / params::FS as f32).sin()
            })
            .collect();
        fft.energy_frame(&samples, &mut frame);

        let peak = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        let expected = (1000.0 / params::DF).round() as usize;
        assert!((peak as i64 - expected as i64).abs() <= 1);
    }

    #[test]
    fn silence_is_all_zero() {
        let mut fft = FftProcessor::new();
        let mut frame = Vec::new();
        fft.energy_frame(&vec![0.0f32; params::WINDOW_SIZE], &mut frame);
        assert!(frame.iter().all(|&e| e == 0.0));
    }
}
