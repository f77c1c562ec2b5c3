//! Fixed parameters of the fingerprinting and matching algorithms.
//!
//! Most of these values are interdependent: every buffer, descriptor and
//! term size downstream is derived from them, so changing one without
//! recomputing the others will corrupt indexes. Values that cannot be
//! expressed as const expressions carry their derivation in a comment.

/// Audio sample rate expected by the whole engine (Hz, mono).
pub const FS: u32 = 11025;

/// Analysis window size in samples, before zero padding.
pub const WINDOW_SIZE: usize = 1024;

/// FFT frame size after zero padding.
pub const FFT_SIZE: usize = 2048;

/// Number of usable spectrum bins per FFT frame.
pub const SPECTRUM_BINS: usize = FFT_SIZE / 2 + 1;

/// Window hop in samples (~13.88 ms).
pub const HOP_SIZE: usize = 153;

/// Spectrum frequency resolution (Hz per bin).
pub const DF: f64 = FS as f64 / FFT_SIZE as f64;

/// Spectrum time resolution (seconds per frame).
pub const DT: f64 = HOP_SIZE as f64 / FS as f64;

/// Analysis band limits in Hz. FMAX must lie in ]FMIN, FS/2].
pub const FMIN: u32 = 100;
pub const FMAX: u32 = 3100;

/// Analysis band limits in spectrum bins.
pub const KMIN: usize = (FFT_SIZE as u32 * FMIN / FS) as usize;
pub const KMAX: usize = (FFT_SIZE as u32 * FMAX / FS) as usize;

/// Number of bins in the analysis band.
pub const NBINS: usize = KMAX - KMIN + 1;

// Peak neighborhood radii for non-maximum suppression, in frames/bins.
// rWp = (0.400 s / 2) / DT, rHp = (340 Hz / 2) / DF.
pub const RWP: usize = 14;
pub const RHP: usize = 31;

// POI neighborhood N(p) radii, in frames/bins.
// rNpT = (0.300 s / 2) / DT, rNpF = (200 Hz / 2) / DF.
pub const RNPT: usize = 10;
pub const RNPF: usize = 18;

// Scanning window Wc radii, in frames/bins.
// rWcT = (0.050 s / 2) / DT, rWcF = (35 Hz / 2) / DF.
pub const RWCT: usize = 1;
pub const RWCF: usize = 3;

// Scanning window strides and neighbor displacements (50% of the window
// spans, converted to frames/bins).
pub const NST: usize = 1;
pub const NSF: usize = 3;
pub const NBT: usize = 1;
pub const NBF: usize = 3;

/// Number of scanning windows along time and frequency in N(p).
pub const NWCT: usize = ((RNPT * 2 + 1) - (RWCT * 2 + 1)) / NST;
pub const NWCF: usize = ((RNPF * 2 + 1) - (RWCF * 2 + 1)) / NSF;

/// Number of scanning windows in N(p).
pub const NWC: usize = NWCT * NWCF;

/// Descriptor size in bits, rounded up to the next byte.
pub const IDI: usize = (4 * NWC + 7) / 8 * 8;

/// Descriptor size in bytes.
pub const IDI_BYTES: usize = IDI / 8;

/// Time and frequency quantization steps used by pair terms and the
/// re-ranking edge hash.
pub const QT: f32 = 5.0;
pub const QF: f32 = 9.0;

/// Max score assignable by the ranking systems. All weights are in [0,1],
/// so this is the score unit.
pub const SMAX: i64 = 1000;

/// Number of codewords in the audio codebook (K of the k-medians).
pub const KMED: usize = 100;

/// Minimum number of LFs consumed by one matching step (~1 s of audio).
pub const NK: usize = 20;

/// Size of a time histogram bin in spectral frames (~5 s of audio).
pub const TK: u32 = 365;

/// Size of the top-k candidate list kept by the matcher.
pub const TOP_K: usize = 20;

/// Number of LFs around a pivot used by the re-ranking stage.
pub const NTF: usize = 32;

/// Maximum identification time in seconds.
pub const MAX_ID_TIME: f32 = 20.0;

/// Maximum recording length in seconds. Longer recordings should be split
/// into parts or they will produce oversized index blocks.
pub const MAX_RECORDING_LENGTH: u32 = 1800;

/// Default maximum recording duration assumed by the matcher's histograms
/// (seconds). Recordings longer than this trigger a reallocation warning.
pub const DEFAULT_MAX_RECORDING_DURATION: u32 = 900;

/// Get the number of spectral channels used by single terms.
pub fn channels_count() -> u32 {
    (NBINS as f32 / QF).ceil() as u32
}
