//! Local fingerprint extraction.
//!
//! Audio blocks are windowed overlap-and-save style into an energy
//! spectrogram; spectral peaks are detected with a Laplacian-of-block
//! filter and thinned by non-maximum suppression; each surviving point of
//! interest (POI) gets a binary descriptor computed by hysteresis coding
//! over a grid of scanning windows in its neighborhood.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::warn;

use crate::fingerprinting::fft::FftProcessor;
use crate::params;
use crate::{Error, Result};

/// A local fingerprint: a time-frequency point plus a binary descriptor
/// of its spectral neighborhood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFingerprint {
    /// Sequential ID within the stream, starting at 0.
    pub id: u32,
    /// Time position in spectral frames (includes the stream time
    /// translation).
    pub t: u32,
    /// Frequency position in spectrum bins, within [Kmin, Kmax].
    pub f: u32,
    /// Packed descriptor, IDI bits.
    pub descriptor: Vec<u8>,
}

/// A quantized local fingerprint: the LF's time-frequency point with its
/// descriptor replaced by the nearest codeword and the quantization error.
///
/// This is the persisted form of an LF. A recording's fingerprint is a
/// sequence of these, packed as 8-byte little-endian records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Qlf {
    /// Time position in spectral frames.
    pub t: u32,
    /// Frequency position in spectrum bins.
    pub f: u16,
    /// Codeword, in [0, Kmed).
    pub w: u8,
    /// Hamming distance to the codeword's centroid, clipped to 255.
    pub e: u8,
}

impl Qlf {
    /// Packed record size in bytes.
    pub const SIZE: usize = 8;

    /// Append the packed record to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.write_u32::<LittleEndian>(self.t).unwrap();
        out.write_u16::<LittleEndian>(self.f).unwrap();
        out.push(self.w);
        out.push(self.e);
    }

    /// Pack a QLF sequence into its persisted form.
    pub fn pack(qlfs: &[Qlf]) -> Vec<u8> {
        let mut out = Vec::with_capacity(qlfs.len() * Self::SIZE);
        for qlf in qlfs {
            qlf.write_to(&mut out);
        }
        out
    }

    /// Parse a packed QLF sequence, validating the record fields.
    pub fn parse(bytes: &[u8]) -> Result<Vec<Qlf>> {
        if bytes.is_empty() {
            return Err(Error::InvalidFingerprint(
                "zero-sized fingerprint data".to_string(),
            ));
        }
        if bytes.len() % Self::SIZE != 0 {
            return Err(Error::InvalidFingerprint(format!(
                "fingerprint size {} is not a multiple of the {}-byte record",
                bytes.len(),
                Self::SIZE
            )));
        }
        let mut rd = std::io::Cursor::new(bytes);
        let mut qlfs = Vec::with_capacity(bytes.len() / Self::SIZE);
        for _ in 0..bytes.len() / Self::SIZE {
            let qlf = Qlf {
                t: rd.read_u32::<LittleEndian>().unwrap(),
                f: rd.read_u16::<LittleEndian>().unwrap(),
                w: rd.read_u8().unwrap(),
                e: rd.read_u8().unwrap(),
            };
            if qlf.w as usize >= params::KMED || qlf.e as usize > params::IDI {
                return Err(Error::InvalidFingerprint(format!(
                    "QLF record out of range (W={}, E={})",
                    qlf.w, qlf.e
                )));
            }
            qlfs.push(qlf);
        }
        Ok(qlfs)
    }
}

/// 3x3 Laplacian-of-block kernel. Good boosting factors for the central
/// element are in [5,7].
const LBL_KERNEL: [[f32; 3]; 3] = [[-1.0, -1.0, -1.0], [-1.0, 6.0, -1.0], [-1.0, -1.0, -1.0]];

/// Hysteresis thresholds for the descriptor coding.
const HYST_RATIO_MIN: f32 = 2.0;
const HYST_LEVEL: f32 = 0.25;

/// Streaming local fingerprint extractor.
///
/// Feed audio with [`Fingerprinter::process`] and read the LFs produced by
/// the last call with [`Fingerprinter::get`]. The extractor keeps the
/// overlap-and-save tail and the stream time translation across calls, so
/// a recording can be processed in arbitrary chunks (not shorter than
/// 0.5 s each).
pub struct Fingerprinter {
    fft: FftProcessor,
    os_tail: Vec<f32>,
    os_capacity: usize,
    spectrum: Vec<Vec<f32>>,
    peaks: Vec<Vec<f32>>,
    lfs: Vec<LocalFingerprint>,
    next_lid: u32,
    delta_t: u32,
}

impl Fingerprinter {
    /// Create a fingerprinter with the default buffer sizing (about 2 s of
    /// audio per processed block before a reallocation warning).
    pub fn new() -> Self {
        Self::with_buffer_size(params::FS as usize * 2 + params::WINDOW_SIZE)
    }

    /// Create a fingerprinter sized for blocks of up to `size` samples.
    pub fn with_buffer_size(size: usize) -> Self {
        Self {
            fft: FftProcessor::new(),
            os_tail: Vec::with_capacity(params::WINDOW_SIZE),
            os_capacity: size,
            spectrum: Vec::new(),
            peaks: Vec::new(),
            lfs: Vec::new(),
            next_lid: 0,
            delta_t: 0,
        }
    }

    /// Extract local fingerprints from an audio block (mono 11025 Hz,
    /// normalized in [-1,1]).
    ///
    /// Blocks shorter than 0.5 s are ignored: there is not enough context
    /// around any peak to compute a complete descriptor. With `flush`,
    /// residual samples held in the overlap-and-save tail are processed as
    /// zero-padded partial windows; use it on the last block of a finite
    /// stream.
    pub fn process(&mut self, samples: &[f32], flush: bool) {
        self.spectrum.clear();
        self.peaks.clear();
        self.lfs.clear();

        if (samples.len() as f64) / f64::from(params::FS) < 0.5 {
            return;
        }

        self.compute_spectrum(samples, flush);
        self.find_peaks();
        self.extract_poi();
        self.compute_descriptors();

        // time-translate the next snippet
        self.delta_t += self.spectrum.len() as u32;
    }

    /// Extract local fingerprints from a typed audio buffer, enforcing the
    /// engine's sample-rate contract.
    pub fn process_buffer(
        &mut self,
        audio: &crate::fingerprinting::audio_buffer::AudioBuffer,
        flush: bool,
    ) -> Result<()> {
        if audio.sample_rate() != params::FS {
            return Err(Error::InvalidParameter(format!(
                "audio must be {} Hz mono, got {} Hz",
                params::FS,
                audio.sample_rate()
            )));
        }
        self.process(audio.samples(), flush);
        Ok(())
    }

    /// The LF stream produced by the last [`Fingerprinter::process`] call.
    pub fn get(&self) -> &[LocalFingerprint] {
        &self.lfs
    }

    /// Take the LF stream produced by the last call, leaving it empty.
    pub fn take(&mut self) -> Vec<LocalFingerprint> {
        std::mem::take(&mut self.lfs)
    }

    /// The time translation (in frames) applied to the next block.
    pub fn time_delta(&self) -> u32 {
        self.delta_t
    }

    /// Reset all streaming state, including the time translation.
    pub fn reset(&mut self) {
        self.os_tail.clear();
        self.spectrum.clear();
        self.peaks.clear();
        self.lfs.clear();
        self.next_lid = 0;
        self.delta_t = 0;
    }

    fn compute_spectrum(&mut self, samples: &[f32], flush: bool) {
        // Prepend the last O&S tail to the current block
        let mut buf = std::mem::take(&mut self.os_tail);
        buf.extend_from_slice(samples);

        if buf.len() > self.os_capacity {
            warn!("O&S buffer reallocation ({} > {})", buf.len(), self.os_capacity);
            self.os_capacity = buf.len();
        }

        // Slide full windows over the block
        let mut frame = Vec::with_capacity(params::SPECTRUM_BINS);
        let mut wstart = 0;
        while wstart + params::WINDOW_SIZE <= buf.len() {
            self.fft
                .energy_frame(&buf[wstart..wstart + params::WINDOW_SIZE], &mut frame);
            self.spectrum.push(frame.clone());
            wstart += params::HOP_SIZE;
        }

        // Retain the residual as the next O&S tail
        self.os_tail = buf.split_off(wstart.min(buf.len()));

        // On flush, the residual is consumed as zero-padded partial windows
        if flush && !self.os_tail.is_empty() {
            let tail = std::mem::take(&mut self.os_tail);
            let mut wstart = 0;
            while wstart < tail.len() {
                let end = (wstart + params::WINDOW_SIZE).min(tail.len());
                self.fft.energy_frame(&tail[wstart..end], &mut frame);
                self.spectrum.push(frame.clone());
                wstart += params::HOP_SIZE;
            }
        }
    }

    /// Convolve the spectrum with the LBL kernel and record candidate
    /// peaks with their local energy. Points too close to the spectrum
    /// boundaries are skipped so descriptors are never incomplete.
    fn find_peaks(&mut self) {
        let nframes = self.spectrum.len();
        self.peaks.clear();
        self.peaks.resize(nframes, vec![0.0; params::NBINS]);

        if nframes < 2 * params::RNPT + 1 {
            return;
        }

        for m in params::RNPT..nframes - params::RNPT {
            for k in params::KMIN + params::RNPF..params::KMAX - params::RNPF {
                let mut y = 0.0f32;
                let mut ep = 0.0f32;
                for (i, row) in LBL_KERNEL.iter().enumerate() {
                    for (j, &h) in row.iter().enumerate() {
                        let x = self.spectrum[m - 1 + i][k - 1 + j];
                        y += x * h;
                        ep += x;
                    }
                }
                // a positive response marks a possible peak at (m,k)
                if y > 0.0 {
                    self.peaks[m][k - params::KMIN] = ep;
                }
            }
        }
    }

    /// Non-maximum suppression over the candidate peaks. Surviving POIs
    /// are marked in place in the spectrum by flipping the sign of their
    /// bin, which lets the descriptor pass recover them in one traversal.
    fn extract_poi(&mut self) {
        let nframes = self.peaks.len();
        for m in 0..nframes {
            for k in 0..params::NBINS {
                if self.peaks[m][k] <= 0.0 {
                    continue;
                }

                let is = m.saturating_sub(params::RWP);
                let ie = (m + params::RWP).min(nframes - 1);
                let js = k.saturating_sub(params::RHP);
                let je = (k + params::RHP).min(params::NBINS - 1);

                let mut ismax = true;
                'nms: for i in is..=ie {
                    for j in js..=je {
                        if self.peaks[i][j] > self.peaks[m][k] {
                            ismax = false;
                            break 'nms;
                        }
                    }
                }

                if ismax {
                    self.spectrum[m][params::KMIN + k] = -self.spectrum[m][params::KMIN + k];
                }
            }
        }
    }

    /// Compute a descriptor for every marked POI and emit the local
    /// fingerprints in time order.
    fn compute_descriptors(&mut self) {
        let nframes = self.spectrum.len();

        for m in 0..nframes {
            for k in 0..params::SPECTRUM_BINS {
                if self.spectrum[m][k] >= 0.0 {
                    continue;
                }
                self.spectrum[m][k] = -self.spectrum[m][k];

                let descriptor = self.poi_descriptor(m as isize, k as isize);
                debug_assert_eq!(descriptor.len() * 8, params::IDI);

                let lf = LocalFingerprint {
                    id: self.next_lid,
                    t: self.delta_t + m as u32,
                    f: k as u32,
                    descriptor,
                };
                self.next_lid += 1;
                self.lfs.push(lf);
            }
        }
    }

    /// Scan the POI's neighborhood N(p) with overlapped windows and build
    /// the descriptor by hysteresis coding of the window-to-neighbor
    /// energy relations. Two 4-bit sub-descriptors are packed per byte,
    /// low nibble first.
    fn poi_descriptor(&self, m: isize, k: isize) -> Vec<u8> {
        // origin of N(p) and of the first scanning window center
        let npo_t = m - params::RNPT as isize;
        let npo_f = k - params::RNPF as isize;
        let wco_t = npo_t + params::RWCT as isize;
        let wco_f = npo_f + params::RWCF as isize;

        let mut descriptor = Vec::with_capacity(params::IDI_BYTES);
        let mut packed = 0u8;
        let mut high_nibble = false;

        for i in 0..params::NWCT as isize {
            for j in 0..params::NWCF as isize {
                let wc_t = wco_t + i * params::NST as isize;
                let wc_f = wco_f + j * params::NSF as isize;

                let ewc = self.window_energy(wc_t, wc_f);

                let db = (params::NBT + params::RWCT) as isize;
                let df = (params::NBF + params::RWCF) as isize;
                let east = self.window_energy(wc_t + db, wc_f);
                let west = self.window_energy(wc_t - db, wc_f);
                let north = self.window_energy(wc_t, wc_f + df);
                let south = self.window_energy(wc_t, wc_f - df);

                let mut vc = 0u8;
                let mut ratio_max = 0.0f32;
                let mut lmax = 0.0f32;
                for &en in &[east, west, north, south] {
                    ratio_max = ratio_max.max(ewc.max(en) / ewc.min(en));
                    lmax = lmax.max((ewc - en).abs());
                }

                if ratio_max > HYST_RATIO_MIN {
                    if (ewc - west).abs() / lmax > HYST_LEVEL && ewc > west {
                        vc |= 1;
                    }
                    if (ewc - east).abs() / lmax > HYST_LEVEL && east > ewc {
                        vc |= 2;
                    }
                    if (ewc - north).abs() / lmax > HYST_LEVEL && ewc > north {
                        vc |= 4;
                    }
                    if (ewc - south).abs() / lmax > HYST_LEVEL && south > ewc {
                        vc |= 8;
                    }
                }

                if high_nibble {
                    descriptor.push(packed | (vc << 4));
                    packed = 0;
                    high_nibble = false;
                } else {
                    packed = vc;
                    high_nibble = true;
                }
            }
        }

        // flush a trailing sub-descriptor when nWc is odd
        if high_nibble {
            descriptor.push(packed);
        }

        descriptor
    }

    /// Energy of a (2*rWcT+1) x (2*rWcF+1) window centered at the given
    /// spectrum point, clipped to the spectrum bounds.
    fn window_energy(&self, t_center: isize, f_center: isize) -> f32 {
        let nframes = self.spectrum.len() as isize;
        let nbins = params::SPECTRUM_BINS as isize;
        let mut energy = 0.0f32;
        for u in t_center - params::RWCT as isize..=t_center + params::RWCT as isize {
            if u < 0 || u >= nframes {
                continue;
            }
            for v in f_center - params::RWCF as isize..=f_center + params::RWCF as isize {
                if v < 0 || v >= nbins {
                    continue;
                }
                energy += self.spectrum[u as usize][v as usize].abs();
            }
        }
        energy
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}
