//! Synthetic fingerprint generation.
//!
//! Produces random but structurally valid QLF streams, useful for
//! exercising the indexing and matching stages at scale without decoding
//! audio. The generated density (15-25 LFs per ~1 s interval) matches
//! what the fingerprinter extracts from typical program material.

use rand::Rng;

use crate::fingerprinting::fingerprinter::Qlf;
use crate::params;

/// 1-second time-frequency interval used to lay out the random LFs.
const DT_FRAMES: u32 = 73;

/// A synthetic fingerprint generator.
pub struct QlfGenerator<R: Rng> {
    rng: R,
}

impl<R: Rng> QlfGenerator<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Generate a random fingerprint of 240-420 seconds.
    pub fn generate(&mut self) -> Vec<Qlf> {
        let seconds = self.rng.gen_range(240u32, 420u32);
        self.generate_frames((f64::from(seconds) / params::DT) as u32)
    }

    /// Generate a random fingerprint spanning the given number of
    /// spectral frames.
    pub fn generate_frames(&mut self, frames: u32) -> Vec<Qlf> {
        let mut qlfs = Vec::new();
        let mut toffset = 0u32;

        while toffset <= frames {
            // random distinct t-f points within the interval
            let nlf = self.rng.gen_range(15usize, 26usize);
            let mut points = Vec::with_capacity(nlf);
            while points.len() < nlf {
                let t = self.rng.gen_range(0u32, DT_FRAMES);
                let f = self.rng.gen_range(0u32, params::NBINS as u32);
                if !points.contains(&(t, f)) {
                    points.push((t, f));
                }
            }
            // QLFs are emitted in time order
            points.sort();

            for (t, f) in points {
                qlfs.push(Qlf {
                    t: toffset + t,
                    f: (params::KMIN as u32 + f) as u16,
                    w: self.rng.gen_range(0u8, params::KMED as u8),
                    e: self.rng.gen_range(50u8, 255u8),
                });
            }
            toffset += DT_FRAMES;
        }

        qlfs
    }
}
