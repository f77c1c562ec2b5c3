//! Audio codebook: a static set of binary-descriptor centroids used to
//! quantize local fingerprints into codewords.
//!
//! The production codebook is a build-time artifact trained offline with
//! k-medians and embedded in the binary; it is shared read-only across all
//! matcher and indexer instances for the process lifetime.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use once_cell::sync::Lazy;

use crate::params;
use crate::{Error, Result};

/// The embedded audio codes.
static AUDIO_CODES_BIN: &[u8] = include_bytes!("audio_codes.bin");

static SHARED: Lazy<std::result::Result<Codebook, String>> =
    Lazy::new(|| Codebook::deserialize(AUDIO_CODES_BIN).map_err(|e| e.to_string()));

/// Serialized cluster record: | ID | SumD | Npoints | Centroid |
const CLUSTER_RECORD_SIZE: usize = 4 + 4 + 4 + params::IDI_BYTES;

/// One codeword cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub id: u32,
    /// Sum of distances from the cluster's points to the centroid.
    pub sum_d: f32,
    /// Number of points in the cluster.
    pub npoints: u32,
    /// Centroid bit vector, IDI bits packed LSB-first.
    pub centroid: Vec<u8>,
}

/// Result of quantizing a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantized {
    /// Best matching codeword, in [0, Kmed).
    pub word: u8,
    /// Hamming distance to the codeword's centroid, clipped to 255.
    pub dist: u8,
}

/// Hamming distance between two packed bit vectors.
pub fn hamming(a: &[u8], b: &[u8]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// An ordered list of codeword clusters with a nearest-centroid quantizer.
#[derive(Debug, Clone, Default)]
pub struct Codebook {
    clusters: Vec<Cluster>,
}

impl Codebook {
    pub fn new(clusters: Vec<Cluster>) -> Self {
        Self { clusters }
    }

    /// The process-wide codebook deserialized from the embedded audio
    /// codes. Fails with `InvalidAudioCodes` if the embedded data is
    /// corrupt.
    pub fn shared() -> Result<&'static Codebook> {
        match &*SHARED {
            Ok(cb) => Ok(cb),
            Err(msg) => Err(Error::InvalidAudioCodes(msg.clone())),
        }
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Map a descriptor to the codeword whose centroid minimizes the
    /// Hamming distance. Ties are broken by the maximum cluster ID, which
    /// with sequential IDs is a stable last-match rule.
    pub fn quantize(&self, descriptor: &[u8]) -> Quantized {
        debug_assert!(!self.clusters.is_empty());
        debug_assert_eq!(descriptor.len(), params::IDI_BYTES);

        let mut best_word = 0u32;
        let mut max_sim = -1i64;

        for cluster in &self.clusters {
            let d = hamming(descriptor, &cluster.centroid);
            let sim = params::IDI as i64 - i64::from(d);
            if sim >= max_sim {
                max_sim = sim;
                best_word = cluster.id;
            }
        }

        // The quantization error is clipped to one byte. Using two would
        // grow the fingerprint database by about 50% due to padding, while
        // very few codewords ever exceed 255.
        let dist = (params::IDI as i64 - max_sim).min(255) as u8;

        Quantized {
            word: best_word as u8,
            dist,
        }
    }

    /// Serialize the codebook into a contiguous little-endian byte array
    /// of fixed-size cluster records.
    pub fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.clusters.len() * CLUSTER_RECORD_SIZE);
        for cluster in &self.clusters {
            debug_assert_eq!(cluster.centroid.len(), params::IDI_BYTES);
            data.write_u32::<LittleEndian>(cluster.id).unwrap();
            data.write_f32::<LittleEndian>(cluster.sum_d).unwrap();
            data.write_u32::<LittleEndian>(cluster.npoints).unwrap();
            data.extend_from_slice(&cluster.centroid);
        }
        data
    }

    /// Deserialize a codebook from a raw byte array. The data size must be
    /// a non-zero integer multiple of the cluster record size.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidAudioCodes("empty audio codes data".to_string()));
        }
        if data.len() % CLUSTER_RECORD_SIZE != 0 {
            return Err(Error::InvalidAudioCodes(format!(
                "audio codes size {} is not a multiple of the {}-byte record",
                data.len(),
                CLUSTER_RECORD_SIZE
            )));
        }

        let nwords = data.len() / CLUSTER_RECORD_SIZE;
        let mut rd = Cursor::new(data);
        let mut clusters = Vec::with_capacity(nwords);

        for _ in 0..nwords {
            let id = rd.read_u32::<LittleEndian>().unwrap();
            let sum_d = rd.read_f32::<LittleEndian>().unwrap();
            let npoints = rd.read_u32::<LittleEndian>().unwrap();
            let pos = rd.position() as usize;
            let centroid = data[pos..pos + params::IDI_BYTES].to_vec();
            rd.set_position((pos + params::IDI_BYTES) as u64);
            clusters.push(Cluster {
                id,
                sum_d,
                npoints,
                centroid,
            });
        }

        Ok(Codebook { clusters })
    }

    /// Save the codebook to a file.
    pub fn save(&self, path: &str) -> Result<()> {
        std::fs::write(path, self.serialize())
            .map_err(|e| Error::InvalidAudioCodes(format!("couldn't write '{}': {}", path, e)))
    }

    /// Load a codebook from a file.
    pub fn load(path: &str) -> Result<Self> {
        let data = std::fs::read(path)
            .map_err(|e| Error::InvalidAudioCodes(format!("couldn't read '{}': {}", path, e)))?;
        Self::deserialize(&data)
    }
}

/// Train a codebook with k-medians over a set of binary descriptors.
///
/// Seeding follows the k-means++ scheme (each new seed is sampled with
/// probability proportional to its distance from the chosen ones), then
/// points are iteratively reassigned to the closest centroid and each
/// centroid is recomputed as the bitwise majority of its cluster.
pub fn train<R: rand::Rng>(
    points: &[Vec<u8>],
    k: usize,
    max_iterations: usize,
    rng: &mut R,
) -> Result<Codebook> {
    if points.len() < k {
        return Err(Error::InvalidParameter(format!(
            "k-medians needs at least {} points, got {}",
            k,
            points.len()
        )));
    }

    // k-means++ seeding
    let mut centroids: Vec<Vec<u8>> = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0, points.len())].clone());

    let mut pdist = vec![f32::MAX; points.len()];
    while centroids.len() < k {
        let last = centroids.last().unwrap();
        let mut psum = 0.0f32;
        for (h, point) in points.iter().enumerate() {
            let d = hamming(point, last) as f32;
            if d < pdist[h] {
                pdist[h] = d;
            }
            psum += pdist[h];
        }
        // inverse transform sampling over the distance p.d.f.
        let u: f32 = rng.gen();
        let mut cum = 0.0f32;
        let mut chosen = points.len() - 1;
        for (v, &p) in pdist.iter().enumerate() {
            cum += p / psum;
            if cum > u {
                chosen = v;
                break;
            }
        }
        centroids.push(points[chosen].clone());
    }

    let mut assignment = vec![usize::MAX; points.len()];

    for _ in 0..max_iterations {
        let mut changed = false;
        for (h, point) in points.iter().enumerate() {
            let mut best = 0usize;
            let mut best_d = u32::MAX;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = hamming(point, centroid);
                if d < best_d {
                    best_d = d;
                    best = c;
                }
            }
            if assignment[h] != best {
                assignment[h] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        // bitwise-majority medians
        for (c, centroid) in centroids.iter_mut().enumerate() {
            let mut counts = vec![0u32; params::IDI];
            let mut members = 0u32;
            for (h, point) in points.iter().enumerate() {
                if assignment[h] != c {
                    continue;
                }
                members += 1;
                for bit in 0..params::IDI {
                    if point[bit >> 3] & (1 << (bit & 7)) != 0 {
                        counts[bit] += 1;
                    }
                }
            }
            if members == 0 {
                continue;
            }
            for bit in 0..params::IDI {
                let byte = &mut centroid[bit >> 3];
                let mask = 1 << (bit & 7);
                if counts[bit] * 2 > members {
                    *byte |= mask;
                } else {
                    *byte &= !mask;
                }
            }
        }
    }

    let clusters = centroids
        .into_iter()
        .enumerate()
        .map(|(c, centroid)| {
            let mut sum_d = 0.0f32;
            let mut npoints = 0u32;
            for (h, point) in points.iter().enumerate() {
                if assignment[h] == c {
                    sum_d += hamming(point, &centroid) as f32;
                    npoints += 1;
                }
            }
            Cluster {
                id: c as u32,
                sum_d,
                npoints,
                centroid,
            }
        })
        .collect();

    Ok(Codebook::new(clusters))
}
