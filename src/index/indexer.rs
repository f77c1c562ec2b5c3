//! Indexing sessions: fingerprint recordings and build their inverted
//! index incrementally through the store callbacks.

use std::collections::HashMap;

use log::{debug, warn};

use crate::config::{IndexerConfig, MatchType};
use crate::fingerprinting::codebook::Codebook;
use crate::fingerprinting::fingerprinter::{Fingerprinter, Qlf};
use crate::index::codec::BlockEncoder;
use crate::params;
use crate::store::{AudioProvider, BlockHeader, DataStore, ListHeader, POSTINGS_BLOCK_THRESHOLD};
use crate::{Error, Result};

/// Number of frequency bands used by pair terms.
pub const NBANDS: u32 = 3;

/// Max number of LFs paired with a pivot. Determines the size of the
/// pair-term index: the bigger, the more pairs per pivot.
pub const DMAX: usize = 10;

/// Max time distance (in frames) of paired LFs from the pivot.
pub const TMAX: u32 = 73;

/// Band width in frequency bins.
pub const QB: f32 = params::NBINS as f32 / NBANDS as f32;

/// Max value of the quantized pair time offset.
pub const VPT_MAX: i32 = (TMAX / params::QT as u32) as i32;

// Bit layout of a pair term: | W1 | B | W2 | Vpt | Vpf |
const VPF_BITS: u32 = 6;
const VPT_BITS: u32 = 4;
const WORD_BITS: u32 = 7;
const BAND_BITS: u32 = 2;

pub const VPT_SHIFT: u32 = VPF_BITS;
pub const W2_SHIFT: u32 = VPT_SHIFT + VPT_BITS;
pub const B_SHIFT: u32 = W2_SHIFT + WORD_BITS;
pub const W1_SHIFT: u32 = B_SHIFT + BAND_BITS;

/// Frequency band of a POI bin.
pub fn band(f: u32) -> u32 {
    (f as f32 / QB) as u32
}

/// Single term: codeword and spectral channel hashed into one key.
pub fn single_term(w: u8, f: u32) -> u32 {
    let chan = ((f - params::KMIN as u32 + 1) as f32 / params::QF) as u32;
    (u32::from(w) << 6) | chan
}

/// Pair term: pivot codeword, band, paired codeword and quantized
/// time-frequency offsets hashed into one key.
pub fn pair_term(w1: u8, b: u32, w2: u8, vpt: i32, vpf: i32) -> u32 {
    u32::from(w1) << W1_SHIFT
        | b << B_SHIFT
        | u32::from(w2) << W2_SHIFT
        | (vpt as u32) << VPT_SHIFT
        | (vpf as u32 & 0x3f)
}

/// The maximum value a term can take for the given match type. Useful for
/// stores that want to preallocate or validate keys.
pub fn max_term_value(match_type: MatchType) -> u32 {
    match match_type {
        MatchType::Mscale => single_term(params::KMED as u8 - 1, params::KMAX as u32),
        MatchType::Xscale => pair_term(
            params::KMED as u8 - 1,
            band(params::KMAX as u32),
            params::KMED as u8 - 1,
            VPT_MAX,
            -1,
        ),
    }
}

#[derive(Debug, Default)]
struct TermList {
    /// Flat posting layout: `FID, tf, (LID,T,E) x tf` per posting.
    data: Vec<u32>,
    /// Offset of the last posting in `data`.
    last_off: usize,
}

/// Temporary memory buffer caching the postings lists prior to flushing
/// them to the store.
#[derive(Debug)]
struct IndexCache {
    buffer: HashMap<u32, TermList>,
    /// Max memory in bytes used by the cached postings before flushing.
    memory_limit: usize,
    memory_used: usize,
    /// Duplicate occurrences happen as a result of quantization collisions
    /// during indexing. Sporadic ones are harmless; we count and drop them
    /// to keep the LID sequences strictly increasing.
    duplicates: usize,
}

impl IndexCache {
    fn new(limit_mb: usize) -> Self {
        Self {
            buffer: HashMap::new(),
            memory_limit: limit_mb * 1024 * 1024,
            memory_used: 0,
            duplicates: 0,
        }
    }

    /// Append the payload to the last posting of the term's list when the
    /// FID matches, else start a new posting.
    fn update(&mut self, term: u32, fid: u32, lid: u32, t: u32, e: u32) {
        let list = self.buffer.entry(term).or_default();
        let off = list.last_off;
        if !list.data.is_empty() && list.data[off] == fid {
            let last_lid = list.data[list.data.len() - 3];
            if last_lid == lid {
                self.duplicates += 1;
                return;
            }
            list.data[off + 1] += 1;
            list.data.extend_from_slice(&[lid, t, e]);
            self.memory_used += 12;
        } else {
            list.last_off = list.data.len();
            list.data.extend_from_slice(&[fid, 1, lid, t, e]);
            self.memory_used += 20;
        }
    }

    fn can_flush(&self) -> bool {
        self.memory_used >= self.memory_limit
    }

    fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.memory_used = 0;
    }
}

/// An indexing session: extracts fingerprints from audio recordings,
/// transforms them into search terms and emits the chunked index data
/// for the host store to persist.
///
/// The session is a simple state machine: [`Indexer::start`] opens it,
/// [`Indexer::index`] / [`Indexer::index_fingerprint`] may only be called
/// while it is open, [`Indexer::end`] closes it. FIDs must be strictly
/// increasing positive integers across all index calls.
pub struct Indexer<S: DataStore> {
    store: S,
    config: IndexerConfig,
    codebook: &'static Codebook,
    fingerprinter: Fingerprinter,
    cache: IndexCache,
    encoder: BlockEncoder,
    session_open: bool,
    curr_fid: u32,
}

impl<S: DataStore> Indexer<S> {
    /// Create an indexer emitting to the given store.
    pub fn new(store: S, config: IndexerConfig) -> Result<Self> {
        config.validate()?;
        let cache = IndexCache::new(config.cache_limit_mb);
        Ok(Self {
            store,
            config,
            codebook: Codebook::shared()?,
            fingerprinter: Fingerprinter::with_buffer_size(params::FS as usize * 10),
            cache,
            encoder: BlockEncoder::new(),
            session_open: false,
            curr_fid: 0,
        })
    }

    /// Start an indexing session.
    pub fn start(&mut self) -> Result<()> {
        if self.session_open {
            return Err(Error::InvalidIndexerState(
                "indexing session already open".to_string(),
            ));
        }
        self.store.on_indexer_start()?;
        self.session_open = true;
        Ok(())
    }

    /// Fingerprint and index one audio recording. The audio is pulled from
    /// `provider` until it signals end of stream; the recording's packed
    /// fingerprint is emitted through the store before its terms are
    /// cached.
    pub fn index<A: AudioProvider>(&mut self, fid: u32, provider: &mut A) -> Result<()> {
        self.check_session(fid)?;

        self.fingerprinter.reset();
        let mut qlfs: Vec<Qlf> = Vec::new();
        let mut audio = vec![0.0f32; params::FS as usize * 10];
        let mut total_samples = 0u64;

        // Pull loop with one block of read-ahead so the last block can be
        // processed with the flush flag set.
        let mut current: Vec<f32> = Vec::new();
        loop {
            let read = provider.on_audio_data(fid, &mut audio[..])?;
            total_samples += read as u64;
            if total_samples > u64::from(params::MAX_RECORDING_LENGTH) * u64::from(params::FS) {
                warn!(
                    "recording {} exceeds the {} s length limit; index blocks may oversize",
                    fid,
                    params::MAX_RECORDING_LENGTH
                );
            }
            if !current.is_empty() {
                self.fingerprinter.process(&current, read == 0);
                self.quantize_lfs(&mut qlfs);
            }
            if read == 0 {
                break;
            }
            current.clear();
            current.extend_from_slice(&audio[..read]);
        }

        if qlfs.is_empty() {
            return Err(Error::InvalidFingerprint(format!(
                "no fingerprints extracted from recording {}",
                fid
            )));
        }

        self.store.on_indexer_fingerprint(fid, &Qlf::pack(&qlfs))?;
        self.index_qlfs(fid, &qlfs)?;
        self.curr_fid = fid;

        if self.cache.can_flush() {
            self.do_flush()?;
        }
        Ok(())
    }

    /// Index a previously extracted fingerprint (packed QLF records).
    /// Useful for reindexing a fingerprint database, for example to change
    /// the match type. The fingerprint callback is not emitted: the raw
    /// fingerprints are already stored.
    pub fn index_fingerprint(&mut self, fid: u32, fpdata: &[u8]) -> Result<()> {
        self.check_session(fid)?;

        let qlfs = Qlf::parse(fpdata)?;
        self.index_qlfs(fid, &qlfs)?;
        self.curr_fid = fid;

        if self.cache.can_flush() {
            self.do_flush()?;
        }
        Ok(())
    }

    /// Flush the cached postings to the store. A no-op when the cache is
    /// empty, so flushing is idempotent.
    pub fn flush(&mut self) -> Result<()> {
        if self.cache.is_empty() {
            return Ok(());
        }
        self.do_flush()
    }

    /// End the indexing session, flushing the cache first unless told
    /// otherwise.
    pub fn end(&mut self, flush: bool) -> Result<()> {
        if !self.session_open {
            return Err(Error::InvalidIndexerState(
                "no indexing session open".to_string(),
            ));
        }
        if flush {
            self.flush()?;
        }
        self.store.on_indexer_end()?;
        self.session_open = false;
        Ok(())
    }

    /// Amount of memory currently used by the cache, in bytes.
    pub fn cache_used(&self) -> usize {
        self.cache.memory_used
    }

    /// The configured cache limit, in MB.
    pub fn cache_limit_mb(&self) -> usize {
        self.config.cache_limit_mb
    }

    /// Number of duplicate occurrences dropped so far.
    pub fn duplicate_occurrences(&self) -> usize {
        self.cache.duplicates
    }

    pub fn match_type(&self) -> MatchType {
        self.config.match_type
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn check_session(&self, fid: u32) -> Result<()> {
        if !self.session_open {
            return Err(Error::InvalidIndexerState(
                "no indexing session open".to_string(),
            ));
        }
        if fid == 0 || fid <= self.curr_fid {
            return Err(Error::InvalidParameter(format!(
                "FIDs must be strictly increasing positive integers \
                 (got {} after {})",
                fid, self.curr_fid
            )));
        }
        Ok(())
    }

    /// Quantize the LFs produced by the last fingerprinter step.
    fn quantize_lfs(&mut self, qlfs: &mut Vec<Qlf>) {
        for lf in self.fingerprinter.get() {
            let q = self.codebook.quantize(&lf.descriptor);
            qlfs.push(Qlf {
                t: lf.t,
                f: lf.f as u16,
                w: q.word,
                e: q.dist,
            });
        }
    }

    fn index_qlfs(&mut self, fid: u32, qlfs: &[Qlf]) -> Result<()> {
        match self.config.match_type {
            MatchType::Mscale => self.index_single_terms(fid, qlfs),
            MatchType::Xscale => self.index_pair_terms(fid, qlfs),
        }
        Ok(())
    }

    /// Emit one term per QLF: its codeword and spectral channel.
    fn index_single_terms(&mut self, fid: u32, qlfs: &[Qlf]) {
        for (lid, qlf) in qlfs.iter().enumerate() {
            let term = single_term(qlf.w, u32::from(qlf.f));
            self.cache
                .update(term, fid, lid as u32, qlf.t, u32::from(qlf.e));
        }
    }

    /// Emit one term per (pivot, follower) pair: up to `DMAX` followers
    /// within `TMAX` frames sharing the pivot's frequency band. The
    /// payload carries the pivot's occurrence.
    fn index_pair_terms(&mut self, fid: u32, qlfs: &[Qlf]) {
        for k in 0..qlfs.len() {
            let pivot = &qlfs[k];
            let b_pivot = band(u32::from(pivot.f));
            let mut paired = 0usize;

            for follower in &qlfs[k + 1..] {
                if paired >= DMAX {
                    break;
                }
                let dt = follower.t - pivot.t;
                if dt > TMAX {
                    break;
                }
                if band(u32::from(follower.f)) != b_pivot {
                    continue;
                }

                let vpt = (follower.t as f32 / params::QT) as i32
                    - (pivot.t as f32 / params::QT) as i32;
                let vpf = (f32::from(follower.f) / params::QF) as i32
                    - (f32::from(pivot.f) / params::QF) as i32;

                let term = pair_term(pivot.w, b_pivot, follower.w, vpt, vpf);
                self.cache
                    .update(term, fid, k as u32, pivot.t, u32::from(pivot.e));
                paired += 1;
            }
        }
    }

    /// Process the whole cache and emit the list chunks.
    fn do_flush(&mut self) -> Result<()> {
        self.store.on_indexer_flush_start()?;
        debug!(
            "flushing index cache: {} terms, {} bytes",
            self.cache.buffer.len(),
            self.cache.memory_used
        );

        let buffer = std::mem::take(&mut self.cache.buffer);
        for (term, list) in &buffer {
            // split the flat cache layout into posting slices
            let mut slices: Vec<&[u32]> = Vec::new();
            let mut off = 0usize;
            while off < list.data.len() {
                let tf = list.data[off + 1] as usize;
                let next = off + 2 + 3 * tf;
                slices.push(&list.data[off..next]);
                off = next;
            }
            let last_fid = list.data[list.last_off];

            // locate the append block
            let list_hdr = self.store.on_indexer_list_header(*term)?;
            let (mut list_hdr, mut block_hdr) = match list_hdr {
                Some(lh) if lh.block_count > 0 => {
                    let bh = self
                        .store
                        .on_indexer_block_header(*term, lh.block_count)?
                        .unwrap_or(BlockHeader {
                            id: lh.block_count,
                            body_size: 0,
                            fid_max: 0,
                        });
                    (lh, bh)
                }
                _ => (
                    ListHeader { block_count: 1 },
                    BlockHeader {
                        id: 1,
                        body_size: 0,
                        fid_max: 0,
                    },
                ),
            };

            let mut chunk = Vec::new();
            self.encoder.encode(&slices, block_hdr.fid_max, &mut chunk)?;

            if block_hdr.body_size > 0
                && block_hdr.body_size as usize + chunk.len() > POSTINGS_BLOCK_THRESHOLD
            {
                // the append block is full: close it and put the chunk in
                // a new one
                list_hdr.block_count += 1;
                let new_hdr = BlockHeader {
                    id: list_hdr.block_count,
                    body_size: chunk.len() as u32,
                    fid_max: last_fid,
                };
                self.store
                    .on_indexer_new_block(*term, list_hdr, new_hdr, &chunk)?;
            } else {
                block_hdr.body_size += chunk.len() as u32;
                block_hdr.fid_max = last_fid;
                self.store
                    .on_indexer_chunk(*term, list_hdr, block_hdr, &chunk)?;
            }
        }

        self.cache.reset();
        self.store.on_indexer_flush_end()?;
        Ok(())
    }
}
