//! Candidate search over the inverted index.
//!
//! The matcher consumes the query LF stream in batches of Nk, drives all
//! the posting iterators of the batch's terms in document-at-a-time order
//! and scores each candidate recording with a time-binned histogram. The
//! per-step best candidates feed a top-k list; when the step confidence is
//! low, a pair-wise geodesic hashing re-ranking pass re-scores the top
//! candidates against their stored fingerprints.

use std::collections::{HashMap, HashSet};

use log::warn;

use crate::config::{MatchType, RecognizerConfig};
use crate::fingerprinting::codebook::Codebook;
use crate::fingerprinting::fingerprinter::{LocalFingerprint, Qlf};
use crate::index::indexer::{band, pair_term, single_term, DMAX, TMAX};
use crate::index::postings::PostingIterator;
use crate::params;
use crate::store::DataStore;
use crate::{Error, Result};

/// Minimum histogram score for a candidate to enter the top-k list.
pub const MIN_ACCEPT_SCORE: i64 = params::SMAX * 2;

/// Occurrence bookkeeping of one candidate LF within a histogram bin.
#[derive(Debug, Default, Clone, Copy)]
struct BinInfo {
    /// Query LF that scored this candidate LF.
    cand_lf: usize,
    /// 1-based pivot id (0 = unset).
    pivot: usize,
}

/// One time bin of a candidate's histogram.
#[derive(Debug, Default, Clone)]
struct HistoBin {
    score: i64,
    last_t: u32,
    torder: u32,
    scored: bool,
    info: HashMap<u32, BinInfo>,
}

impl HistoBin {
    fn reset(&mut self) {
        self.score = 0;
        self.last_t = 0;
        self.torder = 0;
        self.scored = false;
        self.info.clear();
    }
}

/// Time histogram of one candidate recording.
#[derive(Debug, Clone)]
struct Qhisto {
    bins: Vec<HistoBin>,
    bmax: usize,
    qi: u32,
}

impl Qhisto {
    fn new(size: usize) -> Self {
        Self {
            bins: vec![HistoBin::default(); size],
            bmax: 0,
            qi: 0,
        }
    }

    fn reset(&mut self) {
        for bin in &mut self.bins {
            bin.reset();
        }
        self.bmax = 0;
        self.qi = 0;
    }

    fn reset_scored_flags(&mut self) {
        for bin in &mut self.bins {
            bin.scored = false;
        }
    }

    /// Grow the histogram to hold `bin`, with a 10% slack. Growth means
    /// a recording is longer than the configured maximum.
    fn ensure_bin(&mut self, bin: usize) {
        if bin >= self.bins.len() {
            let new_len = (bin + 1).max(bin * 11 / 10);
            warn!("histogram reallocation ({} -> {} bins)", self.bins.len(), new_len);
            self.bins.resize(new_len, HistoBin::default());
        }
    }
}

/// Accumulated evidence for one candidate recording.
#[derive(Debug, Default, Clone, Copy)]
pub struct Candidate {
    /// Accumulated score across matching steps.
    pub score: i64,
    /// Estimated match time point within the recording, in seconds.
    pub t_match: f32,
}

/// State of the best-match search, updated at each matching step.
///
/// The matcher never decides whether a best match exists; it only ranks
/// the evidence. Classification is the recognizer's job.
#[derive(Debug, Default, Clone)]
pub struct MatchResults {
    /// Candidate accumulators keyed by FID.
    pub candidates: HashMap<u32, Candidate>,
    /// Score-descending top-k list with per-score tie lists.
    pub top_k: Vec<(i64, Vec<u32>)>,
    /// Whether the last step went through the re-ranking stage.
    pub reranked: bool,
}

impl MatchResults {
    /// The k-th best tie list (1-based), empty when out of range.
    pub fn top(&self, k: usize) -> &[u32] {
        self.top_k
            .get(k.wrapping_sub(1))
            .map(|(_, fids)| fids.as_slice())
            .unwrap_or(&[])
    }

    /// The k-th best score (1-based), 0 when out of range.
    pub fn top_score(&self, k: usize) -> i64 {
        self.top_k.get(k.wrapping_sub(1)).map(|(s, _)| *s).unwrap_or(0)
    }
}

/// The match engine of one identification session. Single-threaded; reset
/// it between identifications.
pub struct Matcher<S: DataStore> {
    store: S,
    codebook: &'static Codebook,
    match_type: MatchType,
    /// Re-ranking confidence threshold (the MMS parameter).
    rerank_threshold: f32,
    results: MatchResults,
    /// Quantized query sequence.
    xk: Vec<Qlf>,
    /// Query LF ids, used to validate the sequence.
    xk_seq: Vec<u32>,
    /// Per-step top candidates: score-descending with tie lists.
    topk_mc: Vec<(i64, Vec<Qhisto>)>,
    h: Qhisto,
    /// Start of the current LF batch.
    ko: usize,
    /// T of the last processed LF, an approximation of the matched audio
    /// duration.
    ko_t: u32,
    nsteps: usize,
}

impl<S: DataStore> Matcher<S> {
    /// Create a matcher reading from the given store.
    pub fn new(store: S, config: &RecognizerConfig) -> Result<Self> {
        config.validate()?;
        let h_size =
            (f64::from(config.max_recording_duration) / (params::DT * f64::from(params::TK))) as usize;
        Ok(Self {
            store,
            codebook: Codebook::shared()?,
            match_type: config.match_type,
            rerank_threshold: config.mms,
            results: MatchResults::default(),
            xk: Vec::with_capacity(256),
            xk_seq: Vec::with_capacity(256),
            topk_mc: Vec::new(),
            h: Qhisto::new(h_size),
            ko: 0,
            ko_t: 0,
            nsteps: 0,
        })
    }

    /// Append an LF stream to the query sequence and run a matching step
    /// for every Nk buffered LFs. Returns the number of LFs processed in
    /// this call (possibly 0 if the batch is still filling up).
    pub fn process(&mut self, lfs: &[LocalFingerprint]) -> Result<usize> {
        if lfs.is_empty() {
            return Ok(0);
        }

        for lf in lfs {
            let q = self.codebook.quantize(&lf.descriptor);
            self.xk.push(Qlf {
                t: lf.t,
                f: lf.f as u16,
                w: q.word,
                e: q.dist,
            });
            self.xk_seq.push(lf.id);
        }

        if !self.valid_query_sequence() {
            return Err(Error::InvalidMatchSequence(
                "query LF ids must be sequential from 0".to_string(),
            ));
        }

        self.run_pending_steps()
    }

    /// Append already-quantized LFs to the query sequence. The ids
    /// continue the sequence. Mostly useful for testing the match stage
    /// in isolation.
    pub fn process_quantized(&mut self, qlfs: &[Qlf]) -> Result<usize> {
        for qlf in qlfs {
            self.xk_seq.push(self.xk.len() as u32);
            self.xk.push(*qlf);
        }
        self.run_pending_steps()
    }

    fn run_pending_steps(&mut self) -> Result<usize> {
        let mut processed = 0;
        while self.xk.len() - self.ko >= params::NK {
            let xk_t = self.xk[self.ko + params::NK - 1].t;
            self.do_match(self.ko, self.ko + params::NK)?;
            self.ko += params::NK;
            self.ko_t = xk_t;
            self.nsteps += 1;
            processed += params::NK;
        }
        Ok(processed)
    }

    /// Force a matching step on whatever remains of the query sequence.
    /// Returns the number of LFs flushed; sequences shorter than 2 LFs
    /// are not worth a step.
    pub fn flush(&mut self) -> Result<usize> {
        if !self.valid_query_sequence() {
            return Ok(0);
        }
        let nlf = self.xk.len() - self.ko;
        if nlf < 2 {
            return Ok(0);
        }
        let xk_t = self.xk[self.ko + nlf - 1].t;
        self.do_match(self.ko, self.ko + nlf)?;
        self.ko += nlf;
        self.ko_t = xk_t;
        self.nsteps += 1;
        Ok(nlf)
    }

    /// Current state of the best-match search.
    pub fn results(&self) -> &MatchResults {
        &self.results
    }

    /// Approximate duration of the audio matched since the last reset, in
    /// seconds (taken from the T of the last processed LF).
    pub fn match_time(&self) -> f32 {
        self.ko_t as f32 * params::DT as f32
    }

    /// Number of matching steps performed so far.
    pub fn steps_count(&self) -> usize {
        self.nsteps
    }

    /// Clear all state for a new identification session.
    pub fn reset(&mut self) {
        self.xk.clear();
        self.xk_seq.clear();
        self.topk_mc.clear();
        self.results = MatchResults::default();
        self.h.reset();
        self.ko = 0;
        self.ko_t = 0;
        self.nsteps = 0;
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn valid_query_sequence(&self) -> bool {
        self.xk_seq.iter().enumerate().all(|(k, &id)| id == k as u32)
    }

    /// One matching step over the batch [ko, kn): search candidates, then
    /// either accumulate the histogram evidence directly or re-rank the
    /// top candidates when the step confidence is at or below the MMS
    /// threshold.
    fn do_match(&mut self, ko: usize, kn: usize) -> Result<()> {
        match self.match_type {
            MatchType::Mscale => self.find_candidates_swords(ko, kn)?,
            MatchType::Xscale => self.find_candidates_bwords(ko, kn)?,
        }

        if self.topk_mc.is_empty() {
            return Ok(());
        }

        let top1 = self.topk_mc[0].0 as f32;
        let top2 = if self.topk_mc.len() > 1 {
            self.topk_mc[1].0 as f32
        } else {
            0.0
        };
        let conf = (2.0 * top1) / (top1 + top2) - 1.0;
        debug_assert!((0.0..=1.0).contains(&conf));

        if conf <= self.rerank_threshold {
            self.rerank()?;
            self.results.reranked = true;
        } else {
            for (_, tlist) in &self.topk_mc {
                for h in tlist {
                    let cand = self.results.candidates.entry(h.qi).or_default();
                    cand.score += h.bins[h.bmax].score;
                    cand.t_match =
                        (params::TK * h.bmax as u32 + params::TK / 2) as f32 * params::DT as f32;
                }
            }
            self.results.reranked = false;
        }

        // rebuild the final top-k list from the accumulators
        self.results.top_k.clear();
        for (&fid, cand) in &self.results.candidates {
            match self
                .results
                .top_k
                .binary_search_by(|(s, _)| cand.score.cmp(s))
            {
                Ok(i) => self.results.top_k[i].1.push(fid),
                Err(i) => {
                    self.results.top_k.insert(i, (cand.score, vec![fid]));
                    self.results.top_k.truncate(params::TOP_K);
                }
            }
        }

        self.topk_mc.clear();
        Ok(())
    }

    /// DaaT candidate search with single terms: one posting iterator per
    /// query LF term, all driven in lockstep over the FID axis.
    fn find_candidates_swords(&mut self, ko: usize, kn: usize) -> Result<()> {
        let mut iterators: HashMap<u32, PostingIterator> = HashMap::new();
        let mut eol: HashSet<u32> = HashSet::new();
        let mut fid_curr = 1u32;

        loop {
            for k in ko..kn {
                let term = single_term(self.xk[k].w, u32::from(self.xk[k].f));
                let store = &mut self.store;
                let it = iterators
                    .entry(term)
                    .or_insert_with(|| PostingIterator::new(term));

                let mut advance = false;
                if let Some(post) = it.get(store)? {
                    debug_assert!(post.fid > 0);
                    if post.fid == fid_curr {
                        for m in 0..post.lid.len() {
                            score_occurrence(
                                &mut self.h,
                                &self.xk,
                                k,
                                false,
                                post.lid[m],
                                post.t[m],
                                post.e[m],
                            );
                        }
                        advance = true;
                    }
                } else {
                    eol.insert(term);
                }

                if advance {
                    self.h.reset_scored_flags();
                    it.next(&mut self.store)?;
                }
            }

            self.collect_step_candidate(fid_curr);
            fid_curr += 1;

            if eol.len() >= iterators.len() {
                break;
            }
        }
        Ok(())
    }

    /// DaaT candidate search with pair terms: each query pivot pairs with
    /// up to Dmax following LFs sharing its frequency band, mirroring the
    /// pairing done at indexing time.
    fn find_candidates_bwords(&mut self, ko: usize, kn: usize) -> Result<()> {
        if kn - ko < 2 {
            return Ok(());
        }

        let mut iterators: HashMap<u32, PostingIterator> = HashMap::new();
        let mut eol: HashSet<u32> = HashSet::new();
        let mut fid_curr = 1u32;

        loop {
            for k in ko..kn {
                let w_pivot = self.xk[k].w;
                let b_pivot = band(u32::from(self.xk[k].f));
                let mut paired = 0usize;

                for j in k + 1..self.xk.len() {
                    if paired >= DMAX {
                        break;
                    }
                    let dt = self.xk[j].t - self.xk[k].t;
                    if dt > TMAX {
                        break;
                    }
                    if band(u32::from(self.xk[j].f)) != b_pivot {
                        continue;
                    }

                    let vpt = (self.xk[j].t as f32 / params::QT) as i32
                        - (self.xk[k].t as f32 / params::QT) as i32;
                    let vpf = (f32::from(self.xk[j].f) / params::QF) as i32
                        - (f32::from(self.xk[k].f) / params::QF) as i32;
                    let term = pair_term(w_pivot, b_pivot, self.xk[j].w, vpt, vpf);

                    let store = &mut self.store;
                    let it = iterators
                        .entry(term)
                        .or_insert_with(|| PostingIterator::new(term));

                    let mut advance = false;
                    if let Some(post) = it.get(store)? {
                        debug_assert!(post.fid > 0);
                        if post.fid == fid_curr {
                            for m in 0..post.lid.len() {
                                score_occurrence(
                                    &mut self.h,
                                    &self.xk,
                                    k,
                                    true,
                                    post.lid[m],
                                    post.t[m],
                                    post.e[m],
                                );
                            }
                            advance = true;
                        }
                    } else {
                        eol.insert(term);
                    }

                    if advance {
                        self.h.reset_scored_flags();
                        it.next(&mut self.store)?;
                    }
                    paired += 1;
                }
            }

            self.collect_step_candidate(fid_curr);
            fid_curr += 1;

            if eol.len() >= iterators.len() {
                break;
            }
        }
        Ok(())
    }

    /// Snapshot the histogram of the finished candidate into the per-step
    /// top-k list, then reset it for the next one.
    fn collect_step_candidate(&mut self, fid_curr: u32) {
        self.h.qi = fid_curr;
        let max_score = self.h.bins[self.h.bmax].score;

        if max_score > MIN_ACCEPT_SCORE {
            match self.topk_mc.binary_search_by(|(s, _)| max_score.cmp(s)) {
                // Large tie lists would hurt the re-ranking stage, so they
                // are truncated at a fixed length.
                Ok(i) => {
                    if self.topk_mc[i].1.len() < 10 {
                        self.topk_mc[i].1.push(self.h.clone());
                    }
                }
                Err(i) => {
                    self.topk_mc.insert(i, (max_score, vec![self.h.clone()]));
                    self.topk_mc.truncate(params::TOP_K);
                }
            }
        }
        self.h.reset();
    }

    /// Re-rank the per-step top candidates by time-frequency coherence.
    ///
    /// For each locally maximal histogram bin with a sufficient score, the
    /// recorded (query LF, candidate LF) anchor defines two neighborhoods:
    /// one in the query sequence and one fetched from the candidate's
    /// stored fingerprint. Both are turned into edge-hash tables and the
    /// common edges scored into a fresh histogram.
    fn rerank(&mut self) -> Result<()> {
        let mut hr = Qhisto::new(self.h.bins.len());
        let topk = std::mem::take(&mut self.topk_mc);

        for (_, tlist) in &topk {
            for h in tlist {
                let mut top_bin = 0usize;
                let mut top_bin_score = 0i64;

                // last used bin
                let mut last_bin = h.bins.len();
                while last_bin > 0 && h.bins[last_bin - 1].score == 0 {
                    last_bin -= 1;
                }
                if last_bin == 0 {
                    continue;
                }

                for i in 0..last_bin {
                    // local maximum over a +-3 bin interval
                    let lb = i.saturating_sub(3);
                    let rb = (i + 3).min(last_bin - 1);
                    let ismax = (lb..=rb).all(|j| h.bins[j].score <= h.bins[i].score);

                    if !ismax || h.bins[i].score <= (MIN_ACCEPT_SCORE as f32 * 1.5) as i64 {
                        continue;
                    }

                    self.graph_matching(h, i, &mut hr)?;

                    let hr_best = hr.bins[hr.bmax].score;
                    if hr_best > 0 {
                        self.results.candidates.entry(h.qi).or_default().score += hr_best;
                    }
                    if hr_best > top_bin_score {
                        top_bin_score = hr_best;
                        top_bin = hr.bmax;
                    }
                    hr.reset();
                }

                // the match time point is estimated at the centre of the
                // best re-ranked bin
                if top_bin_score > 0 {
                    self.results.candidates.entry(h.qi).or_default().t_match =
                        (params::TK * top_bin as u32 + params::TK / 2) as f32
                            * params::DT as f32;
                }
            }
        }
        Ok(())
    }

    /// Score the t-f coherence of one histogram bin's anchors against the
    /// candidate's stored fingerprint.
    fn graph_matching(&mut self, h: &Qhisto, bin: usize, hr: &mut Qhisto) -> Result<()> {
        let qi = h.qi;

        for (&sij, info) in &h.bins[bin].info {
            let k = info.cand_lf;
            let sij = sij as usize;

            // neighborhood of the anchor in the query sequence
            let ks = k.saturating_sub(params::NTF / 2);
            let ke = (k + params::NTF / 2).min(self.xk.len() - 1);
            let hx = build_graph(&self.xk[ks..=ke], k - ks);

            // The candidate data comes from an external store, so runtime
            // checks are mandatory here.
            let fp_size = self.store.get_fingerprint_size(qi)?;
            if fp_size == 0 {
                return Err(Error::InvalidFingerprint(format!(
                    "zero-sized fingerprint received (FID {})",
                    qi
                )));
            }
            if fp_size % Qlf::SIZE != 0 {
                return Err(Error::InvalidFingerprint(format!(
                    "corrupt fingerprint data (FID {})",
                    qi
                )));
            }
            let qlen = fp_size / Qlf::SIZE;
            if sij >= qlen {
                return Err(Error::InvalidIndexData(format!(
                    "LID {} out of fingerprint bounds (FID {}, {} LFs); \
                     the index is inconsistent with the fingerprints",
                    sij, qi, qlen
                )));
            }

            // corresponding neighborhood in the candidate fingerprint
            let ss = sij - sij.min(k - ks);
            let se = sij + (ke - k).min(qlen - sij - 1);
            let nh = se - ss + 1;

            let bytes = self
                .store
                .get_fingerprint(qi, nh * Qlf::SIZE, ss * Qlf::SIZE)?;
            if bytes.len() != nh * Qlf::SIZE {
                return Err(Error::InvalidFingerprint(format!(
                    "short fingerprint read (FID {}: got {} of {} bytes)",
                    qi,
                    bytes.len(),
                    nh * Qlf::SIZE
                )));
            }
            let qh = Qlf::parse(&bytes)?;
            let hq = build_graph(&qh, sij - ss);

            // score the edges common to both graphs
            for (e, pq) in &hq {
                let px = match hx.get(e) {
                    Some(px) => px,
                    None => continue,
                };

                let sim1 = if pq.0.w == px.0.w { params::SMAX as f32 } else { 0.0 };
                let sim2 = if pq.1.w == px.1.w { params::SMAX as f32 } else { 0.0 };
                let wsim1 = 1.0
                    - (f32::from(pq.0.e) - f32::from(px.0.e)).abs() / params::IDI as f32;
                let wsim2 = 1.0
                    - (f32::from(pq.1.e) - f32::from(px.1.e)).abs() / params::IDI as f32;

                let mut score = params::SMAX; // edge match
                score += (sim1 * wsim1) as i64;
                score += (sim2 * wsim2) as i64;

                // share the edge's score between the endpoints' time bins
                let hbin1 = (pq.0.t / params::TK) as usize;
                let hbin2 = (pq.1.t / params::TK) as usize;
                hr.ensure_bin(hbin1.max(hbin2));

                hr.bins[hbin1].score += score / 2;
                hr.bins[hbin2].score += score / 2;

                if hr.bins[hbin1].score > hr.bins[hr.bmax].score {
                    hr.bmax = hbin1;
                }
                if hr.bins[hbin2].score > hr.bins[hr.bmax].score {
                    hr.bmax = hbin2;
                }
            }
        }
        Ok(())
    }
}

/// Score one candidate occurrence into the time histogram.
///
/// At most one score per bin per query LF (the `scored` flag, reset
/// between LFs) and at most one scoring anchor per (candidate LF, pivot)
/// pair per bin (the info table).
fn score_occurrence(
    h: &mut Qhisto,
    xk: &[Qlf],
    k: usize,
    paired: bool,
    sij: u32,
    sij_t: u32,
    sij_e: u32,
) {
    let bin = (sij_t / params::TK) as usize;
    h.ensure_bin(bin);

    if h.bins[bin].scored {
        return;
    }

    let can_score;
    let ninfo;
    {
        let nentries = h.bins[bin].info.len();
        let entry = h.bins[bin].info.entry(sij);
        match entry {
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert(BinInfo {
                    cand_lf: k,
                    // pair matching may legitimately rescore the same
                    // candidate LF from its own pivot
                    pivot: if paired { k + 1 } else { 1 },
                });
                can_score = true;
                ninfo = nentries + 1;
            }
            std::collections::hash_map::Entry::Occupied(o) => {
                can_score = paired && o.get().pivot == k + 1;
                ninfo = nentries;
            }
        }
    }

    if !can_score {
        return;
    }

    let mut tdiff = i64::from(sij_t) - i64::from(h.bins[bin].last_t);
    if tdiff.abs() <= 2 {
        tdiff = 0;
    }

    // time proximity, weighed by descriptor similarity
    let wtp = 1.0
        - (f32::from(xk[k].e) - sij_e as f32).abs() / params::IDI as f32;
    let score_tp = (params::SMAX as f32 * wtp) as i64;

    // time order
    if tdiff >= 0 {
        h.bins[bin].torder += 1;
    }
    let wto = h.bins[bin].torder as f32 / ninfo as f32;
    let score_to = if tdiff >= 0 {
        (params::SMAX as f32 * wto) as i64
    } else {
        0
    };

    h.bins[bin].score += score_tp + score_to;
    h.bins[bin].last_t = sij_t;

    if h.bins[bin].score > h.bins[h.bmax].score {
        h.bmax = bin;
    }
    h.bins[bin].scored = true;
}

/// Build the edge-hash table of an LF sequence by pair-wise geodesic
/// hashing: every ordered pair is keyed by its quantized time-frequency
/// offsets relative to each other and to the reference (anchor) element.
fn build_graph(lfs: &[Qlf], iref: usize) -> HashMap<u32, (Qlf, Qlf)> {
    let mut graph = HashMap::new();
    if lfs.len() < 2 {
        return graph;
    }

    let qt = |t: u32| (t as f32 / params::QT + 0.5) as i32;
    let qf = |f: u16| (f32::from(f) / params::QF + 0.5) as i32;

    let ref_qt = qt(lfs[iref].t);
    let ref_qf = qf(lfs[iref].f);

    for i in 0..lfs.len() - 1 {
        let i_qt = qt(lfs[i].t);
        let i_qf = qf(lfs[i].f);
        let tt_iref = ref_qt - i_qt;
        let tf_iref = ref_qf - i_qf;

        for j in i + 1..lfs.len() {
            let tt_ij = qt(lfs[j].t) - i_qt;
            let tf_ij = qf(lfs[j].f) - i_qf;

            // Offsets are hashed as 8-bit components. With ~1 s batches
            // they can only overflow across silence gaps longer than the
            // quantized range, in which case the colliding edge is simply
            // less discriminative.
            let e = ((tt_ij as u32 & 0xff) << 24)
                | ((tf_ij as u32 & 0xff) << 16)
                | ((tt_iref as u32 & 0xff) << 8)
                | (tf_iref as u32 & 0xff);

            graph.insert(e, (lfs[i], lfs[j]));
        }
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_graph_keys_pairs_by_offsets() {
        let lfs = vec![
            Qlf { t: 0, f: 100, w: 1, e: 10 },
            Qlf { t: 10, f: 120, w: 2, e: 20 },
            Qlf { t: 30, f: 90, w: 3, e: 30 },
        ];
        let g = build_graph(&lfs, 1);
        assert_eq!(g.len(), 3);

        // a time-translated copy hashes to the same keys
        let shifted: Vec<Qlf> = lfs
            .iter()
            .map(|lf| Qlf { t: lf.t + params::QT as u32 * 40, ..*lf })
            .collect();
        let g2 = build_graph(&shifted, 1);
        let mut keys: Vec<_> = g.keys().collect();
        let mut keys2: Vec<_> = g2.keys().collect();
        keys.sort();
        keys2.sort();
        assert_eq!(keys, keys2);
    }

    #[test]
    fn tiny_sequences_have_no_edges() {
        assert!(build_graph(&[], 0).is_empty());
        assert!(build_graph(&[Qlf { t: 0, f: 20, w: 0, e: 0 }], 0).is_empty());
    }

    #[test]
    fn histogram_scoring_rewards_time_coherence() {
        let mut h = Qhisto::new(10);
        let xk = vec![Qlf { t: 0, f: 100, w: 1, e: 10 }; params::NK];

        // occurrences of distinct candidate LFs in increasing time order
        for (k, lid) in (0..10u32).enumerate() {
            score_occurrence(&mut h, &xk, k, false, lid, 100 + lid * 3, 10);
            h.reset_scored_flags();
        }
        let coherent = h.bins[0].score;

        let mut h2 = Qhisto::new(10);
        for (k, lid) in (0..10u32).enumerate() {
            // same occurrences visited in decreasing time order
            score_occurrence(&mut h2, &xk, k, false, lid, 130 - lid * 3, 10);
            h2.reset_scored_flags();
        }
        assert!(
            coherent > h2.bins[0].score,
            "in-order occurrences must outscore out-of-order ones"
        );
    }

    #[test]
    fn one_score_per_bin_per_query_lf() {
        let mut h = Qhisto::new(10);
        let xk = vec![Qlf { t: 0, f: 100, w: 1, e: 10 }; params::NK];

        score_occurrence(&mut h, &xk, 0, false, 1, 10, 10);
        let after_first = h.bins[0].score;
        // second occurrence of the same query LF in the same bin: ignored
        score_occurrence(&mut h, &xk, 0, false, 2, 12, 10);
        assert_eq!(h.bins[0].score, after_first);

        // next query LF may score the bin again
        h.reset_scored_flags();
        score_occurrence(&mut h, &xk, 1, false, 3, 14, 10);
        assert!(h.bins[0].score > after_first);
    }

    #[test]
    fn same_candidate_lf_scores_once() {
        let mut h = Qhisto::new(10);
        let xk = vec![Qlf { t: 0, f: 100, w: 1, e: 10 }; params::NK];

        score_occurrence(&mut h, &xk, 0, false, 7, 10, 10);
        h.reset_scored_flags();
        let once = h.bins[0].score;
        // the same candidate LF seen again from another query LF
        score_occurrence(&mut h, &xk, 1, false, 7, 10, 10);
        assert_eq!(h.bins[0].score, once);
    }
}
