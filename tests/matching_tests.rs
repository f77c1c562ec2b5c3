//! Match engine integration tests over synthetic fingerprint databases.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use waveprint::fingerprinting::fingerprinter::Qlf;
use waveprint::matching::classifier::{BinaryClassifier, Decision};
use waveprint::matching::matcher::Matcher;
use waveprint::store::MemoryStore;
use waveprint::synth::QlfGenerator;
use waveprint::{
    Error, Indexer, IndexerConfig, LocalFingerprint, MatchType, RecognizerConfig,
};

type SharedStore = Rc<RefCell<MemoryStore>>;

/// Index the given QLF streams as FIDs 1..=n, storing the raw
/// fingerprints as well.
fn build_store(streams: &[Vec<Qlf>], match_type: MatchType) -> SharedStore {
    let store = Rc::new(RefCell::new(MemoryStore::new()));
    let mut indexer = Indexer::new(
        store.clone(),
        IndexerConfig::new().with_match_type(match_type),
    )
    .unwrap();

    indexer.start().unwrap();
    for (i, qlfs) in streams.iter().enumerate() {
        let fid = i as u32 + 1;
        let packed = Qlf::pack(qlfs);
        indexer.index_fingerprint(fid, &packed).unwrap();
        store.borrow_mut().put_fingerprint(fid, &packed);
    }
    indexer.end(true).unwrap();
    store
}

fn matcher(store: SharedStore, match_type: MatchType, mms: f32) -> Matcher<SharedStore> {
    let config = RecognizerConfig::new()
        .with_match_type(match_type)
        .with_mms(mms);
    Matcher::new(store, &config).unwrap()
}

#[test]
fn query_subsequence_finds_its_recording() {
    let mut gen = QlfGenerator::new(StdRng::seed_from_u64(11));
    let streams: Vec<Vec<Qlf>> = (0..5).map(|_| gen.generate_frames(2000)).collect();
    let store = build_store(&streams, MatchType::Mscale);

    // a 60-LF cut from the middle of FID 3
    let query: Vec<Qlf> = streams[2][40..100].to_vec();

    let mut m = matcher(store, MatchType::Mscale, 0.0);
    let processed = m.process_quantized(&query).unwrap();
    assert_eq!(processed, 60);
    assert_eq!(m.steps_count(), 3);

    let results = m.results();
    assert_eq!(results.top(1), &[3], "the source recording must rank first");
    assert!(results.top_score(1) > results.top_score(2));

    // the estimated match time falls around the cut region
    let t_match = results.candidates[&3].t_match;
    let cut_time = streams[2][40].t as f32 * waveprint::params::DT as f32;
    assert!(
        (t_match - cut_time).abs() < 10.0,
        "t_match {} too far from cut at {}",
        t_match,
        cut_time
    );
}

#[test]
fn pair_term_matching_finds_its_recording() {
    let mut gen = QlfGenerator::new(StdRng::seed_from_u64(13));
    let streams: Vec<Vec<Qlf>> = (0..3).map(|_| gen.generate_frames(1500)).collect();
    let store = build_store(&streams, MatchType::Xscale);

    let query: Vec<Qlf> = streams[1][30..110].to_vec();

    let mut m = matcher(store, MatchType::Xscale, 0.0);
    m.process_quantized(&query).unwrap();

    let results = m.results();
    assert_eq!(results.top(1), &[2]);
}

#[test]
fn reranking_confirms_the_match() {
    let mut gen = QlfGenerator::new(StdRng::seed_from_u64(29));
    let streams: Vec<Vec<Qlf>> = (0..4).map(|_| gen.generate_frames(2000)).collect();
    let store = build_store(&streams, MatchType::Mscale);

    let query: Vec<Qlf> = streams[3][100..160].to_vec();

    // mms = 1 forces the re-ranking stage on every step
    let mut m = matcher(store, MatchType::Mscale, 1.0);
    m.process_quantized(&query).unwrap();

    let results = m.results();
    assert!(results.reranked, "re-ranking must have run");
    assert_eq!(results.top(1), &[4]);
    assert!(results.top_score(1) > 0);
}

/// Confidence-threshold behavior on a controlled two-candidate database:
/// FID 1 holds the whole query, FID 2 a fifth of it, which pins the
/// confidence between the two binary thresholds under test.
#[test]
fn binary_threshold_separates_partial_matches() {
    // query: 60 LFs in one histogram bin, evenly spaced
    let mut gen = QlfGenerator::new(StdRng::seed_from_u64(43));
    let full = gen.generate_frames(300);
    let query: Vec<Qlf> = full[..60].to_vec();
    let partial: Vec<Qlf> = query.iter().step_by(5).cloned().collect();

    let store = build_store(&[query.clone(), partial], MatchType::Mscale);

    let mut m = matcher(store, MatchType::Mscale, 0.0);
    m.process_quantized(&query).unwrap();

    let results = m.results();
    assert_eq!(results.top(1), &[1]);
    let top1 = results.top_score(1) as f64;
    let top2 = results.top_score(2) as f64;
    assert!(top2 > 0.0, "the partial copy must score as well");

    let conf = 2.0 * top1 / (top1 + top2) - 1.0;
    assert!(
        conf > 0.6 && conf < 0.95,
        "partial-match confidence out of the tested band: {}",
        conf
    );

    // the same evidence clears a permissive threshold and fails a strict
    // one
    assert_eq!(
        BinaryClassifier::new(0.6, 0.0).process(conf, 3.0),
        Decision::Identified
    );
    assert_eq!(
        BinaryClassifier::new(0.95, 0.0).process(conf, 3.0),
        Decision::Unidentified
    );
}

#[test]
fn unrelated_query_accumulates_no_strong_candidate() {
    let mut gen = QlfGenerator::new(StdRng::seed_from_u64(51));
    let streams: Vec<Vec<Qlf>> = (0..3).map(|_| gen.generate_frames(1500)).collect();
    let store = build_store(&streams, MatchType::Mscale);

    // a fresh random stream, unrelated to the indexed ones
    let query = gen.generate_frames(150);
    let mut m = matcher(store, MatchType::Mscale, 0.0);
    m.process_quantized(&query[..60.min(query.len())].to_vec()).unwrap();

    // any accidental hit must score far below a true match
    let results = m.results();
    if let Some(&(score, _)) = results.top_k.first() {
        assert!(score < 60 * 2 * waveprint::params::SMAX);
    }
}

#[test]
fn gapped_lf_ids_are_rejected() {
    let mut gen = QlfGenerator::new(StdRng::seed_from_u64(5));
    let streams = vec![gen.generate_frames(500)];
    let store = build_store(&streams, MatchType::Mscale);

    let descriptor = vec![0u8; waveprint::params::IDI / 8];
    let lfs: Vec<LocalFingerprint> = [0u32, 1, 3]
        .iter()
        .map(|&id| LocalFingerprint {
            id,
            t: id * 10,
            f: 100,
            descriptor: descriptor.clone(),
        })
        .collect();

    let mut m = matcher(store, MatchType::Mscale, 0.0);
    assert!(matches!(
        m.process(&lfs),
        Err(Error::InvalidMatchSequence(_))
    ));
}

#[test]
fn matcher_reset_clears_the_session() {
    let mut gen = QlfGenerator::new(StdRng::seed_from_u64(23));
    let streams: Vec<Vec<Qlf>> = (0..2).map(|_| gen.generate_frames(1000)).collect();
    let store = build_store(&streams, MatchType::Mscale);

    let query: Vec<Qlf> = streams[0][10..70].to_vec();

    let mut m = matcher(store, MatchType::Mscale, 0.0);
    m.process_quantized(&query).unwrap();
    let first_top = m.results().top(1).to_vec();
    let first_score = m.results().top_score(1);
    assert_eq!(first_top, vec![1]);

    m.reset();
    assert_eq!(m.steps_count(), 0);
    assert!(m.results().top_k.is_empty());

    // a second identical session gives identical results
    m.process_quantized(&query).unwrap();
    assert_eq!(m.results().top(1), first_top.as_slice());
    assert_eq!(m.results().top_score(1), first_score);
}

#[test]
fn flush_processes_short_remainders() {
    let mut gen = QlfGenerator::new(StdRng::seed_from_u64(31));
    let streams = vec![gen.generate_frames(1000)];
    let store = build_store(&streams, MatchType::Mscale);

    // 30 LFs: one full step of 20, then 10 left for flushing
    let query: Vec<Qlf> = streams[0][50..80].to_vec();

    let mut m = matcher(store, MatchType::Mscale, 0.0);
    let processed = m.process_quantized(&query).unwrap();
    assert_eq!(processed, 20);
    assert_eq!(m.flush().unwrap(), 10);
    assert_eq!(m.steps_count(), 2);
    assert_eq!(m.results().top(1), &[1]);

    // nothing left: flushing again is a no-op
    assert_eq!(m.flush().unwrap(), 0);
}
