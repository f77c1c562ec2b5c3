//! Indexer and inverted-index integration tests, driven by synthetic
//! fingerprints.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use waveprint::fingerprinting::fingerprinter::Qlf;
use waveprint::index::indexer::max_term_value;
use waveprint::index::postings::PostingIterator;
use waveprint::params;
use waveprint::store::{DataStore, MemoryStore};
use waveprint::synth::QlfGenerator;
use waveprint::{Error, Indexer, IndexerConfig, MatchType};

fn new_indexer(cache_mb: usize, match_type: MatchType) -> Indexer<Rc<RefCell<MemoryStore>>> {
    let store = Rc::new(RefCell::new(MemoryStore::new()));
    Indexer::new(
        store,
        IndexerConfig::new()
            .with_match_type(match_type)
            .with_cache_limit_mb(cache_mb),
    )
    .unwrap()
}

#[test]
fn session_state_machine() {
    let mut indexer = new_indexer(16, MatchType::Mscale);
    let fp = Qlf::pack(&[Qlf { t: 0, f: 100, w: 1, e: 10 }]);

    // indexing without a session is an error
    assert!(matches!(
        indexer.index_fingerprint(1, &fp),
        Err(Error::InvalidIndexerState(_))
    ));
    assert!(matches!(indexer.end(true), Err(Error::InvalidIndexerState(_))));

    indexer.start().unwrap();
    // double start is an error
    assert!(matches!(indexer.start(), Err(Error::InvalidIndexerState(_))));

    indexer.index_fingerprint(1, &fp).unwrap();
    indexer.end(true).unwrap();

    // a new session can be opened on the same instance
    indexer.start().unwrap();
    indexer.end(false).unwrap();
}

#[test]
fn fids_must_be_strictly_increasing() {
    let mut indexer = new_indexer(16, MatchType::Mscale);
    let mut gen = QlfGenerator::new(StdRng::seed_from_u64(1));
    let fp = Qlf::pack(&gen.generate_frames(100));

    indexer.start().unwrap();
    // FID zero is not a valid identifier
    assert!(matches!(
        indexer.index_fingerprint(0, &fp),
        Err(Error::InvalidParameter(_))
    ));
    indexer.index_fingerprint(5, &fp).unwrap();
    // same FID again
    assert!(matches!(
        indexer.index_fingerprint(5, &fp),
        Err(Error::InvalidParameter(_))
    ));
    // going backwards
    assert!(matches!(
        indexer.index_fingerprint(3, &fp),
        Err(Error::InvalidParameter(_))
    ));
    indexer.index_fingerprint(6, &fp).unwrap();
    indexer.end(true).unwrap();
}

#[test]
fn corrupt_fingerprints_are_rejected() {
    let mut indexer = new_indexer(16, MatchType::Mscale);
    indexer.start().unwrap();

    assert!(matches!(
        indexer.index_fingerprint(1, &[]),
        Err(Error::InvalidFingerprint(_))
    ));
    assert!(matches!(
        indexer.index_fingerprint(1, &[1, 2, 3]),
        Err(Error::InvalidFingerprint(_))
    ));

    // the failed FID can be reused for the next file, per the recovery
    // contract
    let mut gen = QlfGenerator::new(StdRng::seed_from_u64(2));
    let fp = Qlf::pack(&gen.generate_frames(100));
    indexer.index_fingerprint(1, &fp).unwrap();
    indexer.end(true).unwrap();
}

/// Bulk-index 1000 synthetic fingerprints with a tight cache and verify
/// the whole index decodes back consistently.
#[test]
fn bulk_indexing_respects_the_cache_limit_and_round_trips() {
    const NFP: u32 = 1000;

    let mut indexer = new_indexer(1, MatchType::Mscale);
    let mut gen = QlfGenerator::new(StdRng::seed_from_u64(99));
    let mut originals: Vec<Vec<Qlf>> = Vec::new();

    indexer.start().unwrap();
    for fid in 1..=NFP {
        let qlfs = gen.generate_frames(300);
        let packed = Qlf::pack(&qlfs);
        indexer.index_fingerprint(fid, &packed).unwrap();
        indexer.store_mut().borrow_mut().put_fingerprint(fid, &packed);
        originals.push(qlfs);

        // the cache limit is honored at every observation point
        assert!(indexer.cache_used() < 1024 * 1024);
    }
    indexer.end(true).unwrap();

    let store = indexer.into_store();
    assert_eq!(store.borrow().fingerprints_count(), NFP as usize);

    // every term's list must decode back to a valid posting sequence
    let max_term = max_term_value(MatchType::Mscale);
    let terms = store.borrow().terms();
    let mut total_postings = 0usize;
    for term in terms.iter().copied() {
        assert!(term <= max_term);

        let mut it = PostingIterator::new(term);
        let mut store_ref = store.clone();
        let mut prev_fid = 0u32;
        while let Some(p) = it.get(&mut store_ref).unwrap() {
            assert!(p.fid > prev_fid, "FIDs must be strictly increasing");
            assert!(p.fid <= NFP);
            for occ in 0..p.lid.len() {
                if occ > 0 {
                    assert!(p.lid[occ] > p.lid[occ - 1]);
                    assert!(p.t[occ] >= p.t[occ - 1]);
                }
                assert!(p.e[occ] <= params::IDI as u32);
            }
            prev_fid = p.fid;
            total_postings += 1;
            it.next(&mut store_ref).unwrap();
        }
    }
    assert!(total_postings > 0);

    // reconstruct each fingerprint's posting occurrences from the index
    // and compare with the source stream for a few sampled FIDs
    for &fid in &[1u32, 500, 1000] {
        let qlfs = &originals[fid as usize - 1];
        let mut seen = vec![false; qlfs.len()];
        for term in terms.iter().copied() {
            let mut it = PostingIterator::new(term);
            let mut store_ref = store.clone();
            while let Some(p) = it.get(&mut store_ref).unwrap() {
                if p.fid == fid {
                    for occ in 0..p.lid.len() {
                        let lid = p.lid[occ] as usize;
                        assert!(lid < qlfs.len());
                        assert_eq!(p.t[occ], qlfs[lid].t);
                        assert_eq!(p.e[occ], u32::from(qlfs[lid].e));
                        seen[lid] = true;
                    }
                }
                it.next(&mut store_ref).unwrap();
            }
        }
        assert!(
            seen.iter().all(|&s| s),
            "every LF of FID {} must appear in the index",
            fid
        );
    }
}

/// Force a single very hot term so lists split into multiple blocks, and
/// verify the block chain decodes in order.
#[test]
fn hot_lists_are_chunked_into_blocks() {
    const NFP: u32 = 600;

    let mut indexer = new_indexer(1, MatchType::Mscale);
    indexer.start().unwrap();

    for fid in 1..=NFP {
        // every LF quantizes to the same (W, channel) pair
        let qlfs: Vec<Qlf> = (0..200)
            .map(|i| Qlf {
                t: i * 4,
                f: 200,
                w: 7,
                e: (i % 200) as u8,
            })
            .collect();
        indexer.index_fingerprint(fid, &Qlf::pack(&qlfs)).unwrap();
    }
    indexer.end(true).unwrap();

    let store = indexer.into_store();
    let terms = store.borrow().terms();
    assert_eq!(terms.len(), 1, "all postings share one term");
    let term = terms[0];

    let header = store.borrow_mut().on_indexer_list_header(term).unwrap().unwrap();
    assert!(
        header.block_count > 1,
        "a hot list must be split into blocks (got {})",
        header.block_count
    );

    // the posting sequence is seamless across block boundaries
    let mut it = PostingIterator::new(term);
    let mut store_ref = store.clone();
    let mut expected_fid = 1u32;
    while let Some(p) = it.get(&mut store_ref).unwrap() {
        assert_eq!(p.fid, expected_fid);
        assert_eq!(p.lid.len(), 200);
        assert_eq!(p.t[0], 0);
        assert_eq!(p.t[199], 796);
        expected_fid += 1;
        it.next(&mut store_ref).unwrap();
    }
    assert_eq!(expected_fid, NFP + 1);
}

#[test]
fn flush_is_idempotent() {
    let mut indexer = new_indexer(16, MatchType::Mscale);
    let mut gen = QlfGenerator::new(StdRng::seed_from_u64(3));

    indexer.start().unwrap();
    indexer
        .index_fingerprint(1, &Qlf::pack(&gen.generate_frames(200)))
        .unwrap();
    indexer.flush().unwrap();
    assert_eq!(indexer.cache_used(), 0);

    // flushing an empty cache emits nothing and changes nothing
    let blocks_before: Vec<_> = {
        let store = indexer.store_mut().borrow();
        store.terms()
    };
    indexer.flush().unwrap();
    indexer.flush().unwrap();
    let blocks_after: Vec<_> = {
        let store = indexer.store_mut().borrow();
        store.terms()
    };
    assert_eq!(blocks_before.len(), blocks_after.len());
    indexer.end(true).unwrap();
}

#[test]
fn xscale_terms_stay_within_the_hash_range() {
    let mut indexer = new_indexer(16, MatchType::Xscale);
    let mut gen = QlfGenerator::new(StdRng::seed_from_u64(17));

    indexer.start().unwrap();
    for fid in 1..=20 {
        indexer
            .index_fingerprint(fid, &Qlf::pack(&gen.generate_frames(300)))
            .unwrap();
    }
    indexer.end(true).unwrap();

    let store = indexer.into_store();
    let max_term = max_term_value(MatchType::Xscale);
    let terms = store.borrow().terms();
    assert!(!terms.is_empty());
    for term in terms {
        assert!(term <= max_term, "term {:#x} exceeds {:#x}", term, max_term);
    }
}
