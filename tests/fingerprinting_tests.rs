//! Fingerprint extraction and codebook integration tests.

mod common;

use waveprint::fingerprinting::codebook::Codebook;
use waveprint::fingerprinting::fingerprinter::Qlf;
use waveprint::params;
use waveprint::Fingerprinter;

#[test]
fn lf_stream_invariants_over_a_long_signal() {
    let signal = common::tone_signal(10.0, 21);
    let mut fingerprinter = Fingerprinter::new();

    let mut all = Vec::new();
    let chunks: Vec<&[f32]> = signal.chunks(params::FS as usize).collect();
    for (i, chunk) in chunks.iter().enumerate() {
        fingerprinter.process(chunk, i + 1 == chunks.len());
        all.extend_from_slice(fingerprinter.get());
    }

    assert!(!all.is_empty(), "the test signal must produce LFs");

    for (i, lf) in all.iter().enumerate() {
        // IDs strictly increasing from 0
        assert_eq!(lf.id, i as u32);
        // frequency within the analysis band
        assert!(lf.f >= params::KMIN as u32 && lf.f <= params::KMAX as u32);
        // fixed-size descriptor
        assert_eq!(lf.descriptor.len(), params::IDI / 8);
        // time non-decreasing
        if i > 0 {
            assert!(lf.t >= all[i - 1].t);
        }
    }
}

#[test]
fn sub_half_second_blocks_yield_nothing() {
    let signal = common::tone_signal(0.3, 4);
    let mut fingerprinter = Fingerprinter::new();
    fingerprinter.process(&signal, false);
    assert!(fingerprinter.get().is_empty());
    // even with the flush flag
    fingerprinter.process(&signal, true);
    assert!(fingerprinter.get().is_empty());
}

#[test]
fn quantization_produces_valid_qlfs() {
    let signal = common::tone_signal(3.0, 9);
    let mut fingerprinter = Fingerprinter::new();
    fingerprinter.process(&signal, false);

    let codebook = Codebook::shared().unwrap();
    for lf in fingerprinter.get() {
        let q = codebook.quantize(&lf.descriptor);
        assert!((q.word as usize) < params::KMED);
        // a second quantization of the same descriptor is identical
        assert_eq!(codebook.quantize(&lf.descriptor), q);
    }
}

#[test]
fn packed_fingerprint_round_trips() {
    let signal = common::tone_signal(2.0, 33);
    let mut fingerprinter = Fingerprinter::new();
    fingerprinter.process(&signal, false);

    let codebook = Codebook::shared().unwrap();
    let qlfs: Vec<Qlf> = fingerprinter
        .get()
        .iter()
        .map(|lf| {
            let q = codebook.quantize(&lf.descriptor);
            Qlf {
                t: lf.t,
                f: lf.f as u16,
                w: q.word,
                e: q.dist,
            }
        })
        .collect();
    assert!(!qlfs.is_empty());

    let packed = Qlf::pack(&qlfs);
    assert_eq!(packed.len(), qlfs.len() * Qlf::SIZE);
    assert_eq!(Qlf::parse(&packed).unwrap(), qlfs);
}

#[test]
fn codebook_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("codes.bin");
    let path = path.to_str().unwrap();

    let codebook = Codebook::shared().unwrap();
    codebook.save(path).unwrap();

    let loaded = Codebook::load(path).unwrap();
    assert_eq!(loaded.len(), codebook.len());
    assert_eq!(loaded.clusters(), codebook.clusters());

    // a truncated file is rejected
    let bytes = std::fs::read(path).unwrap();
    std::fs::write(path, &bytes[..bytes.len() - 1]).unwrap();
    assert!(Codebook::load(path).is_err());
}
