//! Shared helpers for the integration tests.

use std::cell::RefCell;
use std::rc::Rc;

use waveprint::audio::BufferAudioProvider;
use waveprint::store::MemoryStore;
use waveprint::{Indexer, IndexerConfig, MatchType};

/// A deterministic mixture of gated tones: spectrally busy enough to
/// produce a steady stream of peaks, different for every seed.
pub fn tone_signal(seconds: f32, seed: u32) -> Vec<f32> {
    let fs = waveprint::params::FS as f32;
    let n = (seconds * fs) as usize;

    // tone set from a small LCG
    let mut state = seed.wrapping_mul(2654435761).max(1);
    let mut tones = Vec::new();
    for j in 0..24 {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        let freq = 200.0 + (state >> 16) as f32 % 2800.0;
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        let amp = 0.3 + ((state >> 16) as f32 % 100.0) / 140.0;
        let gate_rate = 0.6 + j as f32 * 0.11;
        tones.push((freq, amp, gate_rate));
    }

    (0..n)
        .map(|i| {
            let t = i as f32 / fs;
            let mut s = 0.0f32;
            for &(freq, amp, gate_rate) in &tones {
                let gate = if (t * gate_rate).sin() > 0.0 { 1.0 } else { 0.0 };
                s += gate * amp * (2.0 * std::f32::consts::PI * freq * t).sin();
            }
            s / 24.0
        })
        .collect()
}

/// Index the given recordings (FIDs 1..=n) into a fresh shared store.
pub fn index_recordings(
    recordings: &[Vec<f32>],
    match_type: MatchType,
) -> Rc<RefCell<MemoryStore>> {
    let store = Rc::new(RefCell::new(MemoryStore::new()));
    let mut indexer = Indexer::new(
        store.clone(),
        IndexerConfig::new().with_match_type(match_type),
    )
    .unwrap();

    indexer.start().unwrap();
    for (i, samples) in recordings.iter().enumerate() {
        let mut provider = BufferAudioProvider::new(samples.clone());
        indexer.index(i as u32 + 1, &mut provider).unwrap();
    }
    indexer.end(true).unwrap();

    store
}
