//! 64-bit SimHash over weighted word-bigram shingles.

use std::collections::BTreeMap;

use crate::normalize::{is_stopword, tokens};

fn hash64(shingle: &str) -> u64 {
    let digest = blake3::hash(shingle.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Shingle frequencies of `normalized` content with stopwords removed. A text
/// with a single significant word shingles as that word.
fn shingles(normalized: &str) -> BTreeMap<String, i64> {
    let words: Vec<String> = tokens(normalized).into_iter().filter(|t| !is_stopword(t)).collect();

    let mut counts = BTreeMap::new();
    if words.len() == 1 {
        counts.insert(words[0].clone(), 1);
        return counts;
    }
    for pair in words.windows(2) {
        *counts.entry(format!("{} {}", pair[0], pair[1])).or_insert(0) += 1;
    }
    counts
}

/// SimHash of already-normalized content; empty input hashes to 0.
pub fn simhash(normalized: &str) -> u64 {
    let mut weights = [0i64; 64];
    for (shingle, weight) in shingles(normalized) {
        let hash = hash64(&shingle);
        for (bit, total) in weights.iter_mut().enumerate() {
            if hash & (1 << bit) != 0 {
                *total += weight;
            } else {
                *total -= weight;
            }
        }
    }

    weights
        .iter()
        .enumerate()
        .filter(|(_, total)| **total > 0)
        .fold(0u64, |acc, (bit, _)| acc | (1 << bit))
}

pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Splits a signature into `bands` equal-width band values for LSH bucketing.
/// `bands` must divide 64.
pub fn bands(signature: u64, bands: u32) -> impl Iterator<Item = (u32, u64)> {
    let width = 64 / bands;
    let mask = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
    (0..bands).map(move |band| (band, (signature >> (band * width)) & mask))
}
