//! The three detection layers. Each is a pure function from fingerprints to
//! confirmed edges; blocking keeps the pairwise work inside small buckets.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use scriptorium_core::config::DedupConfig;
use scriptorium_core::{ClusterType, DocumentId, Fingerprint};

use crate::normalize::token_sorted;
use crate::simhash::{bands, hamming};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Exact,
    Fuzzy,
    Simhash,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Self::Exact, Self::Fuzzy, Self::Simhash];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Fuzzy => "fuzzy",
            Self::Simhash => "simhash",
        }
    }

    pub fn cluster_type(&self) -> ClusterType {
        match self {
            Self::Exact => ClusterType::ExactMatch,
            Self::Fuzzy => ClusterType::FuzzyMatch,
            Self::Simhash => ClusterType::NearDuplicate,
        }
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Layer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "fuzzy" => Ok(Self::Fuzzy),
            "simhash" | "near" => Ok(Self::Simhash),
            _ => Err(format!("Invalid layer: {s} (expected exact, fuzzy or simhash)")),
        }
    }
}

/// A confirmed duplicate relation between two documents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub left: DocumentId,
    pub right: DocumentId,
    pub confidence: f64,
    pub cluster_type: ClusterType,
}

/// A blocking bucket too large to compare pairwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedBucket {
    pub layer: Layer,
    pub key: String,
    pub size: usize,
}

#[derive(Debug, Default)]
pub struct LayerOutput {
    pub edges: Vec<Edge>,
    pub skipped: Vec<SkippedBucket>,
}

/// Groups by normalized content hash (raw SHA-256 when `strict`). Every group
/// is linked as a star around its lowest id. Empty documents never group.
pub fn exact_edges(fingerprints: &[Fingerprint], strict: bool) -> LayerOutput {
    let mut groups: BTreeMap<&str, Vec<DocumentId>> = BTreeMap::new();
    for fp in fingerprints.iter().filter(|fp| fp.has_content()) {
        let key = if strict {
            fp.content_sha256.as_str()
        } else {
            fp.normalized_content_md5.as_str()
        };
        groups.entry(key).or_default().push(fp.document_id);
    }

    let mut output = LayerOutput::default();
    for ids in groups.into_values() {
        if let Some((first, rest)) = ids.split_first() {
            for other in rest {
                output.edges.push(Edge {
                    left: *first,
                    right: *other,
                    confidence: 1.0,
                    cluster_type: ClusterType::ExactMatch,
                });
            }
        }
    }
    output
}

/// Unique index pairs sharing at least one bucket. Oversized buckets are
/// reported in `skipped` and contribute no pairs.
fn bucket_pairs(
    buckets: BTreeMap<String, Vec<usize>>,
    layer: Layer,
    max_bucket_size: usize,
    skipped: &mut Vec<SkippedBucket>,
) -> BTreeSet<(usize, usize)> {
    let mut pairs = BTreeSet::new();
    for (key, members) in buckets {
        if members.len() < 2 {
            continue;
        }
        if members.len() > max_bucket_size {
            tracing::warn!(%layer, key = %key, size = members.len(), "skipping oversized bucket");
            skipped.push(SkippedBucket {
                layer,
                key,
                size: members.len(),
            });
            continue;
        }
        for (i, &a) in members.iter().enumerate() {
            for &b in &members[i + 1..] {
                pairs.insert((a.min(b), a.max(b)));
            }
        }
    }
    pairs
}

/// Blocks on `(title_soundex, author code)` and confirms by Levenshtein
/// distance between token-sorted titles.
///
/// Sorting tokens makes "Mikhail Bakunin — God and the State" and
/// "Bakunin, Michael: God and the State" distance 2 apart ("kh"/"ch",
/// "i"/"e"), so that pair lands in the strong band (0.95), not the weak one.
/// A weak match needs a dropped word, as in "God and State".
pub fn fuzzy_edges(
    fingerprints: &[Fingerprint],
    titles: &HashMap<DocumentId, String>,
    config: &DedupConfig,
) -> LayerOutput {
    let sorted_titles: Vec<Option<String>> = fingerprints
        .iter()
        .map(|fp| titles.get(&fp.document_id).map(|t| token_sorted(t)))
        .collect();

    let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, fp) in fingerprints.iter().enumerate() {
        if fp.title_soundex.is_empty() || sorted_titles[idx].is_none() {
            continue;
        }
        for code in &fp.author_soundex {
            buckets
                .entry(format!("{} / {code}", fp.title_soundex))
                .or_default()
                .push(idx);
        }
    }

    let mut output = LayerOutput::default();
    for (a, b) in bucket_pairs(buckets, Layer::Fuzzy, config.max_bucket_size, &mut output.skipped) {
        let (Some(left), Some(right)) = (&sorted_titles[a], &sorted_titles[b]) else {
            continue;
        };
        let distance = strsim::levenshtein(left, right);
        let confidence = if distance < config.fuzzy_strong_distance {
            config.fuzzy_strong_confidence
        } else if distance < config.fuzzy_weak_distance {
            config.fuzzy_weak_confidence
        } else {
            continue;
        };
        output.edges.push(Edge {
            left: fingerprints[a].document_id,
            right: fingerprints[b].document_id,
            confidence,
            cluster_type: ClusterType::FuzzyMatch,
        });
    }
    output
}

/// LSH banding over the 64-bit signatures, confirmed by Hamming distance.
/// Documents shorter than `simhash_min_words` are left out.
pub fn simhash_edges(fingerprints: &[Fingerprint], config: &DedupConfig) -> LayerOutput {
    let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, fp) in fingerprints.iter().enumerate() {
        if !fp.has_content() || fp.word_count < config.simhash_min_words {
            continue;
        }
        for (band, value) in bands(fp.simhash_64, config.simhash_bands) {
            buckets.entry(format!("{band}:{value:016x}")).or_default().push(idx);
        }
    }

    let mut output = LayerOutput::default();
    for (a, b) in bucket_pairs(buckets, Layer::Simhash, config.max_bucket_size, &mut output.skipped) {
        let distance = hamming(fingerprints[a].simhash_64, fingerprints[b].simhash_64);
        let confidence = if distance <= config.simhash_strong_distance {
            config.simhash_strong_confidence
        } else if distance <= config.simhash_weak_distance {
            config.simhash_weak_confidence
        } else {
            continue;
        };
        output.edges.push(Edge {
            left: fingerprints[a].document_id,
            right: fingerprints[b].document_id,
            confidence,
            cluster_type: ClusterType::NearDuplicate,
        });
    }
    output
}
