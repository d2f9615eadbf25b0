//! Duplicate detection and merging for the scriptorium corpus.
//!
//! Fingerprints are computed once per document ([`FingerprintGenerator`]),
//! grouped into clusters by three layers of evidence ([`DuplicateDetector`]),
//! and resolved by a reviewer or the auto-merge policy ([`MergeEngine`]).

pub mod detect;
pub mod fingerprint;
pub mod merge;
pub mod normalize;
pub mod simhash;
pub mod soundex;

pub use detect::{DetectOptions, DetectionSummary, DuplicateDetector, Layer, SkippedBucket};
pub use fingerprint::{compute, FingerprintGenerator, GenerateOptions, GenerateSummary, FINGERPRINT_JOB};
pub use merge::{
    choose_canonical, AutoMergeSummary, ClusterInfo, MergeEngine, MergeOutcome, RollbackOutcome, Verdict,
};
