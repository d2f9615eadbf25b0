use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{ArtifactCount, ArtifactKind};

static PAGE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)\[\s*page\s+\d+\s*\]|^\s*-{2,}\s*page\s+\d+\s*-{2,}\s*$").expect("valid page marker regex")
});

static IMAGE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)!\[[^\]]*\]\([^)]*\)|<img\b[^>]*>").expect("valid image regex")
});

static STRAY_MARKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(?:div|span|p|br|font|b|i|u|em|strong|table|tr|td|a|center|sup|sub)\b[^>]*>")
        .expect("valid markup regex")
});

// A word split across a line break: "revolu-\ntion".
static HYPHENATION_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\p{L}-[ \t]*\r?\n[ \t]*\p{Ll}").expect("valid hyphenation regex"));

/// Counts formatting artifacts. Kinds with no occurrences are omitted.
pub fn count_artifacts(content: &str) -> Vec<ArtifactCount> {
    [
        (ArtifactKind::PageMarker, &*PAGE_MARKER),
        (ArtifactKind::ImageReference, &*IMAGE_REFERENCE),
        (ArtifactKind::StrayMarkup, &*STRAY_MARKUP),
        (ArtifactKind::HyphenationBreak, &*HYPHENATION_BREAK),
    ]
    .into_iter()
    .map(|(kind, re)| ArtifactCount {
        kind,
        count: re.find_iter(content).count(),
    })
    .filter(|a| a.count > 0)
    .collect()
}
