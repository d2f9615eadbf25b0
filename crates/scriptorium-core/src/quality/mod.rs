//! Issue Detector: a pure `(metadata, content) -> (score, issues, artifacts)`
//! function. Everything it depends on, the reference date included, lives in
//! [`DetectorConfig`], so identical configuration and input give identical output.

mod artifacts;
mod checks;
mod profile;

pub use artifacts::count_artifacts;
pub use checks::{Check, Subject, PIPELINE};
pub use profile::WeightProfile;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::ScoringConfig;
use crate::error::{Result, ScriptoriumError};
use crate::models::{ArtifactCount, Document, DocumentMetadata, Issue, Source};

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub min_words: usize,
    pub paragraph_min_words: usize,
    pub reference_date: NaiveDate,
    /// Lowercased; source names are always treated as placeholders too.
    pub placeholder_authors: Vec<String>,
    pub placeholder_dates: Vec<String>,
    pub title_suffixes: Vec<String>,
    profiles: BTreeMap<Source, WeightProfile>,
}

impl DetectorConfig {
    /// Default thresholds and built-in profiles, judged against `reference_date`.
    pub fn new(reference_date: NaiveDate) -> Self {
        let defaults = ScoringConfig::default();
        Self {
            min_words: defaults.min_words,
            paragraph_min_words: defaults.paragraph_min_words,
            reference_date,
            placeholder_authors: defaults.placeholder_authors.iter().map(|a| a.to_lowercase()).collect(),
            placeholder_dates: defaults.placeholder_dates,
            title_suffixes: defaults.title_suffixes,
            profiles: Source::ALL.into_iter().map(|s| (s, WeightProfile::builtin(s))).collect(),
        }
    }

    /// Builds the detector configuration from the `[scoring]` section. `today`
    /// is used when no reference date is configured.
    pub fn from_scoring(scoring: &ScoringConfig, today: NaiveDate) -> Result<Self> {
        let reference_date = match scoring.reference_date.as_deref() {
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
                ScriptoriumError::ConfigError(format!("scoring.reference_date '{raw}': {e}"))
            })?,
            None => today,
        };

        let mut profiles = BTreeMap::new();
        for source in Source::ALL {
            let mut profile = WeightProfile::builtin(source);
            if let Some(overrides) = scoring.profiles.get(source.as_str()) {
                profile = profile.with_overrides(overrides)?;
            }
            profiles.insert(source, profile);
        }
        if let Some(unknown) = scoring
            .profiles
            .keys()
            .find(|k| k.parse::<Source>().is_err())
        {
            return Err(ScriptoriumError::ConfigError(format!(
                "scoring.profiles.{unknown}: not a source collection"
            )));
        }

        Ok(Self {
            min_words: scoring.min_words,
            paragraph_min_words: scoring.paragraph_min_words,
            reference_date,
            placeholder_authors: scoring.placeholder_authors.iter().map(|a| a.to_lowercase()).collect(),
            placeholder_dates: scoring.placeholder_dates.clone(),
            title_suffixes: scoring.title_suffixes.clone(),
            profiles,
        })
    }

    pub fn profile(&self, source: Source) -> &WeightProfile {
        &self.profiles[&source]
    }

    pub(crate) fn is_placeholder_author(&self, lowered: &str) -> bool {
        self.placeholder_authors.iter().any(|p| p == lowered)
            || Source::ALL.iter().any(|s| s.as_str() == lowered)
    }
}

/// The detector's verdict on one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    pub score: u8,
    pub issues: Vec<Issue>,
    pub artifacts: Vec<ArtifactCount>,
    pub word_count: usize,
}

pub struct IssueDetector {
    config: DetectorConfig,
}

impl IssueDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn assess(&self, metadata: &DocumentMetadata, content: &str) -> Assessment {
        let subject = Subject {
            metadata,
            content,
            word_count: content.split_whitespace().count(),
        };

        let issues: Vec<Issue> = PIPELINE
            .iter()
            .filter_map(|check| check(&subject, &self.config))
            .collect();

        let profile = self.config.profile(metadata.source);
        let penalty: i32 = issues.iter().map(|i| profile.penalty(i.kind()) as i32).sum();

        Assessment {
            score: (100 - penalty).clamp(0, 100) as u8,
            issues,
            artifacts: count_artifacts(content),
            word_count: subject.word_count,
        }
    }

    pub fn assess_document(&self, doc: &Document) -> Assessment {
        self.assess(&doc.metadata(), &doc.content)
    }
}

/// Runs only the date check, for validating a reviewer's metadata edit.
pub fn date_issue(date: &str, config: &DetectorConfig) -> Option<Issue> {
    let metadata = DocumentMetadata {
        publication_date: Some(date.to_string()),
        ..Default::default()
    };
    let subject = Subject {
        metadata: &metadata,
        content: "",
        word_count: 0,
    };
    checks::check_date(&subject, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IssueKind;

    fn detector() -> IssueDetector {
        IssueDetector::new(DetectorConfig::new(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()))
    }

    fn words(n: usize) -> String {
        vec!["liberty"; n].join(" ")
    }

    #[test]
    fn test_scenario_a_four_issues_score_ten() {
        let doc = Document::new(1, Source::Library)
            .with_author("")
            .with_title("Some Essay - Encyclopedia")
            .with_content(words(40));

        let assessment = detector().assess_document(&doc);

        assert_eq!(assessment.score, 10);
        let kinds: Vec<_> = assessment.issues.iter().map(Issue::kind).collect();
        assert_eq!(
            kinds,
            vec![
                IssueKind::MissingAuthor,
                IssueKind::MissingDate,
                IssueKind::TitleSourceSuffix,
                IssueKind::InsufficientContent,
            ]
        );
    }

    #[test]
    fn test_clean_document_scores_100() {
        let doc = Document::new(1, Source::Library)
            .with_author("Mikhail Bakunin")
            .with_date("1882")
            .with_title("God and the State")
            .with_content(format!("{}\n\n{}", words(150), words(150)));

        let assessment = detector().assess_document(&doc);
        assert_eq!(assessment.score, 100);
        assert!(assessment.issues.is_empty());
        assert_eq!(assessment.word_count, 300);
    }

    #[test]
    fn test_score_clamps_at_zero() {
        let doc = Document::new(1, Source::Archive);
        let assessment = detector().assess_document(&doc);
        // 45 + 35 + 30 + 10 exceeds 100.
        assert_eq!(assessment.score, 0);
        assert_eq!(assessment.issues.len(), 4);
    }

    #[test]
    fn test_transcripts_profile_penalizes_wall_of_text() {
        let content = words(300);
        let metadata = |source| DocumentMetadata {
            source,
            title: Some("Lecture on Mutual Aid".into()),
            author: Some("Peter Kropotkin".into()),
            publication_date: Some("1902".into()),
        };

        let d = detector();
        let transcript = d.assess(&metadata(Source::Transcripts), &content);
        let library = d.assess(&metadata(Source::Library), &content);

        assert_eq!(transcript.score, 70);
        assert_eq!(library.score, 100);
        assert_eq!(library.issues, transcript.issues);
    }

    #[test]
    fn test_artifacts_do_not_affect_score() {
        let clean = format!("{}\n\n{}", words(60), words(60));
        let dirty = format!("{}\n\n[Page 4] <div>{}</div>", words(60), words(59));
        let metadata = DocumentMetadata {
            source: Source::Texts,
            title: Some("Statism and Anarchy".into()),
            author: Some("Mikhail Bakunin".into()),
            publication_date: Some("1873".into()),
        };

        let d = detector();
        let a = d.assess(&metadata, &clean);
        let b = d.assess(&metadata, &dirty);
        assert_eq!(a.score, b.score);
        assert!(a.artifacts.is_empty());
        assert_eq!(b.artifacts.len(), 2);
    }

    #[test]
    fn test_assessment_is_deterministic() {
        let doc = Document::new(9, Source::Texts)
            .with_author("J. R.")
            .with_date("2031")
            .with_title("Notes...")
            .with_content(words(10));
        let d = detector();
        assert_eq!(d.assess_document(&doc), d.assess_document(&doc));
    }

    #[test]
    fn test_from_scoring_applies_overrides_and_reference_date() {
        let mut scoring = ScoringConfig::default();
        scoring.reference_date = Some("2000-01-01".into());
        scoring
            .profiles
            .insert("library".into(), BTreeMap::from([("missing_author".into(), 5)]));

        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let config = DetectorConfig::from_scoring(&scoring, today).unwrap();
        assert_eq!(config.reference_date, NaiveDate::from_ymd_opt(2000, 1, 1).unwrap());
        assert_eq!(config.profile(Source::Library).penalty(IssueKind::MissingAuthor), 5);

        scoring.profiles.insert("video".into(), BTreeMap::new());
        assert!(DetectorConfig::from_scoring(&scoring, today).is_err());
    }
}
