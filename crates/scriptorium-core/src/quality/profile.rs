use std::collections::BTreeMap;

use crate::error::{Result, ScriptoriumError};
use crate::models::{IssueKind, Source};

/// Penalty per issue kind. Kinds without an entry use the default table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightProfile {
    name: String,
    penalties: BTreeMap<IssueKind, u8>,
}

impl WeightProfile {
    pub fn default_profile() -> Self {
        Self {
            name: "default".to_string(),
            penalties: BTreeMap::new(),
        }
    }

    /// Built-in profile for a source collection.
    pub fn builtin(source: Source) -> Self {
        use IssueKind::*;

        let penalties: &[(IssueKind, u8)] = match source {
            Source::Library => &[],
            // Caption text: readability dominates, metadata is expected to be thin.
            Source::Transcripts => &[
                (NoParagraphStructure, 30),
                (InsufficientContent, 20),
                (MissingAuthor, 20),
                (PlaceholderAuthor, 20),
                (InitialsOnlyAuthor, 10),
                (TruncatedAuthor, 5),
                (MissingDate, 15),
                (MalformedDate, 15),
                (ImpossibleDate, 15),
                (MissingTitle, 10),
            ],
            Source::Archive => &[(MissingAuthor, 45), (MissingDate, 35), (MissingTitle, 30)],
            Source::Texts => &[(MissingDate, 10)],
        };

        Self {
            name: source.as_str().to_string(),
            penalties: penalties.iter().copied().collect(),
        }
    }

    /// Layers config overrides (issue kind name to penalty) on top of this profile.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, u8>) -> Result<Self> {
        for (key, &penalty) in overrides {
            let kind: IssueKind = key.parse().map_err(|e: String| {
                ScriptoriumError::ConfigError(format!("profile '{}': {e}", self.name))
            })?;
            if penalty > 100 {
                return Err(ScriptoriumError::ConfigError(format!(
                    "profile '{}': penalty for {kind} must be at most 100, got {penalty}",
                    self.name
                )));
            }
            self.penalties.insert(kind, penalty);
        }
        Ok(self)
    }

    pub fn penalty(&self, kind: IssueKind) -> u8 {
        self.penalties
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_penalty())
    }
}

impl Default for WeightProfile {
    fn default() -> Self {
        Self::default_profile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles() {
        let transcripts = WeightProfile::builtin(Source::Transcripts);
        assert_eq!(transcripts.penalty(IssueKind::NoParagraphStructure), 30);
        assert_eq!(transcripts.penalty(IssueKind::InsufficientContent), 20);
        assert!(transcripts.penalty(IssueKind::MissingAuthor) < IssueKind::MissingAuthor.default_penalty());

        let archive = WeightProfile::builtin(Source::Archive);
        assert_eq!(archive.penalty(IssueKind::MissingAuthor), 45);
        assert_eq!(archive.penalty(IssueKind::MissingDate), 35);
        assert_eq!(archive.penalty(IssueKind::MissingTitle), 30);
        assert_eq!(archive.penalty(IssueKind::TitleSourceSuffix), 10);

        assert_eq!(WeightProfile::builtin(Source::Texts).penalty(IssueKind::MissingDate), 10);
        assert_eq!(
            WeightProfile::builtin(Source::Library),
            WeightProfile { name: "library".into(), penalties: BTreeMap::new() }
        );
    }

    #[test]
    fn test_overrides_layer_on_builtin() {
        let overrides = BTreeMap::from([("missing_title".to_string(), 5u8)]);
        let profile = WeightProfile::builtin(Source::Archive).with_overrides(&overrides).unwrap();

        assert_eq!(profile.penalty(IssueKind::MissingTitle), 5);
        assert_eq!(profile.penalty(IssueKind::MissingAuthor), 45);
    }

    #[test]
    fn test_unknown_override_is_config_error() {
        let overrides = BTreeMap::from([("spelling".to_string(), 5u8)]);
        let err = WeightProfile::default_profile().with_overrides(&overrides).unwrap_err();
        assert!(matches!(err, ScriptoriumError::ConfigError(_)));

        let too_big = BTreeMap::from([("missing_author".to_string(), 101u8)]);
        assert!(WeightProfile::default_profile().with_overrides(&too_big).is_err());
    }
}
