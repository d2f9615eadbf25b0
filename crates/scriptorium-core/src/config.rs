use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Root application configuration, loaded from `~/.config/scriptorium/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub core: CoreConfig,
    pub scoring: ScoringConfig,
    pub fingerprint: FingerprintConfig,
    pub dedup: DedupConfig,
    pub merge: MergeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub database_path: String,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub min_words: usize,
    pub paragraph_min_words: usize,
    /// `YYYY-MM-DD`; when unset the current UTC date is used at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_date: Option<String>,
    pub placeholder_authors: Vec<String>,
    pub placeholder_dates: Vec<String>,
    pub title_suffixes: Vec<String>,
    /// Per-source penalty overrides, e.g. `[scoring.profiles.texts] missing_date = 5`.
    pub profiles: BTreeMap<String, BTreeMap<String, u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    pub chunk_size: usize,
    /// Worker threads for fingerprint computation; 0 uses one per core.
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub fuzzy_strong_distance: usize,
    pub fuzzy_weak_distance: usize,
    pub fuzzy_strong_confidence: f64,
    pub fuzzy_weak_confidence: f64,
    pub simhash_bands: u32,
    pub simhash_strong_distance: u32,
    pub simhash_weak_distance: u32,
    pub simhash_strong_confidence: f64,
    pub simhash_weak_confidence: f64,
    pub simhash_min_words: usize,
    pub max_bucket_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Clusters strictly above this confidence may be auto-merged.
    pub auto_merge_threshold: f64,
    /// Clusters below this confidence are not actionable.
    pub review_threshold: f64,
    pub tombstone_grace_days: i64,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for CoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("scriptorium");

        Self {
            database_path: data_dir.join("scriptorium.db").to_string_lossy().to_string(),
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_words: 100,
            paragraph_min_words: 200,
            reference_date: None,
            placeholder_authors: [
                "unknown",
                "anonymous",
                "anon",
                "n/a",
                "various",
                "wikipedia",
                "encyclopedia",
                "britannica",
                "archive",
                "library",
                "admin",
            ]
            .map(String::from)
            .to_vec(),
            placeholder_dates: ["1900-01-01", "1970-01-01", "0001-01-01", "1900"]
                .map(String::from)
                .to_vec(),
            title_suffixes: [
                "- Encyclopedia",
                "- Wikipedia",
                "| Britannica",
                "- Britannica",
                "(Transcript)",
                "[Transcript]",
                "- Full Text",
                "(PDF)",
            ]
            .map(String::from)
            .to_vec(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            workers: 0,
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            fuzzy_strong_distance: 3,
            fuzzy_weak_distance: 5,
            fuzzy_strong_confidence: 0.95,
            fuzzy_weak_confidence: 0.85,
            simhash_bands: 8,
            simhash_strong_distance: 2,
            simhash_weak_distance: 6,
            simhash_strong_confidence: 0.90,
            simhash_weak_confidence: 0.70,
            simhash_min_words: 50,
            max_bucket_size: 500,
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            auto_merge_threshold: 0.95,
            review_threshold: 0.75,
            tombstone_grace_days: 30,
        }
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl AppConfig {
    /// Standard config file path: `~/.config/scriptorium/config.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("SCRIPTORIUM_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("scriptorium")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        Self::load_from(&path)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    /// Reject settings that would make a batch job or detector layer misbehave.
    pub fn validate(&self) -> Result<()> {
        use crate::error::ScriptoriumError;

        if self.fingerprint.chunk_size == 0 {
            return Err(ScriptoriumError::ConfigError(
                "fingerprint.chunk_size must be positive".into(),
            ));
        }
        let bands = self.dedup.simhash_bands;
        if bands == 0 || bands > 64 || 64 % bands != 0 {
            return Err(ScriptoriumError::ConfigError(format!(
                "dedup.simhash_bands must divide 64, got {bands}"
            )));
        }
        if self.dedup.fuzzy_strong_distance > self.dedup.fuzzy_weak_distance {
            return Err(ScriptoriumError::ConfigError(
                "dedup.fuzzy_strong_distance exceeds fuzzy_weak_distance".into(),
            ));
        }
        if self.merge.review_threshold > self.merge.auto_merge_threshold {
            return Err(ScriptoriumError::ConfigError(
                "merge.review_threshold exceeds auto_merge_threshold".into(),
            ));
        }
        if self.merge.tombstone_grace_days < 0 {
            return Err(ScriptoriumError::ConfigError(
                "merge.tombstone_grace_days must not be negative".into(),
            ));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.core.database_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.scoring.min_words, 100);
        assert_eq!(cfg.fingerprint.chunk_size, 1_000);
        assert_eq!(cfg.dedup.simhash_bands, 8);
        assert!(cfg.database_path().to_string_lossy().contains("scriptorium.db"));
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut cfg = AppConfig::default();
        cfg.scoring
            .profiles
            .entry("texts".into())
            .or_default()
            .insert("missing_date".into(), 5);
        cfg.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.scoring.profiles["texts"]["missing_date"], 5);
        assert_eq!(loaded.merge.tombstone_grace_days, cfg.merge.tombstone_grace_days);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dedup]\nmax_bucket_size = 42\n").unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.dedup.max_bucket_size, 42);
        assert_eq!(loaded.dedup.simhash_bands, 8);
        assert_eq!(loaded.scoring.min_words, 100);
    }

    #[test]
    fn test_invalid_bands_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dedup]\nsimhash_bands = 7\n").unwrap();

        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(cfg.merge.auto_merge_threshold, 0.95);
    }
}
