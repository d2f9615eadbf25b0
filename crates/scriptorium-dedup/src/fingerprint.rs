//! Fingerprint computation and the resumable batch generator.

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use md5::{Digest, Md5};
use rayon::prelude::*;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use scriptorium_core::config::FingerprintConfig;
use scriptorium_core::{
    Document, DocumentId, DocumentStore, Fingerprint, FingerprintRepository, JobRepository, Repository, Result,
    Scope, ScriptoriumError, SqliteDocumentStore,
};

use crate::normalize::normalize_content;
use crate::simhash::simhash;
use crate::soundex::{author_codes, title_key};

/// Job name of the generator's progress token.
pub const FINGERPRINT_JOB: &str = "fingerprints";

pub fn content_md5(content: &str) -> String {
    hex::encode(Md5::digest(content.as_bytes()))
}

/// Computes every fingerprint field of `doc`.
///
/// Content carrying NUL bytes comes from a broken binary conversion and is
/// refused rather than hashed.
pub fn compute(doc: &Document) -> Result<Fingerprint> {
    if doc.content.contains('\0') {
        return Err(ScriptoriumError::validation(format!(
            "document {} has binary content",
            doc.id
        )));
    }

    let normalized = normalize_content(&doc.content);
    Ok(Fingerprint {
        document_id: doc.id,
        content_md5: content_md5(&doc.content),
        content_sha256: hex::encode(Sha256::digest(doc.content.as_bytes())),
        normalized_content_md5: hex::encode(Md5::digest(normalized.as_bytes())),
        title_soundex: doc.title.as_deref().map(title_key).unwrap_or_default(),
        author_soundex: doc.author.as_deref().map(author_codes).unwrap_or_default(),
        simhash_64: simhash(&normalized),
        word_count: doc.content.split_whitespace().count(),
        computed_at: Utc::now(),
    })
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub chunk_size: usize,
    /// Worker threads; 0 lets rayon pick one per core.
    pub workers: usize,
    pub restart: bool,
}

impl From<&FingerprintConfig> for GenerateOptions {
    fn from(config: &FingerprintConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            workers: config.workers,
            restart: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Counters {
    processed: usize,
    written: usize,
    unchanged: usize,
    failed: usize,
    chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateSummary {
    pub scope: Scope,
    pub processed: usize,
    pub written: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub chunks: usize,
    pub resumed: bool,
    pub elapsed_ms: u128,
    /// Documents per second over this invocation.
    pub rate: f64,
}

enum Outcome {
    Unchanged,
    Computed(Fingerprint),
    Failed(DocumentId, ScriptoriumError),
}

pub struct FingerprintGenerator<'a> {
    conn: &'a mut Connection,
    pool: rayon::ThreadPool,
}

impl<'a> FingerprintGenerator<'a> {
    pub fn new(conn: &'a mut Connection, workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| ScriptoriumError::ConfigError(format!("fingerprint worker pool: {e}")))?;
        Ok(Self { conn, pool })
    }

    /// Fingerprints every document in `scope`, one write transaction per chunk.
    /// Unchanged content is skipped; documents that fail are logged and counted.
    pub fn run(&mut self, scope: Scope, options: &GenerateOptions) -> Result<GenerateSummary> {
        if options.chunk_size == 0 {
            return Err(ScriptoriumError::validation("chunk size must be positive"));
        }
        let started = Instant::now();

        let (mut progress, mut counters, resumed) = {
            let jobs = JobRepository::new(&*self.conn);
            match jobs.get(FINGERPRINT_JOB, scope)? {
                Some(progress) if !options.restart => {
                    let counters = match serde_json::from_value::<Counters>(progress.state.clone()) {
                        Ok(counters) => counters,
                        Err(e) => {
                            tracing::warn!(%scope, error = %e, "unreadable fingerprint progress, counting from zero");
                            Counters::default()
                        }
                    };
                    tracing::info!(%scope, cursor = progress.cursor, "resuming fingerprint generation");
                    (progress, counters, true)
                }
                _ => {
                    let progress = jobs.start(FINGERPRINT_JOB, scope, 0, serde_json::to_value(Counters::default())?)?;
                    (progress, Counters::default(), false)
                }
            }
        };
        let processed_before = counters.processed;

        loop {
            let tx = self.conn.transaction()?;
            let docs = SqliteDocumentStore::new(&tx).list_scope(scope, progress.cursor, options.chunk_size)?;
            let last_chunk = docs.len() < options.chunk_size;

            if let (Some(first), Some(last)) = (docs.first(), docs.last()) {
                let stored = FingerprintRepository::new(&tx).content_hashes_between(first.id, last.id)?;
                let outcomes = self.pool.install(|| compute_chunk(&docs, &stored));

                let fingerprints = FingerprintRepository::new(&tx);
                for outcome in outcomes {
                    match outcome {
                        Outcome::Unchanged => counters.unchanged += 1,
                        Outcome::Computed(fingerprint) => {
                            fingerprints.save(&fingerprint)?;
                            counters.written += 1;
                        }
                        Outcome::Failed(document_id, e) => {
                            tracing::warn!(document_id, error = %e, "skipping document that cannot be fingerprinted");
                            // A stale fingerprint would keep matching content the document no longer has.
                            if fingerprints.delete(&document_id)? {
                                tracing::debug!(document_id, "dropped stale fingerprint");
                            }
                            counters.failed += 1;
                        }
                    }
                }
                counters.processed += docs.len();
                counters.chunks += 1;
                JobRepository::new(&tx).advance(&mut progress, last.id, serde_json::to_value(&counters)?)?;
                tracing::debug!(%scope, cursor = last.id, processed = counters.processed, "fingerprint chunk committed");
            }

            if last_chunk {
                JobRepository::new(&tx).clear(FINGERPRINT_JOB, scope)?;
                tx.commit()?;
                break;
            }
            tx.commit()?;
        }

        let elapsed = started.elapsed();
        let this_run = counters.processed - processed_before;
        let rate = if elapsed.as_secs_f64() > 0.0 {
            this_run as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        tracing::info!(
            %scope,
            processed = counters.processed,
            written = counters.written,
            failed = counters.failed,
            "fingerprint generation complete"
        );

        Ok(GenerateSummary {
            scope,
            processed: counters.processed,
            written: counters.written,
            unchanged: counters.unchanged,
            failed: counters.failed,
            chunks: counters.chunks,
            resumed,
            elapsed_ms: elapsed.as_millis(),
            rate,
        })
    }
}

fn compute_chunk(docs: &[Document], stored: &HashMap<DocumentId, String>) -> Vec<Outcome> {
    docs.par_iter()
        .map(|doc| {
            if stored.get(&doc.id).is_some_and(|hash| *hash == content_md5(&doc.content)) {
                return Outcome::Unchanged;
            }
            match compute(doc) {
                Ok(fingerprint) => Outcome::Computed(fingerprint),
                Err(e) => Outcome::Failed(doc.id, e),
            }
        })
        .collect()
}
