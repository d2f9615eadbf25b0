//! Audit Ledger: per-document review state across rounds.
//!
//! Records move `pending → in_review → {fixed | reviewed | skipped}` (or
//! straight from `pending` to a terminal state). Terminal records are final
//! for their round and are never rescored or deleted.

use std::time::Instant;

use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScriptoriumError};
use crate::models::{
    AuditRecord, AuditRound, AuditStats, AuditStatus, Checkpoint, Document, DocumentId, Issue, MetadataUpdate,
    Scope, Source,
};
use crate::quality::{date_issue, Assessment, IssueDetector};
use crate::storage::repositories::{
    AuditRepository, DocumentStore, JobRepository, Repository, Scoring, SqliteDocumentStore,
};

/// Job name of the `init` progress token.
pub const INIT_JOB: &str = "audit_init";

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub chunk_size: usize,
    /// Discard a stale progress token and start a fresh round.
    pub restart: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            restart: false,
        }
    }
}

/// Counters carried in the progress token so a resumed run reports the whole round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct InitCounters {
    documents: usize,
    new_documents: usize,
    rescored: usize,
    preserved: usize,
    chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitSummary {
    pub scope: Scope,
    pub round: u32,
    pub documents: usize,
    pub new_documents: usize,
    pub rescored: usize,
    pub preserved: usize,
    pub chunks: usize,
    pub resumed: bool,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueItem {
    #[serde(flatten)]
    pub record: AuditRecord,
    pub source: Source,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Fixed,
    Reviewed,
    Skipped,
}

impl Decision {
    fn status(self) -> AuditStatus {
        match self {
            Self::Fixed => AuditStatus::Fixed,
            Self::Reviewed => AuditStatus::Reviewed,
            Self::Skipped => AuditStatus::Skipped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerStatus {
    pub scope: Scope,
    #[serde(flatten)]
    pub stats: AuditStats,
    pub rounds: usize,
    pub latest_round: u32,
    /// Completed `init` runs, oldest first.
    pub history: Vec<AuditRound>,
    pub checkpoints: usize,
}

pub struct AuditLedger<'a> {
    conn: &'a mut Connection,
    detector: IssueDetector,
    reviewer: Option<String>,
}

impl<'a> AuditLedger<'a> {
    pub fn new(conn: &'a mut Connection, detector: IssueDetector) -> Self {
        Self {
            conn,
            detector,
            reviewer: None,
        }
    }

    pub fn with_reviewer(mut self, reviewer: Option<String>) -> Self {
        self.reviewer = reviewer.filter(|r| !r.trim().is_empty());
        self
    }

    fn scoring(assessment: &Assessment) -> Scoring<'_> {
        Scoring {
            score: assessment.score,
            issues: &assessment.issues,
            artifacts: &assessment.artifacts,
        }
    }

    /// `explicit` when given, else the scope of the latest completed `init`.
    /// Either way the scope must have been initialised.
    pub fn current_scope(&self, explicit: Option<Scope>) -> Result<Scope> {
        let audit = AuditRepository::new(&*self.conn);
        let scope = match explicit {
            Some(scope) => scope,
            None => audit
                .latest_scope()?
                .ok_or_else(|| ScriptoriumError::ScopeNotInitialized("any".into()))?,
        };
        if audit.round_count(scope)? == 0 {
            return Err(ScriptoriumError::ScopeNotInitialized(scope.to_string()));
        }
        Ok(scope)
    }

    // ─── init ──────────────────────────────────────────────

    /// Scores every document in `scope` into a new round, one transaction per
    /// chunk. An interrupted run resumes from its progress token.
    pub fn init(&mut self, scope: Scope, options: &InitOptions) -> Result<InitSummary> {
        if options.chunk_size == 0 {
            return Err(ScriptoriumError::validation("chunk size must be positive"));
        }
        let started = Instant::now();

        let (mut progress, mut counters, resumed) = {
            let jobs = JobRepository::new(&*self.conn);
            let existing = jobs.get(INIT_JOB, scope)?;
            match existing {
                Some(_) if options.restart => {
                    jobs.clear(INIT_JOB, scope)?;
                    tracing::info!(%scope, "discarded stale init progress");
                    let round = AuditRepository::new(&*self.conn).latest_round(scope)? + 1;
                    let progress = jobs.start(INIT_JOB, scope, round, serde_json::to_value(InitCounters::default())?)?;
                    (progress, InitCounters::default(), false)
                }
                Some(progress) => {
                    let counters = match serde_json::from_value::<InitCounters>(progress.state.clone()) {
                        Ok(counters) => counters,
                        Err(e) => {
                            tracing::warn!(%scope, error = %e, "unreadable init progress, counting from zero");
                            InitCounters::default()
                        }
                    };
                    tracing::info!(%scope, round = progress.round, cursor = progress.cursor, "resuming init");
                    (progress, counters, true)
                }
                None => {
                    let round = AuditRepository::new(&*self.conn).latest_round(scope)? + 1;
                    let progress = jobs.start(INIT_JOB, scope, round, serde_json::to_value(InitCounters::default())?)?;
                    (progress, InitCounters::default(), false)
                }
            }
        };
        let round = progress.round;
        let total = SqliteDocumentStore::new(&*self.conn).count_scope(scope)?;
        tracing::info!(%scope, round, total, cursor = progress.cursor, "scoring documents");

        loop {
            let tx = self.conn.transaction()?;
            let docs = SqliteDocumentStore::new(&tx).list_scope(scope, progress.cursor, options.chunk_size)?;
            let last_chunk = docs.len() < options.chunk_size;

            if let (Some(first), Some(last)) = (docs.first(), docs.last()) {
                let audit = AuditRepository::new(&tx);
                let existing = audit.statuses_between(scope, first.id, last.id)?;

                for doc in &docs {
                    match existing.get(&doc.id) {
                        None => {
                            let assessment = self.detector.assess_document(doc);
                            audit.insert_pending(scope, round, doc.id, &Self::scoring(&assessment))?;
                            counters.new_documents += 1;
                        }
                        Some((record_id, status)) if !status.is_terminal() => {
                            let assessment = self.detector.assess_document(doc);
                            audit.rescore_active(*record_id, round, &Self::scoring(&assessment))?;
                            counters.rescored += 1;
                        }
                        Some(_) => counters.preserved += 1,
                    }
                }
                counters.documents += docs.len();
                counters.chunks += 1;
                JobRepository::new(&tx).advance(&mut progress, last.id, serde_json::to_value(&counters)?)?;
                tracing::debug!(%scope, round, cursor = last.id, documents = counters.documents, "init chunk committed");
            }

            if last_chunk {
                AuditRepository::new(&tx).record_round(&AuditRound {
                    scope,
                    round,
                    documents: counters.documents,
                    new_documents: counters.new_documents,
                    rescored: counters.rescored,
                    preserved: counters.preserved,
                    completed_at: Utc::now(),
                })?;
                JobRepository::new(&tx).clear(INIT_JOB, scope)?;
                tx.commit()?;
                break;
            }
            tx.commit()?;
        }

        tracing::info!(
            %scope,
            round,
            documents = counters.documents,
            new = counters.new_documents,
            rescored = counters.rescored,
            preserved = counters.preserved,
            "audit round complete"
        );

        Ok(InitSummary {
            scope,
            round,
            documents: counters.documents,
            new_documents: counters.new_documents,
            rescored: counters.rescored,
            preserved: counters.preserved,
            chunks: counters.chunks,
            resumed,
            elapsed_ms: started.elapsed().as_millis(),
        })
    }

    // ─── Review queue ──────────────────────────────────────

    /// Up to `count` open records, lowest score first. With `claim`, the
    /// returned pending records move to `in_review`.
    pub fn next(&mut self, scope: Scope, count: usize, max_score: Option<u8>, claim: bool) -> Result<Vec<QueueItem>> {
        if count == 0 {
            return Err(ScriptoriumError::validation("count must be at least 1"));
        }
        if max_score.is_some_and(|s| s > 100) {
            return Err(ScriptoriumError::validation("max score must be between 0 and 100"));
        }

        let tx = self.conn.transaction()?;
        let mut items = Vec::new();
        {
            let audit = AuditRepository::new(&tx);
            let store = SqliteDocumentStore::new(&tx);
            for mut record in audit.queue(scope, count, max_score)? {
                if claim && record.status == AuditStatus::Pending && audit.claim(record.id, self.reviewer.as_deref())? {
                    record.status = AuditStatus::InReview;
                    record.reviewer = self.reviewer.clone();
                }
                let doc = store.get(record.document_id)?;
                items.push(QueueItem {
                    title: doc.display_title().to_string(),
                    source: doc.source,
                    record,
                });
            }
        }
        tx.commit()?;
        Ok(items)
    }

    /// Closes `document_id`'s open record in `scope`. A terminal record is a
    /// conflict and stays unchanged; `Fixed` also rescores the document.
    pub fn mark(&mut self, scope: Scope, document_id: DocumentId, decision: Decision, notes: &str) -> Result<AuditRecord> {
        if notes.trim().is_empty() {
            return Err(ScriptoriumError::validation(match decision {
                Decision::Skipped => "a reason is required",
                _ => "notes are required",
            }));
        }

        let tx = self.conn.transaction()?;
        let record = {
            let audit = AuditRepository::new(&tx);
            let record = audit.latest_for_document(scope, document_id)?.ok_or_else(|| {
                ScriptoriumError::RecordNotFound(format!("document {document_id} in scope '{scope}'"))
            })?;
            if record.status.is_terminal() {
                return Err(ScriptoriumError::conflict(format!(
                    "document {document_id} is already {} in round {}",
                    record.status, record.round
                )));
            }

            if decision == Decision::Fixed {
                if let Some(doc) = SqliteDocumentStore::new(&tx).find_by_id(&document_id)? {
                    let assessment = self.detector.assess_document(&doc);
                    audit.update_score(record.id, &Self::scoring(&assessment))?;
                }
            }

            if !audit.transition(record.id, decision.status(), self.reviewer.as_deref(), Some(notes.trim()), Utc::now())? {
                return Err(ScriptoriumError::conflict(format!(
                    "document {document_id} was closed concurrently"
                )));
            }
            audit
                .find(record.id)?
                .ok_or_else(|| ScriptoriumError::RecordNotFound(record.id.to_string()))?
        };
        tx.commit()?;

        tracing::info!(%scope, document_id, status = %record.status, "audit record closed");
        Ok(record)
    }

    /// Metadata fix through the Document Store; the date must be well formed.
    pub fn edit(&mut self, document_id: DocumentId, update: &MetadataUpdate) -> Result<Document> {
        if update.is_empty() {
            return Err(ScriptoriumError::validation("nothing to edit: pass --author, --date or --title"));
        }
        if let Some(date) = update.publication_date.as_deref().filter(|d| !d.trim().is_empty()) {
            if let Some(issue @ (Issue::MalformedDate { .. } | Issue::ImpossibleDate { .. })) =
                date_issue(date, self.detector.config())
            {
                return Err(ScriptoriumError::validation(issue.message()));
            }
        }

        let tx = self.conn.transaction()?;
        let doc = SqliteDocumentStore::new(&tx).update_metadata(document_id, update)?;
        tx.commit()?;
        tracing::info!(document_id, "metadata updated");
        Ok(doc)
    }

    // ─── Aggregates & checkpoints ──────────────────────────

    pub fn status(&self, scope: Scope) -> Result<LedgerStatus> {
        let audit = AuditRepository::new(&*self.conn);
        let history = audit.rounds(scope)?;
        Ok(LedgerStatus {
            scope,
            stats: audit.stats(scope)?,
            rounds: history.len(),
            latest_round: audit.latest_round(scope)?,
            history,
            checkpoints: audit.list_checkpoints(scope)?.len(),
        })
    }

    pub fn finalize_round(&mut self, scope: Scope, name: &str, notes: Option<&str>) -> Result<Checkpoint> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ScriptoriumError::validation("checkpoint name must not be empty"));
        }

        let tx = self.conn.transaction()?;
        let checkpoint = {
            let audit = AuditRepository::new(&tx);
            let stats = audit.stats(scope)?;
            let round = audit.latest_round(scope)?;
            audit.insert_checkpoint(scope, round, name, &stats, notes)?
        };
        tx.commit()?;
        tracing::info!(%scope, name, round = checkpoint.round_number, "checkpoint created");
        Ok(checkpoint)
    }

    pub fn checkpoints(&self, scope: Scope) -> Result<Vec<Checkpoint>> {
        AuditRepository::new(&*self.conn).list_checkpoints(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::DetectorConfig;
    use crate::storage::database::Database;
    use chrono::NaiveDate;

    const LIBRARY: Scope = Scope::Source(Source::Library);

    fn detector() -> IssueDetector {
        IssueDetector::new(DetectorConfig::new(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()))
    }

    fn words(n: usize) -> String {
        vec!["mutual"; n].join(" ")
    }

    /// Three library documents with distinct scores plus one archive document.
    fn seed(conn: &Connection) {
        let store = SqliteDocumentStore::new(conn);
        // 100 - 40 (author) - 30 (date) - 10 (content) = 20
        store.save(&Document::new(1, Source::Library).with_title("Fields, Factories").with_content(words(50))).unwrap();
        // 100 - 30 (date) = 70
        store
            .save(&Document::new(2, Source::Library).with_title("Mutual Aid").with_author("Peter Kropotkin").with_content(words(150)))
            .unwrap();
        // 100 - 40 (author) - 30 (date) - 10 (content) = 20
        store.save(&Document::new(3, Source::Library).with_title("Words").with_content(words(10))).unwrap();
        store.save(&Document::new(4, Source::Archive).with_title("Elsewhere")).unwrap();
    }

    fn ledger(conn: &mut Connection) -> AuditLedger<'_> {
        AuditLedger::new(conn, detector()).with_reviewer(Some("ana".into()))
    }

    #[test]
    fn test_init_scores_scope_and_next_orders_queue() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connection();
        seed(&conn);
        let mut ledger = ledger(&mut conn);

        let summary = ledger.init(LIBRARY, &InitOptions { chunk_size: 2, restart: false }).unwrap();
        assert_eq!(summary.round, 1);
        assert_eq!(summary.documents, 3);
        assert_eq!(summary.new_documents, 3);
        assert_eq!(summary.chunks, 2);

        let queue = ledger.next(LIBRARY, 10, None, false).unwrap();
        let order: Vec<_> = queue.iter().map(|q| (q.record.document_id, q.record.quality_score)).collect();
        assert_eq!(order, vec![(1, 20), (3, 20), (2, 70)]);

        let capped = ledger.next(LIBRARY, 10, Some(50), false).unwrap();
        assert_eq!(capped.len(), 2);
        assert!(capped.iter().all(|q| q.record.status == AuditStatus::Pending));
    }

    #[test]
    fn test_next_with_claim_moves_to_in_review() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connection();
        seed(&conn);
        let mut ledger = ledger(&mut conn);
        ledger.init(LIBRARY, &InitOptions::default()).unwrap();

        let claimed = ledger.next(LIBRARY, 1, None, true).unwrap();
        assert_eq!(claimed[0].record.status, AuditStatus::InReview);

        let stats = ledger.status(LIBRARY).unwrap().stats;
        assert_eq!(stats.in_review, 1);
        assert_eq!(stats.pending, 2);
    }

    #[test]
    fn test_init_resumes_with_unreadable_progress() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connection();
        seed(&conn);
        {
            let jobs = JobRepository::new(&conn);
            let mut progress = jobs.start(INIT_JOB, LIBRARY, 1, serde_json::json!({})).unwrap();
            jobs.advance(&mut progress, 1, serde_json::json!("garbled")).unwrap();
        }

        let summary = ledger(&mut conn).init(LIBRARY, &InitOptions::default()).unwrap();
        assert!(summary.resumed);
        assert_eq!((summary.round, summary.documents, summary.new_documents), (1, 2, 2));
    }

    #[test]
    fn test_scenario_d_second_init_changes_only_round_count() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connection();
        seed(&conn);
        let mut ledger = ledger(&mut conn);

        ledger.init(LIBRARY, &InitOptions::default()).unwrap();
        ledger.mark(LIBRARY, 2, Decision::Reviewed, "looks fine").unwrap();
        let before = ledger.status(LIBRARY).unwrap();

        let second = ledger.init(LIBRARY, &InitOptions::default()).unwrap();
        let after = ledger.status(LIBRARY).unwrap();

        assert_eq!(second.round, 2);
        assert_eq!(second.new_documents, 0);
        assert_eq!(second.rescored, 2);
        assert_eq!(second.preserved, 1);
        assert_eq!(after.stats, before.stats);
        assert_eq!(after.rounds, before.rounds + 1);
        let history: Vec<_> = after.history.iter().map(|r| (r.round, r.rescored, r.preserved)).collect();
        assert_eq!(history, vec![(1, 0, 0), (2, 2, 1)]);
    }

    #[test]
    fn test_mark_terminal_is_conflict_and_unchanged() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connection();
        seed(&conn);
        let mut ledger = ledger(&mut conn);
        ledger.init(LIBRARY, &InitOptions::default()).unwrap();

        let skipped = ledger.mark(LIBRARY, 3, Decision::Skipped, "stub page").unwrap();
        assert_eq!(skipped.status, AuditStatus::Skipped);
        assert_eq!(skipped.reviewer.as_deref(), Some("ana"));

        let err = ledger.mark(LIBRARY, 3, Decision::Fixed, "try again").unwrap_err();
        assert!(matches!(err, ScriptoriumError::Conflict(_)));

        let again = ledger.next(LIBRARY, 10, None, false).unwrap();
        assert!(again.iter().all(|q| q.record.document_id != 3));
        assert_eq!(ledger.status(LIBRARY).unwrap().stats.skipped, 1);

        let missing = ledger.mark(LIBRARY, 99, Decision::Reviewed, "x").unwrap_err();
        assert!(matches!(missing, ScriptoriumError::RecordNotFound(_)));
        assert!(ledger.mark(LIBRARY, 1, Decision::Reviewed, "  ").is_err());
    }

    #[test]
    fn test_mark_fixed_rescores_after_edit() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connection();
        seed(&conn);
        let mut ledger = ledger(&mut conn);
        ledger.init(LIBRARY, &InitOptions::default()).unwrap();

        ledger
            .edit(2, &MetadataUpdate { publication_date: Some("1902".into()), ..Default::default() })
            .unwrap();
        let fixed = ledger.mark(LIBRARY, 2, Decision::Fixed, "added date").unwrap();

        assert_eq!(fixed.status, AuditStatus::Fixed);
        assert_eq!(fixed.quality_score, 100);
        assert!(fixed.issues.is_empty());
    }

    #[test]
    fn test_edit_rejects_bad_dates() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connection();
        seed(&conn);
        let mut ledger = ledger(&mut conn);

        let bad = MetadataUpdate { publication_date: Some("1902-02-30".into()), ..Default::default() };
        assert!(matches!(ledger.edit(2, &bad), Err(ScriptoriumError::Validation(_))));
        let garbled = MetadataUpdate { publication_date: Some("spring 1902".into()), ..Default::default() };
        assert!(matches!(ledger.edit(2, &garbled), Err(ScriptoriumError::Validation(_))));
        assert!(matches!(ledger.edit(2, &MetadataUpdate::default()), Err(ScriptoriumError::Validation(_))));
        assert!(matches!(
            ledger.edit(42, &MetadataUpdate { title: Some("x".into()), ..Default::default() }),
            Err(ScriptoriumError::DocumentNotFound(42))
        ));
    }

    #[test]
    fn test_scope_resolution() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connection();
        seed(&conn);
        let mut ledger = ledger(&mut conn);

        assert!(matches!(ledger.current_scope(None), Err(ScriptoriumError::ScopeNotInitialized(_))));

        ledger.init(LIBRARY, &InitOptions::default()).unwrap();
        ledger.init(Scope::All, &InitOptions::default()).unwrap();
        assert_eq!(ledger.current_scope(None).unwrap(), Scope::All);
        assert_eq!(ledger.current_scope(Some(LIBRARY)).unwrap(), LIBRARY);
        assert!(ledger.current_scope(Some(Scope::Source(Source::Texts))).is_err());
        assert_eq!(ledger.next(Scope::All, 10, None, false).unwrap().len(), 4);
    }

    #[test]
    fn test_init_resumes_from_progress_token() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connection();
        seed(&conn);

        // Simulate a run interrupted after committing document 1.
        {
            let jobs = JobRepository::new(&conn);
            let mut progress = jobs.start(INIT_JOB, LIBRARY, 1, serde_json::json!({})).unwrap();
            let counters = InitCounters { documents: 1, new_documents: 1, chunks: 1, ..Default::default() };
            let doc = SqliteDocumentStore::new(&conn).get(1).unwrap();
            let assessment = detector().assess_document(&doc);
            AuditRepository::new(&conn)
                .insert_pending(LIBRARY, 1, 1, &AuditLedger::scoring(&assessment))
                .unwrap();
            jobs.advance(&mut progress, 1, serde_json::to_value(&counters).unwrap()).unwrap();
        }

        let mut ledger = ledger(&mut conn);
        let summary = ledger.init(LIBRARY, &InitOptions::default()).unwrap();
        assert!(summary.resumed);
        assert_eq!(summary.round, 1);
        assert_eq!(summary.documents, 3);
        assert_eq!(summary.new_documents, 3);
        assert_eq!(ledger.status(LIBRARY).unwrap().stats.total, 3);
        assert!(JobRepository::new(&*ledger.conn).get(INIT_JOB, LIBRARY).unwrap().is_none());
    }

    #[test]
    fn test_finalize_round_checkpoint() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connection();
        seed(&conn);
        let mut ledger = ledger(&mut conn);
        ledger.init(LIBRARY, &InitOptions::default()).unwrap();
        ledger.mark(LIBRARY, 1, Decision::Fixed, "done").unwrap();

        let checkpoint = ledger.finalize_round(LIBRARY, "round-1", Some("first sweep")).unwrap();
        assert_eq!(checkpoint.round_number, 1);
        assert_eq!(checkpoint.stats.fixed, 1);
        assert_eq!(checkpoint.stats.total, 3);

        let dup = ledger.finalize_round(LIBRARY, "round-1", None).unwrap_err();
        assert!(matches!(dup, ScriptoriumError::Conflict(_)));
        assert_eq!(ledger.checkpoints(LIBRARY).unwrap().len(), 1);
    }
}
