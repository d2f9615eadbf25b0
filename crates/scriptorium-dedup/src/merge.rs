//! Cluster Merge Engine.
//!
//! A merge runs in one `BEGIN IMMEDIATE` transaction: tombstones are written
//! before anything is deleted, tags are unioned into the canonical, removed
//! documents and their fingerprints are deleted, and the result is verified
//! before commit. Any failure rolls the whole merge back.

use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use uuid::Uuid;

use scriptorium_core::config::MergeConfig;
use scriptorium_core::{
    Cluster, ClusterRepository, Document, DocumentId, DocumentStore, FingerprintRepository, MergeAction,
    MergeLogEntry, MergeLogRepository, Repository, Result, ReviewStatus, ScriptoriumError, SqliteDocumentStore,
    Tombstone, TombstoneRepository,
};

/// What the merge policy allows for a cluster's confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    AutoMerge,
    NeedsReview,
    NotActionable,
}

impl Verdict {
    pub fn for_confidence(confidence: f64, config: &MergeConfig) -> Self {
        if confidence > config.auto_merge_threshold {
            Self::AutoMerge
        } else if confidence >= config.review_threshold {
            Self::NeedsReview
        } else {
            Self::NotActionable
        }
    }
}

/// Number of filled metadata fields; the canonical choice prefers the highest.
pub fn completeness(doc: &Document) -> usize {
    [doc.title.as_deref(), doc.author.as_deref(), doc.publication_date.as_deref()]
        .into_iter()
        .flatten()
        .filter(|v| !v.trim().is_empty())
        .count()
}

/// Most complete document, lowest id on ties.
pub fn choose_canonical(docs: &[Document]) -> Option<DocumentId> {
    docs.iter()
        .max_by(|a, b| completeness(a).cmp(&completeness(b)).then(b.id.cmp(&a.id)))
        .map(|doc| doc.id)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberInfo {
    pub document_id: DocumentId,
    pub live: bool,
    pub is_canonical: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterInfo {
    pub cluster: Cluster,
    pub verdict: Verdict,
    pub suggested_canonical: Option<DocumentId>,
    pub members: Vec<MemberInfo>,
    pub history: Vec<MergeLogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeOutcome {
    pub merge_id: Uuid,
    pub cluster_id: i64,
    pub canonical: DocumentId,
    pub removed: Vec<DocumentId>,
    /// Members neither kept nor removed, detached from the cluster.
    pub detached: Vec<DocumentId>,
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoMergeFailure {
    pub cluster_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AutoMergeSummary {
    pub eligible: usize,
    pub merged: Vec<MergeOutcome>,
    /// Clusters with fewer than two live members.
    pub skipped: Vec<i64>,
    pub failed: Vec<AutoMergeFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackOutcome {
    pub merge_id: Uuid,
    pub cluster_id: i64,
    pub canonical: DocumentId,
    pub restored: Vec<DocumentId>,
}

pub struct MergeEngine<'a> {
    conn: &'a mut Connection,
    config: MergeConfig,
}

impl<'a> MergeEngine<'a> {
    pub fn new(conn: &'a mut Connection, config: MergeConfig) -> Self {
        Self { conn, config }
    }

    fn begin(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Refuses clusters that already carry a final decision.
    fn ensure_open(cluster: &Cluster) -> Result<()> {
        match cluster.review_status {
            ReviewStatus::Merged => Err(ScriptoriumError::conflict(format!(
                "cluster {} is already merged",
                cluster.id
            ))),
            ReviewStatus::FalsePositive => Err(ScriptoriumError::conflict(format!(
                "cluster {} was rejected as a false positive",
                cluster.id
            ))),
            ReviewStatus::Pending | ReviewStatus::Confirmed => Ok(()),
        }
    }

    fn ensure_actionable(cluster: &Cluster, config: &MergeConfig) -> Result<()> {
        if Verdict::for_confidence(cluster.confidence, config) == Verdict::NotActionable {
            return Err(ScriptoriumError::validation(format!(
                "cluster {} has confidence {:.2}, below the review threshold {:.2}",
                cluster.id, cluster.confidence, config.review_threshold
            )));
        }
        Ok(())
    }

    // ─── Read-only ─────────────────────────────────────────

    pub fn info(&self, cluster_id: i64) -> Result<ClusterInfo> {
        let conn = &*self.conn;
        let clusters = ClusterRepository::new(conn);
        let store = SqliteDocumentStore::new(conn);

        let cluster = clusters.get(cluster_id)?;
        let mut members = Vec::new();
        let mut live = Vec::new();
        for member in clusters.members(cluster_id)? {
            let document = store.find_by_id(&member.document_id)?;
            if let Some(doc) = &document {
                live.push(doc.clone());
            }
            members.push(MemberInfo {
                document_id: member.document_id,
                live: document.is_some(),
                is_canonical: member.is_canonical,
                document,
            });
        }

        Ok(ClusterInfo {
            verdict: Verdict::for_confidence(cluster.confidence, &self.config),
            suggested_canonical: cluster.canonical_document_id.or_else(|| choose_canonical(&live)),
            history: MergeLogRepository::new(conn).for_cluster(cluster_id)?,
            cluster,
            members,
        })
    }

    pub fn list(&self, status: Option<ReviewStatus>, limit: usize) -> Result<Vec<Cluster>> {
        ClusterRepository::new(&*self.conn).list(status, limit)
    }

    // ─── Merge ─────────────────────────────────────────────

    /// Merges `remove` into `canonical`. Without `remove`, every other live
    /// member is removed; with it, unlisted members are detached instead.
    pub fn merge(
        &mut self,
        cluster_id: i64,
        canonical: DocumentId,
        remove: Option<&[DocumentId]>,
    ) -> Result<MergeOutcome> {
        let config = self.config.clone();
        let tx = self.begin()?;
        let cluster = ClusterRepository::new(&tx).get(cluster_id)?;
        Self::ensure_open(&cluster)?;
        Self::ensure_actionable(&cluster, &config)?;
        if let (ReviewStatus::Confirmed, Some(confirmed)) = (cluster.review_status, cluster.canonical_document_id) {
            if confirmed != canonical {
                return Err(ScriptoriumError::conflict(format!(
                    "cluster {cluster_id} was confirmed with canonical {confirmed}, not {canonical}"
                )));
            }
        }

        let outcome = apply_merge(&tx, &config, &cluster, canonical, remove, MergeAction::Merge)?;
        tx.commit()?;
        tracing::info!(cluster_id, canonical, removed = ?outcome.removed, "cluster merged");
        Ok(outcome)
    }

    /// Merges every pending cluster above the auto-merge threshold, or only
    /// `cluster_id`, each in its own transaction.
    pub fn auto_merge(&mut self, cluster_id: Option<i64>) -> Result<AutoMergeSummary> {
        let config = self.config.clone();
        let targets = match cluster_id {
            Some(id) => {
                let cluster = ClusterRepository::new(&*self.conn).get(id)?;
                Self::ensure_open(&cluster)?;
                if Verdict::for_confidence(cluster.confidence, &config) != Verdict::AutoMerge {
                    return Err(ScriptoriumError::validation(format!(
                        "cluster {id} has confidence {:.2}, not above the auto-merge threshold {:.2}",
                        cluster.confidence, config.auto_merge_threshold
                    )));
                }
                vec![cluster]
            }
            None => ClusterRepository::new(&*self.conn).pending_above(config.auto_merge_threshold)?,
        };

        let mut summary = AutoMergeSummary {
            eligible: targets.len(),
            ..AutoMergeSummary::default()
        };
        for target in targets {
            match self.auto_merge_one(target.id, &config) {
                Ok(Some(outcome)) => summary.merged.push(outcome),
                Ok(None) => summary.skipped.push(target.id),
                Err(e) if cluster_id.is_some() => return Err(e),
                Err(e) => {
                    tracing::warn!(cluster_id = target.id, error = %e, "auto-merge failed");
                    summary.failed.push(AutoMergeFailure {
                        cluster_id: target.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            eligible = summary.eligible,
            merged = summary.merged.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "auto-merge complete"
        );
        Ok(summary)
    }

    fn auto_merge_one(&mut self, cluster_id: i64, config: &MergeConfig) -> Result<Option<MergeOutcome>> {
        let tx = self.begin()?;
        let cluster = ClusterRepository::new(&tx).get(cluster_id)?;
        Self::ensure_open(&cluster)?;

        let live = live_members(&tx, cluster_id)?;
        if live.len() < 2 {
            return Ok(None);
        }
        let Some(canonical) = choose_canonical(&live) else {
            return Ok(None);
        };

        let outcome = apply_merge(&tx, config, &cluster, canonical, None, MergeAction::AutoMerge)?;
        tx.commit()?;
        tracing::info!(cluster_id, canonical, removed = ?outcome.removed, "cluster auto-merged");
        Ok(Some(outcome))
    }

    // ─── Review decisions ──────────────────────────────────

    /// Records that the cluster is a true duplicate set with `canonical` to keep.
    pub fn confirm(&mut self, cluster_id: i64, canonical: DocumentId) -> Result<Cluster> {
        let config = self.config.clone();
        let tx = self.begin()?;
        let clusters = ClusterRepository::new(&tx);
        let cluster = clusters.get(cluster_id)?;
        Self::ensure_open(&cluster)?;
        Self::ensure_actionable(&cluster, &config)?;

        if !clusters.members(cluster_id)?.iter().any(|m| m.document_id == canonical) {
            return Err(ScriptoriumError::validation(format!(
                "document {canonical} is not a member of cluster {cluster_id}"
            )));
        }
        SqliteDocumentStore::new(&tx).get(canonical)?;

        clusters.set_status(cluster_id, ReviewStatus::Confirmed, Some(canonical))?;
        log_decision(&tx, cluster_id, MergeAction::Confirm, Some(canonical), serde_json::json!({}))?;
        let confirmed = clusters.get(cluster_id)?;
        tx.commit()?;
        tracing::info!(cluster_id, canonical, "cluster confirmed");
        Ok(confirmed)
    }

    /// Marks the cluster as a false positive so detection never re-creates it.
    pub fn reject(&mut self, cluster_id: i64, reason: Option<&str>) -> Result<Cluster> {
        let tx = self.begin()?;
        let clusters = ClusterRepository::new(&tx);
        let cluster = clusters.get(cluster_id)?;
        Self::ensure_open(&cluster)?;

        clusters.set_status(cluster_id, ReviewStatus::FalsePositive, None)?;
        log_decision(
            &tx,
            cluster_id,
            MergeAction::FalsePositive,
            None,
            serde_json::json!({ "reason": reason }),
        )?;
        let rejected = clusters.get(cluster_id)?;
        tx.commit()?;
        tracing::info!(cluster_id, "cluster rejected as false positive");
        Ok(rejected)
    }

    // ─── Rollback ──────────────────────────────────────────

    /// Restores the documents removed by the cluster's latest merge and the
    /// canonical's previous tags, and returns the cluster to `pending`.
    pub fn rollback(&mut self, cluster_id: i64) -> Result<RollbackOutcome> {
        let now = Utc::now();
        let tx = self.begin()?;
        let clusters = ClusterRepository::new(&tx);
        let log = MergeLogRepository::new(&tx);
        let tombstones = TombstoneRepository::new(&tx);
        let store = SqliteDocumentStore::new(&tx);

        let cluster = clusters.get(cluster_id)?;
        if cluster.review_status != ReviewStatus::Merged {
            return Err(ScriptoriumError::conflict(format!(
                "cluster {cluster_id} is {}, not merged",
                cluster.review_status
            )));
        }
        let entry = log
            .latest_active_merge(cluster_id)?
            .ok_or_else(|| ScriptoriumError::conflict(format!("cluster {cluster_id} has no reversible merge")))?;
        let canonical = entry.canonical_document_id.ok_or_else(|| {
            ScriptoriumError::Integrity(format!("merge {} has no canonical document", entry.id))
        })?;

        let stones = tombstones.for_merge(&entry.id)?;
        if stones.len() != entry.removed_ids.len() || stones.iter().any(|t| t.expires_at < now) {
            return Err(ScriptoriumError::conflict(format!(
                "tombstones of merge {} have expired",
                entry.id
            )));
        }

        let mut restored = Vec::with_capacity(stones.len());
        for stone in &stones {
            if store.exists(stone.document_id)? {
                return Err(ScriptoriumError::conflict(format!(
                    "document {} exists again; cannot restore it",
                    stone.document_id
                )));
            }
            store.save(&stone.snapshot)?;
            restored.push(stone.document_id);
        }
        if let Some(before) = &entry.snapshot_before {
            store.replace_tags(canonical, before)?;
        }
        for document_id in detached_ids(&entry.payload) {
            clusters.attach(cluster_id, document_id)?;
        }

        clusters.set_status(cluster_id, ReviewStatus::Pending, None)?;
        log.mark_reversed(&entry.id)?;
        tombstones.delete_for_merge(&entry.id)?;
        log_decision(
            &tx,
            cluster_id,
            MergeAction::Rollback,
            Some(canonical),
            serde_json::json!({ "merge_id": entry.id, "restored": restored }),
        )?;
        tx.commit()?;

        tracing::info!(cluster_id, merge_id = %entry.id, restored = ?restored, "merge rolled back");
        Ok(RollbackOutcome {
            merge_id: entry.id,
            cluster_id,
            canonical,
            restored,
        })
    }

    /// Deletes tombstones past their grace period; their merges become final.
    pub fn purge_tombstones(&mut self) -> Result<usize> {
        let purged = TombstoneRepository::new(&*self.conn).purge_expired(Utc::now())?;
        tracing::info!(purged, "expired tombstones purged");
        Ok(purged)
    }
}

fn live_members(tx: &Transaction<'_>, cluster_id: i64) -> Result<Vec<Document>> {
    let store = SqliteDocumentStore::new(tx);
    let mut live = Vec::new();
    for member in ClusterRepository::new(tx).members(cluster_id)? {
        if let Some(doc) = store.find_by_id(&member.document_id)? {
            live.push(doc);
        }
    }
    Ok(live)
}

fn detached_ids(payload: &serde_json::Value) -> Vec<DocumentId> {
    payload
        .get("detached")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn log_decision(
    tx: &Transaction<'_>,
    cluster_id: i64,
    action: MergeAction,
    canonical: Option<DocumentId>,
    payload: serde_json::Value,
) -> Result<()> {
    MergeLogRepository::new(tx).insert(&MergeLogEntry {
        id: Uuid::now_v7(),
        cluster_id,
        action,
        canonical_document_id: canonical,
        removed_ids: Vec::new(),
        payload,
        snapshot_before: None,
        created_at: Utc::now(),
        reversed: false,
    })
}

/// The merge proper, inside the caller's transaction. The cluster has already
/// been checked to be open.
fn apply_merge(
    tx: &Transaction<'_>,
    config: &MergeConfig,
    cluster: &Cluster,
    canonical: DocumentId,
    remove: Option<&[DocumentId]>,
    action: MergeAction,
) -> Result<MergeOutcome> {
    let clusters = ClusterRepository::new(tx);
    let store = SqliteDocumentStore::new(tx);
    let members: BTreeSet<DocumentId> = clusters.members(cluster.id)?.iter().map(|m| m.document_id).collect();

    let remove: Vec<DocumentId> = match remove {
        Some([]) => return Err(ScriptoriumError::validation("no documents to remove")),
        Some(ids) => ids.to_vec(),
        None => {
            let mut others = Vec::new();
            for id in members.iter().copied().filter(|id| *id != canonical) {
                if store.exists(id)? {
                    others.push(id);
                }
            }
            others
        }
    };

    // Membership and distinctness.
    for id in std::iter::once(&canonical).chain(&remove) {
        if !members.contains(id) {
            return Err(ScriptoriumError::validation(format!(
                "document {id} is not a member of cluster {}",
                cluster.id
            )));
        }
    }
    let distinct: BTreeSet<DocumentId> = remove.iter().copied().collect();
    if distinct.len() != remove.len() || distinct.contains(&canonical) {
        return Err(ScriptoriumError::validation(
            "canonical and removed documents must be distinct",
        ));
    }
    if remove.is_empty() {
        return Err(ScriptoriumError::validation(format!(
            "cluster {} has no other live member to merge",
            cluster.id
        )));
    }

    let kept = store.get(canonical)?;
    let removed_docs = remove.iter().map(|id| store.get(*id)).collect::<Result<Vec<_>>>()?;

    let now = Utc::now();
    let merge_id = Uuid::now_v7();
    let expires_at = now + Duration::days(config.tombstone_grace_days);

    let tombstones = TombstoneRepository::new(tx);
    for doc in &removed_docs {
        tombstones.insert(&Tombstone {
            id: Uuid::now_v7(),
            cluster_id: cluster.id,
            merge_id,
            document_id: doc.id,
            merged_into: canonical,
            snapshot: doc.clone(),
            created_at: now,
            expires_at,
        })?;
    }

    let incoming: BTreeSet<String> = removed_docs.iter().flat_map(|d| d.tags.iter().cloned()).collect();
    let tags = store.union_tags(canonical, &incoming)?;

    let fingerprints = FingerprintRepository::new(tx);
    for id in &remove {
        if !store.delete(id)? {
            tracing::warn!(document_id = id, "removed document was not deleted");
        }
        fingerprints.delete(id)?;
    }

    let detached: Vec<DocumentId> = members
        .iter()
        .copied()
        .filter(|id| *id != canonical && !distinct.contains(id))
        .collect();
    for id in &detached {
        clusters.detach(cluster.id, *id)?;
    }

    clusters.set_status(cluster.id, ReviewStatus::Merged, Some(canonical))?;

    let added: BTreeSet<&String> = incoming.difference(&kept.tags).collect();
    MergeLogRepository::new(tx).insert(&MergeLogEntry {
        id: merge_id,
        cluster_id: cluster.id,
        action,
        canonical_document_id: Some(canonical),
        removed_ids: remove.clone(),
        payload: serde_json::json!({
            "confidence": cluster.confidence,
            "cluster_type": cluster.cluster_type,
            "detached": detached,
            "tags_added": added,
        }),
        snapshot_before: Some(kept.tags.clone()),
        created_at: now,
        reversed: false,
    })?;

    // Verification against what is now in the store.
    let stored_tags = store.get(canonical)?.tags;
    if !stored_tags.is_superset(&incoming) || !stored_tags.is_superset(&kept.tags) {
        return Err(ScriptoriumError::Integrity(format!(
            "canonical {canonical} is missing merged tags"
        )));
    }
    for id in &remove {
        if store.exists(*id)? {
            return Err(ScriptoriumError::Integrity(format!(
                "document {id} still exists after merge"
            )));
        }
    }

    Ok(MergeOutcome {
        merge_id,
        cluster_id: cluster.id,
        canonical,
        removed: remove,
        detached,
        tags,
    })
}
