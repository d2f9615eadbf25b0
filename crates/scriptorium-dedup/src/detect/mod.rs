//! Duplicate Detector: runs the selected layers over live fingerprints, joins
//! every edge in one disjoint-set pass and rewrites the pending clusters.

mod disjoint_set;
mod layers;

pub use layers::{exact_edges, fuzzy_edges, simhash_edges, Edge, Layer, LayerOutput, SkippedBucket};

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;

use rusqlite::Connection;
use serde::Serialize;

use scriptorium_core::config::DedupConfig;
use scriptorium_core::{
    ClusterRepository, ClusterType, DocumentId, FingerprintRepository, NewCluster, Result, ScriptoriumError,
    SqliteDocumentStore,
};

use disjoint_set::DisjointSet;

#[derive(Debug, Clone)]
pub struct DetectOptions {
    pub layers: BTreeSet<Layer>,
    /// Exact layer groups by raw SHA-256 instead of normalized MD5.
    pub strict: bool,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            layers: Layer::ALL.into_iter().collect(),
            strict: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionSummary {
    pub documents: usize,
    pub exact_edges: usize,
    pub fuzzy_edges: usize,
    pub simhash_edges: usize,
    pub clusters_written: usize,
    /// Pending clusters dropped before writing.
    pub pending_replaced: usize,
    /// Components matching an already reviewed cluster, not re-created.
    pub already_reviewed: usize,
    pub skipped_buckets: Vec<SkippedBucket>,
    pub elapsed_ms: u128,
}

/// Connected components of the edge graph with at least two members.
///
/// A component's confidence is its strongest edge; on equal confidence the
/// exact layer wins over fuzzy, fuzzy over near-duplicate.
pub fn cluster_edges(ids: &[DocumentId], edges: &[Edge]) -> Vec<NewCluster> {
    let index: HashMap<DocumentId, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let mut dsu = DisjointSet::new(ids.len());

    let linked: Vec<(usize, &Edge)> = edges
        .iter()
        .filter_map(|edge| {
            let left = *index.get(&edge.left)?;
            let right = *index.get(&edge.right)?;
            dsu.union(left, right);
            Some((left, edge))
        })
        .collect();

    let mut strongest: HashMap<usize, (f64, ClusterType)> = HashMap::new();
    for (left, edge) in linked {
        let root = dsu.find(left);
        let candidate = (edge.confidence, edge.cluster_type);
        strongest
            .entry(root)
            .and_modify(|best| {
                if candidate.0 > best.0
                    || (candidate.0 == best.0 && candidate.1.precedence() > best.1.precedence())
                {
                    *best = candidate;
                }
            })
            .or_insert(candidate);
    }

    let mut components: HashMap<usize, Vec<DocumentId>> = HashMap::new();
    for (idx, id) in ids.iter().enumerate() {
        let root = dsu.find(idx);
        if strongest.contains_key(&root) {
            components.entry(root).or_default().push(*id);
        }
    }

    let mut clusters: Vec<NewCluster> = components
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(root, mut members)| {
            members.sort_unstable();
            let (confidence, cluster_type) = strongest[&root];
            NewCluster {
                cluster_type,
                confidence,
                members,
            }
        })
        .collect();
    clusters.sort_by_key(|c| c.members[0]);
    clusters
}

pub struct DuplicateDetector<'a> {
    conn: &'a mut Connection,
    config: DedupConfig,
}

impl<'a> DuplicateDetector<'a> {
    pub fn new(conn: &'a mut Connection, config: DedupConfig) -> Self {
        Self { conn, config }
    }

    pub fn run(&mut self, options: &DetectOptions) -> Result<DetectionSummary> {
        if options.layers.is_empty() {
            return Err(ScriptoriumError::validation("select at least one detection layer"));
        }
        let started = Instant::now();

        let fingerprints = FingerprintRepository::new(&*self.conn).list_live()?;
        let titles = if options.layers.contains(&Layer::Fuzzy) {
            SqliteDocumentStore::new(&*self.conn).titles()?
        } else {
            HashMap::new()
        };

        let mut summary = DetectionSummary {
            documents: fingerprints.len(),
            ..DetectionSummary::default()
        };
        let mut edges = Vec::new();
        for layer in &options.layers {
            let output = match layer {
                Layer::Exact => exact_edges(&fingerprints, options.strict),
                Layer::Fuzzy => fuzzy_edges(&fingerprints, &titles, &self.config),
                Layer::Simhash => simhash_edges(&fingerprints, &self.config),
            };
            match layer {
                Layer::Exact => summary.exact_edges = output.edges.len(),
                Layer::Fuzzy => summary.fuzzy_edges = output.edges.len(),
                Layer::Simhash => summary.simhash_edges = output.edges.len(),
            }
            tracing::debug!(%layer, edges = output.edges.len(), skipped = output.skipped.len(), "layer finished");
            edges.extend(output.edges);
            summary.skipped_buckets.extend(output.skipped);
        }

        let ids: Vec<DocumentId> = fingerprints.iter().map(|fp| fp.document_id).collect();
        let clusters = cluster_edges(&ids, &edges);

        let tx = self.conn.transaction()?;
        {
            let repo = ClusterRepository::new(&tx);
            let reviewed: HashSet<BTreeSet<DocumentId>> = repo.reviewed_member_sets()?.into_iter().collect();
            summary.pending_replaced = repo.delete_pending()?;

            for cluster in &clusters {
                let members: BTreeSet<DocumentId> = cluster.members.iter().copied().collect();
                if reviewed.contains(&members) {
                    summary.already_reviewed += 1;
                    continue;
                }
                repo.insert(cluster)?;
                summary.clusters_written += 1;
            }
        }
        tx.commit()?;

        summary.elapsed_ms = started.elapsed().as_millis();
        tracing::info!(
            documents = summary.documents,
            clusters = summary.clusters_written,
            already_reviewed = summary.already_reviewed,
            skipped_buckets = summary.skipped_buckets.len(),
            "duplicate detection complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::compute;
    use scriptorium_core::{Database, Document, Repository, ReviewStatus, Source};

    fn body(n: usize) -> String {
        (0..n).map(|i| format!("commune{i}")).collect::<Vec<_>>().join(" ")
    }

    fn store(conn: &Connection, docs: &[Document]) {
        let documents = SqliteDocumentStore::new(conn);
        let fingerprints = FingerprintRepository::new(conn);
        for doc in docs {
            documents.save(doc).unwrap();
            fingerprints.save(&compute(doc).unwrap()).unwrap();
        }
    }

    fn only(layer: Layer) -> DetectOptions {
        DetectOptions {
            layers: BTreeSet::from([layer]),
            strict: false,
        }
    }

    fn edge(left: DocumentId, right: DocumentId, confidence: f64, cluster_type: ClusterType) -> Edge {
        Edge {
            left,
            right,
            confidence,
            cluster_type,
        }
    }

    #[test]
    fn test_cluster_edges_takes_strongest_edge() {
        let edges = [
            edge(1, 2, 0.90, ClusterType::NearDuplicate),
            edge(2, 3, 0.95, ClusterType::FuzzyMatch),
            edge(5, 6, 0.70, ClusterType::NearDuplicate),
            edge(6, 7, 0.70, ClusterType::FuzzyMatch),
        ];
        let clusters = cluster_edges(&[1, 2, 3, 4, 5, 6, 7], &edges);

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members, vec![1, 2, 3]);
        assert_eq!(
            (clusters[0].confidence, clusters[0].cluster_type),
            (0.95, ClusterType::FuzzyMatch)
        );
        assert_eq!(clusters[1].members, vec![5, 6, 7]);
        // Tie at 0.70 goes to the fuzzy layer.
        assert_eq!(clusters[1].cluster_type, ClusterType::FuzzyMatch);
    }

    #[test]
    fn test_scenario_b_punctuation_titles_exact_cluster() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connection();
        let content = body(80);
        store(
            &conn,
            &[
                Document::new(1, Source::Library)
                    .with_title("Anarchy: Its Philosophy")
                    .with_content(content.clone()),
                Document::new(2, Source::Archive)
                    .with_title("Anarchy -- Its Philosophy!")
                    .with_content(content.to_uppercase()),
                Document::new(3, Source::Texts).with_title("Unrelated").with_content(body(5)),
            ],
        );

        let summary = DuplicateDetector::new(&mut conn, DedupConfig::default())
            .run(&DetectOptions::default())
            .unwrap();
        assert_eq!(summary.clusters_written, 1);
        assert_eq!(summary.exact_edges, 1);

        let repo = ClusterRepository::new(&conn);
        let cluster = &repo.list(Some(ReviewStatus::Pending), 10).unwrap()[0];
        assert_eq!(cluster.confidence, 1.0);
        assert_eq!(cluster.cluster_type, ClusterType::ExactMatch);
        let members: Vec<_> = repo.members(cluster.id).unwrap().iter().map(|m| m.document_id).collect();
        assert_eq!(members, vec![1, 2]);
    }

    #[test]
    fn test_scenario_c_fuzzy_cluster_at_085() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connection();
        store(
            &conn,
            &[
                Document::new(10, Source::Library)
                    .with_title("Mikhail Bakunin — God and the State")
                    .with_author("Mikhail Bakunin")
                    .with_content("first scan of the pamphlet"),
                Document::new(11, Source::Texts)
                    .with_title("Bakunin, Mikhail: God and State")
                    .with_author("Bakunin, Mikhail")
                    .with_content("a different transcription entirely"),
            ],
        );

        DuplicateDetector::new(&mut conn, DedupConfig::default())
            .run(&only(Layer::Fuzzy))
            .unwrap();
        let clusters = ClusterRepository::new(&conn).list(None, 10).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].confidence, 0.85);
        assert_eq!(clusters[0].cluster_type, ClusterType::FuzzyMatch);
    }

    #[test]
    fn test_punctuation_only_difference_is_near_duplicate() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connection();
        let content = body(60);
        store(
            &conn,
            &[
                Document::new(1, Source::Library).with_content(content.clone()),
                Document::new(2, Source::Archive).with_content(content.replace(' ', ", ")),
            ],
        );

        let exact = DuplicateDetector::new(&mut conn, DedupConfig::default())
            .run(&only(Layer::Exact))
            .unwrap();
        assert_eq!(exact.clusters_written, 0);

        let near = DuplicateDetector::new(&mut conn, DedupConfig::default())
            .run(&only(Layer::Simhash))
            .unwrap();
        assert_eq!(near.clusters_written, 1);
        let cluster = &ClusterRepository::new(&conn).list(None, 10).unwrap()[0];
        assert_eq!((cluster.confidence, cluster.cluster_type), (0.90, ClusterType::NearDuplicate));
    }

    #[test]
    fn test_rerun_replaces_pending_and_keeps_reviewed() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connection();
        let content = body(80);
        store(
            &conn,
            &[
                Document::new(1, Source::Library).with_content(content.clone()),
                Document::new(2, Source::Library).with_content(content.clone()),
                Document::new(3, Source::Archive).with_content(body(70)),
                Document::new(4, Source::Archive).with_content(body(70)),
            ],
        );

        let first = DuplicateDetector::new(&mut conn, DedupConfig::default())
            .run(&only(Layer::Exact))
            .unwrap();
        assert_eq!(first.clusters_written, 2);

        let rejected = {
            let repo = ClusterRepository::new(&conn);
            let cluster = repo.list(None, 10).unwrap().into_iter().min_by_key(|c| c.id).unwrap();
            repo.set_status(cluster.id, ReviewStatus::FalsePositive, None).unwrap();
            cluster.id
        };

        let second = DuplicateDetector::new(&mut conn, DedupConfig::default())
            .run(&only(Layer::Exact))
            .unwrap();
        assert_eq!(second.pending_replaced, 1);
        assert_eq!(second.already_reviewed, 1);
        assert_eq!(second.clusters_written, 1);

        let repo = ClusterRepository::new(&conn);
        assert_eq!(repo.get(rejected).unwrap().review_status, ReviewStatus::FalsePositive);
        assert_eq!(repo.list(Some(ReviewStatus::Pending), 10).unwrap().len(), 1);
    }

    #[test]
    fn test_requires_a_layer() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connection();
        let options = DetectOptions {
            layers: BTreeSet::new(),
            strict: false,
        };
        let result = DuplicateDetector::new(&mut conn, DedupConfig::default()).run(&options);
        assert!(matches!(result, Err(ScriptoriumError::Validation(_))));
    }
}
