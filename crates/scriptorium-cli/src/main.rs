use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use serde::Serialize;

use scriptorium_core::ledger::{Decision, InitOptions};
use scriptorium_core::{
    AppConfig, AuditLedger, Database, DetectorConfig, DocumentId, ExitCode, IssueDetector, MetadataUpdate, ReviewStatus,
    Scope, ScriptoriumError, Source, SqliteDocumentStore,
};
use scriptorium_dedup::{
    DetectOptions, DuplicateDetector, FingerprintGenerator, GenerateOptions, Layer, MergeEngine, Verdict,
};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "scriptorium",
    about = "Corpus metadata audit and duplicate resolution",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format (for agents and scripts).
    /// Also enabled by setting SCRIPTORIUM_JSON=1.
    #[arg(long, global = true)]
    json: bool,

    /// Database file, overriding `core.database_path`.
    #[arg(long, global = true, env = "SCRIPTORIUM_DB")]
    db: Option<PathBuf>,

    /// Config file, overriding `~/.config/scriptorium/config.toml`.
    #[arg(long, global = true, env = "SCRIPTORIUM_CONFIG")]
    config: Option<PathBuf>,

    /// Name recorded on review decisions.
    #[arg(long, global = true, env = "USER")]
    reviewer: Option<String>,

    /// Log verbosity (-v info, -vv debug, -vvv trace). SCRIPTORIUM_LOG wins when set.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new audit round over a scope (resumes an interrupted one).
    Init {
        #[arg(long)]
        schema: Scope,
        /// Discard a stale progress token and start over.
        #[arg(long)]
        restart: bool,
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Show the worst-scored documents still awaiting review.
    Next {
        #[arg(long, default_value = "10")]
        count: usize,
        #[arg(long)]
        max_score: Option<u8>,
        #[arg(long)]
        schema: Option<Scope>,
        /// Move the returned records to `in_review`.
        #[arg(long)]
        claim: bool,
    },

    /// Record that a document's metadata was fixed.
    MarkFixed {
        id: DocumentId,
        #[arg(long, default_value = "")]
        notes: String,
        #[arg(long)]
        schema: Option<Scope>,
    },

    /// Record that a document was reviewed and is acceptable.
    MarkReviewed {
        id: DocumentId,
        #[arg(long, default_value = "")]
        notes: String,
        #[arg(long)]
        schema: Option<Scope>,
    },

    /// Skip a document for this round.
    MarkSkipped {
        id: DocumentId,
        #[arg(long, default_value = "")]
        reason: String,
        #[arg(long)]
        schema: Option<Scope>,
    },

    /// Aggregate audit status of a scope.
    Status {
        #[arg(long)]
        schema: Option<Scope>,
    },

    /// Freeze the current aggregates into a named checkpoint.
    FinalizeRound {
        #[arg(long)]
        name: String,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        schema: Option<Scope>,
    },

    /// List checkpoints of a scope.
    Checkpoints {
        #[arg(long)]
        schema: Option<Scope>,
    },

    /// Fix a document's metadata. An empty value clears the field.
    Edit {
        id: DocumentId,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },

    /// Load JSON-lines documents into a source collection.
    Import {
        #[arg(long)]
        source: Source,
        #[arg(long)]
        file: PathBuf,
    },

    /// Compute content fingerprints (resumable).
    GenerateFingerprints {
        /// library, archive, transcripts, texts or all.
        #[arg(long, default_value = "all")]
        source: Scope,
        #[arg(long)]
        restart: bool,
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Worker threads; 0 uses one per core.
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Group fingerprinted documents into duplicate clusters.
    DetectDuplicates {
        /// exact, fuzzy or simhash; repeat for several. Defaults to all three.
        #[arg(long, action = clap::ArgAction::Append)]
        layer: Vec<Layer>,
        /// Exact layer compares raw bytes instead of normalized content.
        #[arg(long)]
        strict: bool,
    },

    /// Review and resolve duplicate clusters.
    MergeDuplicates {
        #[command(subcommand)]
        action: MergeCommand,
    },
}

// ─── Merge Actions ──────────────────────────────────────────────────────────

#[derive(Subcommand)]
enum MergeCommand {
    /// Show a cluster, its members and the merge policy verdict.
    Info {
        #[arg(long)]
        cluster_id: i64,
    },

    /// Merge a cluster into the document to keep.
    Merge {
        #[arg(long)]
        cluster_id: i64,
        #[arg(long)]
        keep_canonical: DocumentId,
        /// Documents to remove; unlisted members are detached. Defaults to all others.
        #[arg(long, value_delimiter = ',')]
        remove_ids: Option<Vec<DocumentId>>,
    },

    /// Merge every pending cluster above the auto-merge threshold.
    AutoMerge {
        #[arg(long)]
        cluster_id: Option<i64>,
    },

    /// Confirm a cluster as a true duplicate set.
    Confirm {
        #[arg(long)]
        cluster_id: i64,
        #[arg(long)]
        keep_canonical: DocumentId,
    },

    /// Reject a cluster as a false positive.
    Reject {
        #[arg(long)]
        cluster_id: i64,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Undo the latest merge of a cluster while its tombstones are kept.
    Rollback {
        #[arg(long)]
        cluster_id: i64,
    },

    /// List clusters, highest confidence first.
    List {
        /// pending, confirmed, false_positive or merged.
        #[arg(long)]
        status: Option<ReviewStatus>,
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Delete tombstones past their grace period.
    PurgeTombstones,
}

// ─── Main ────────────────────────────────────────────────────────────────────

fn main() {
    let start = Instant::now();
    let cli = match parse_cli(std::env::args_os(), start) {
        Ok(cli) => cli,
        Err(code) => std::process::exit(code),
    };
    let json_output = cli.json || std::env::var("SCRIPTORIUM_JSON").as_deref() == Ok("1");

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("{e:#}");
    }

    if let Err(err) = run(cli, json_output, start) {
        std::process::exit(report_error(&err, json_output, start));
    }
}

/// Parses arguments, mapping usage errors onto the validation exit code.
/// `Err` carries the code to exit with; help and version exit 0.
fn parse_cli<I, T>(args: I, start: Instant) -> std::result::Result<Cli, i32>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let json_output = args.iter().any(|a| a == "--json") || std::env::var("SCRIPTORIUM_JSON").as_deref() == Ok("1");

    Cli::try_parse_from(args).map_err(|err| match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = err.print();
            ExitCode::Success as i32
        }
        _ if json_output => {
            let message = err.render().to_string();
            let usage = anyhow::Error::from(ScriptoriumError::validation(message.trim()));
            report_error(&usage, true, start)
        }
        _ => {
            let _ = err.print();
            ExitCode::InvalidArgs as i32
        }
    })
}

fn run(cli: Cli, json_output: bool, start: Instant) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(db) = &cli.db {
        config.core.database_path = db.to_string_lossy().to_string();
    }
    tracing::debug!(database = %config.database_path().display(), "configuration loaded");

    let db = open_db(&config)?;
    let mut conn = db.connection();

    match cli.command {
        // ── Audit ──────────────────────────────────────────────────────────
        Commands::Init { schema, restart, chunk_size } => {
            let options = InitOptions {
                chunk_size: chunk_size.unwrap_or(config.fingerprint.chunk_size),
                restart,
            };
            let mut ledger = AuditLedger::new(&mut conn, detector(&config)?).with_reviewer(cli.reviewer);
            let summary = ledger.init(schema, &options)?;

            if json_output {
                print_ok(&summary, start)?;
            } else {
                let resumed = if summary.resumed { " (resumed)" } else { "" };
                println!("Round {} of '{}' complete{resumed}:", summary.round, summary.scope);
                println!("  Documents:  {}", summary.documents);
                println!("  New:        {}", summary.new_documents);
                println!("  Rescored:   {}", summary.rescored);
                println!("  Preserved:  {}", summary.preserved);
                println!("  Chunks:     {}", summary.chunks);
            }
        }

        Commands::Next { count, max_score, schema, claim } => {
            let mut ledger = AuditLedger::new(&mut conn, detector(&config)?).with_reviewer(cli.reviewer);
            let scope = ledger.current_scope(schema)?;
            let items = ledger.next(scope, count, max_score, claim)?;

            if json_output {
                print_ok(&serde_json::json!({ "scope": scope, "items": items, "total": items.len() }), start)?;
            } else if items.is_empty() {
                println!("Nothing left to review in '{scope}'.");
            } else {
                for item in &items {
                    println!(
                        "{id:>8}  {score:>3}  {status:<9}  {source:<11}  {title}",
                        id = item.record.document_id,
                        score = item.record.quality_score,
                        status = item.record.status.to_string(),
                        source = item.source.to_string(),
                        title = item.title,
                    );
                    for issue in &item.record.issues {
                        println!("            - {}", issue.message());
                    }
                }
            }
        }

        Commands::MarkFixed { id, notes, schema } => {
            mark(&mut conn, &config, cli.reviewer, schema, id, Decision::Fixed, &notes, json_output, start)?;
        }
        Commands::MarkReviewed { id, notes, schema } => {
            mark(&mut conn, &config, cli.reviewer, schema, id, Decision::Reviewed, &notes, json_output, start)?;
        }
        Commands::MarkSkipped { id, reason, schema } => {
            mark(&mut conn, &config, cli.reviewer, schema, id, Decision::Skipped, &reason, json_output, start)?;
        }

        Commands::Status { schema } => {
            let ledger = AuditLedger::new(&mut conn, detector(&config)?);
            let scope = ledger.current_scope(schema)?;
            let status = ledger.status(scope)?;

            if json_output {
                print_ok(&status, start)?;
            } else {
                let stats = &status.stats;
                println!("Audit status of '{}' (round {}):", status.scope, status.latest_round);
                println!("  Total:      {}", stats.total);
                println!("  Pending:    {}", stats.pending);
                println!("  In review:  {}", stats.in_review);
                println!("  Fixed:      {}", stats.fixed);
                println!("  Reviewed:   {}", stats.reviewed);
                println!("  Skipped:    {}", stats.skipped);
                println!("  Avg score:  {:.1}", stats.avg_score);
                println!("  Rounds:     {}", status.rounds);
                println!("  Checkpoints: {}", status.checkpoints);
                for round in &status.history {
                    println!(
                        "    round {:>3}  {}  {} documents ({} new, {} rescored, {} preserved)",
                        round.round,
                        round.completed_at.format("%Y-%m-%d %H:%M"),
                        round.documents,
                        round.new_documents,
                        round.rescored,
                        round.preserved,
                    );
                }
            }
        }

        Commands::FinalizeRound { name, notes, schema } => {
            let mut ledger = AuditLedger::new(&mut conn, detector(&config)?);
            let scope = ledger.current_scope(schema)?;
            let checkpoint = ledger.finalize_round(scope, &name, notes.as_deref())?;

            if json_output {
                print_ok(&checkpoint, start)?;
            } else {
                println!(
                    "Checkpoint '{}' saved for '{}' round {} ({} records, avg score {:.1}).",
                    checkpoint.name, checkpoint.scope, checkpoint.round_number, checkpoint.stats.total,
                    checkpoint.stats.avg_score
                );
            }
        }

        Commands::Checkpoints { schema } => {
            let ledger = AuditLedger::new(&mut conn, detector(&config)?);
            let scope = ledger.current_scope(schema)?;
            let checkpoints = ledger.checkpoints(scope)?;

            if json_output {
                print_ok(&serde_json::json!({ "scope": scope, "items": checkpoints }), start)?;
            } else if checkpoints.is_empty() {
                println!("No checkpoints for '{scope}'.");
            } else {
                for cp in &checkpoints {
                    println!(
                        "  {name:<20}  round {round:<3}  {created}  fixed {fixed}, reviewed {reviewed}, skipped {skipped}",
                        name = cp.name,
                        round = cp.round_number,
                        created = cp.created_at.format("%Y-%m-%d %H:%M"),
                        fixed = cp.stats.fixed,
                        reviewed = cp.stats.reviewed,
                        skipped = cp.stats.skipped,
                    );
                }
            }
        }

        Commands::Edit { id, author, date, title } => {
            let update = MetadataUpdate {
                title,
                author,
                publication_date: date,
            };
            let mut ledger = AuditLedger::new(&mut conn, detector(&config)?);
            let doc = ledger.edit(id, &update)?;

            if json_output {
                print_ok(&serde_json::json!({ "id": doc.id, "metadata": doc.metadata() }), start)?;
            } else {
                println!("Updated {}: {}", doc.id, doc.display_title());
            }
        }

        Commands::Import { source, file } => {
            let reader = File::open(&file)
                .map(BufReader::new)
                .map_err(ScriptoriumError::from)
                .with_context(|| format!("cannot open {}", file.display()))?;
            let tx = conn.transaction().map_err(ScriptoriumError::from)?;
            let summary = SqliteDocumentStore::new(&tx).import_jsonl(source, reader)?;
            tx.commit().map_err(ScriptoriumError::from)?;
            tracing::info!(%source, imported = summary.imported, updated = summary.updated, failed = summary.failed, "import complete");

            if json_output {
                print_ok(&summary, start)?;
            } else {
                println!(
                    "Imported {} new, {} updated, {} failed into '{source}'.",
                    summary.imported, summary.updated, summary.failed
                );
            }
        }

        // ── Dedup ──────────────────────────────────────────────────────────
        Commands::GenerateFingerprints { source, restart, chunk_size, workers } => {
            let mut options = GenerateOptions::from(&config.fingerprint);
            options.restart = restart;
            if let Some(chunk_size) = chunk_size {
                options.chunk_size = chunk_size;
            }
            if let Some(workers) = workers {
                options.workers = workers;
            }
            let summary = FingerprintGenerator::new(&mut conn, options.workers)?.run(source, &options)?;

            if json_output {
                print_ok(&summary, start)?;
            } else {
                let resumed = if summary.resumed { " (resumed)" } else { "" };
                println!("Fingerprinted '{}'{resumed}:", summary.scope);
                println!("  Processed:  {}", summary.processed);
                println!("  Written:    {}", summary.written);
                println!("  Unchanged:  {}", summary.unchanged);
                println!("  Failed:     {}", summary.failed);
                println!("  Chunks:     {}", summary.chunks);
                println!("  Elapsed:    {}ms ({:.0} docs/s)", summary.elapsed_ms, summary.rate);
            }
        }

        Commands::DetectDuplicates { layer, strict } => {
            let options = DetectOptions {
                layers: if layer.is_empty() {
                    Layer::ALL.into_iter().collect()
                } else {
                    layer.into_iter().collect::<BTreeSet<_>>()
                },
                strict,
            };
            let summary = DuplicateDetector::new(&mut conn, config.dedup.clone()).run(&options)?;

            if json_output {
                print_ok(&summary, start)?;
            } else {
                println!("Scanned {} documents:", summary.documents);
                println!("  Exact edges:    {}", summary.exact_edges);
                println!("  Fuzzy edges:    {}", summary.fuzzy_edges);
                println!("  SimHash edges:  {}", summary.simhash_edges);
                println!("  Clusters:       {} ({} pending replaced)", summary.clusters_written, summary.pending_replaced);
                println!("  Already reviewed: {}", summary.already_reviewed);
                for bucket in &summary.skipped_buckets {
                    println!("  Skipped {} bucket {} ({} documents)", bucket.layer, bucket.key, bucket.size);
                }
            }
        }

        Commands::MergeDuplicates { action } => {
            let mut engine = MergeEngine::new(&mut conn, config.merge.clone());
            merge_duplicates(&mut engine, action, json_output, start)?;
        }
    }

    Ok(())
}

// ─── Commands ───────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn mark(
    conn: &mut rusqlite::Connection,
    config: &AppConfig,
    reviewer: Option<String>,
    schema: Option<Scope>,
    id: DocumentId,
    decision: Decision,
    notes: &str,
    json_output: bool,
    start: Instant,
) -> Result<()> {
    let mut ledger = AuditLedger::new(conn, detector(config)?).with_reviewer(reviewer);
    let scope = ledger.current_scope(schema)?;
    let record = ledger.mark(scope, id, decision, notes)?;

    if json_output {
        print_ok(&record, start)?;
    } else {
        println!(
            "Document {} marked {} (score {}).",
            record.document_id, record.status, record.quality_score
        );
    }
    Ok(())
}

fn merge_duplicates(engine: &mut MergeEngine<'_>, action: MergeCommand, json_output: bool, start: Instant) -> Result<()> {
    match action {
        MergeCommand::Info { cluster_id } => {
            let info = engine.info(cluster_id)?;
            if json_output {
                return print_ok(&info, start);
            }
            let cluster = &info.cluster;
            let verdict = match info.verdict {
                Verdict::AutoMerge => "eligible for auto-merge",
                Verdict::NeedsReview => "needs review",
                Verdict::NotActionable => "not actionable",
            };
            println!(
                "Cluster {} ({}, confidence {:.2}, {}): {verdict}",
                cluster.id, cluster.cluster_type, cluster.confidence, cluster.review_status
            );
            if let Some(id) = info.suggested_canonical {
                println!("  Canonical: {id}");
            }
            for member in &info.members {
                let marker = if member.is_canonical { "*" } else { " " };
                match &member.document {
                    Some(doc) => println!(
                        "  {marker}{:>8}  {:<11}  {}  [{}]",
                        doc.id,
                        doc.source.to_string(),
                        doc.display_title(),
                        doc.author.as_deref().unwrap_or("-")
                    ),
                    None => println!("  {marker}{:>8}  (removed)", member.document_id),
                }
            }
            for entry in &info.history {
                let reversed = if entry.reversed { " (reversed)" } else { "" };
                println!("  {}  {}{reversed}", entry.created_at.format("%Y-%m-%d %H:%M"), entry.action.as_str());
            }
        }

        MergeCommand::Merge { cluster_id, keep_canonical, remove_ids } => {
            let outcome = engine.merge(cluster_id, keep_canonical, remove_ids.as_deref())?;
            if json_output {
                return print_ok(&outcome, start);
            }
            println!(
                "Merged cluster {} into {}: removed {:?}, detached {:?}.",
                outcome.cluster_id, outcome.canonical, outcome.removed, outcome.detached
            );
            println!("  Merge id: {} (reversible with `rollback`)", outcome.merge_id);
        }

        MergeCommand::AutoMerge { cluster_id } => {
            let summary = engine.auto_merge(cluster_id)?;
            if json_output {
                return print_ok(&summary, start);
            }
            for outcome in &summary.merged {
                println!("  Merged cluster {} into {} (removed {:?})", outcome.cluster_id, outcome.canonical, outcome.removed);
            }
            for failure in &summary.failed {
                println!("  Failed cluster {}: {}", failure.cluster_id, failure.error);
            }
            println!(
                "Auto-merge: {} eligible, {} merged, {} skipped, {} failed.",
                summary.eligible,
                summary.merged.len(),
                summary.skipped.len(),
                summary.failed.len()
            );
        }

        MergeCommand::Confirm { cluster_id, keep_canonical } => {
            let cluster = engine.confirm(cluster_id, keep_canonical)?;
            if json_output {
                return print_ok(&cluster, start);
            }
            println!("Cluster {cluster_id} confirmed; canonical {keep_canonical}.");
        }

        MergeCommand::Reject { cluster_id, reason } => {
            let cluster = engine.reject(cluster_id, reason.as_deref())?;
            if json_output {
                return print_ok(&cluster, start);
            }
            println!("Cluster {cluster_id} marked as false positive.");
        }

        MergeCommand::Rollback { cluster_id } => {
            let outcome = engine.rollback(cluster_id)?;
            if json_output {
                return print_ok(&outcome, start);
            }
            println!(
                "Rolled back merge {} of cluster {}: restored {:?}.",
                outcome.merge_id, outcome.cluster_id, outcome.restored
            );
        }

        MergeCommand::List { status, limit } => {
            let clusters = engine.list(status, limit)?;
            if json_output {
                return print_ok(&serde_json::json!({ "items": clusters, "total": clusters.len() }), start);
            }
            if clusters.is_empty() {
                println!("No clusters.");
            }
            for cluster in &clusters {
                println!(
                    "{id:>6}  {confidence:.2}  {kind:<14}  {status}",
                    id = cluster.id,
                    confidence = cluster.confidence,
                    kind = cluster.cluster_type.to_string(),
                    status = cluster.review_status,
                );
            }
        }

        MergeCommand::PurgeTombstones => {
            let purged = engine.purge_tombstones()?;
            if json_output {
                return print_ok(&serde_json::json!({ "purged": purged }), start);
            }
            println!("Purged {purged} expired tombstone(s).");
        }
    }
    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn init_tracing(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_env("SCRIPTORIUM_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;
    Ok(())
}

fn detector(config: &AppConfig) -> Result<IssueDetector> {
    let today = Utc::now().date_naive();
    Ok(IssueDetector::new(DetectorConfig::from_scoring(&config.scoring, today)?))
}

fn open_db(config: &AppConfig) -> Result<Database> {
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(ScriptoriumError::from)?;
    }
    let timeout = Duration::from_millis(config.core.busy_timeout_ms);
    Ok(Database::open(&db_path, timeout)?)
}

fn print_ok<T: Serialize>(data: &T, start: Instant) -> Result<()> {
    let dur = start.elapsed().as_millis();
    print_json(&serde_json::json!({"status":"ok","data":data,"meta":{"duration_ms":dur}}))
}

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}

/// Prints the error and returns the process exit code for it.
fn report_error(err: &anyhow::Error, json_output: bool, start: Instant) -> i32 {
    let known = err.chain().find_map(|e| e.downcast_ref::<ScriptoriumError>());
    let (kind, code) = match known {
        Some(e) => (e.kind(), e.exit_code() as i32),
        None => ("error", ExitCode::GeneralError as i32),
    };

    if json_output {
        let dur = start.elapsed().as_millis();
        let envelope = serde_json::json!({
            "status": "error",
            "error": kind,
            "message": format!("{err:#}"),
            "meta": { "duration_ms": dur }
        });
        if print_json(&envelope).is_err() {
            eprintln!("{err:#}");
        }
    } else {
        eprintln!("error: {err:#}");
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use scriptorium_core::DocumentStore;
    use tempfile::TempDir;

    fn invoke(base: &[&str], args: &[&str]) -> Result<()> {
        let argv: Vec<&str> = ["scriptorium"].iter().chain(base).chain(args).copied().collect();
        run(Cli::try_parse_from(argv)?, true, Instant::now())
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_merge_remove_ids_are_comma_separated() {
        let cli = Cli::try_parse_from([
            "scriptorium",
            "merge-duplicates",
            "merge",
            "--cluster-id",
            "12",
            "--keep-canonical",
            "501",
            "--remove-ids",
            "502,503",
        ])
        .unwrap();
        match cli.command {
            Commands::MergeDuplicates {
                action: MergeCommand::Merge { cluster_id, keep_canonical, remove_ids },
            } => {
                assert_eq!(cluster_id, 12);
                assert_eq!(keep_canonical, 501);
                assert_eq!(remove_ids, Some(vec![502, 503]));
            }
            _ => panic!("parsed the wrong command"),
        }
    }

    #[test]
    fn test_layers_and_scopes_parse() {
        let cli = Cli::try_parse_from(["scriptorium", "--json", "detect-duplicates", "--layer", "exact", "--layer", "simhash"])
            .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::DetectDuplicates { layer, strict } => {
                assert_eq!(layer, vec![Layer::Exact, Layer::Simhash]);
                assert!(!strict);
            }
            _ => panic!("parsed the wrong command"),
        }

        assert!(Cli::try_parse_from(["scriptorium", "init", "--schema", "videos"]).is_err());
        assert!(Cli::try_parse_from(["scriptorium", "next", "--schema", "all", "--count", "5"]).is_ok());
    }

    #[test]
    fn test_error_envelope_exit_codes() {
        let start = Instant::now();
        let not_found = anyhow::Error::from(ScriptoriumError::ClusterNotFound(7));
        assert_eq!(report_error(&not_found, true, start), 2);

        let conflict = anyhow::Error::from(ScriptoriumError::conflict("merged")).context("merge-duplicates");
        assert_eq!(report_error(&conflict, false, start), 4);

        assert_eq!(report_error(&anyhow::anyhow!("boom"), false, start), 1);
    }

    #[test]
    fn test_usage_errors_exit_as_validation() {
        let start = Instant::now();
        let malformed = parse_cli(["scriptorium", "next", "--count", "abc"], start).err();
        assert_eq!(malformed, Some(ExitCode::InvalidArgs as i32));

        let bad_scope = parse_cli(["scriptorium", "--json", "init", "--schema", "videos"], start).err();
        assert_eq!(bad_scope, Some(ExitCode::InvalidArgs as i32));

        let not_found = report_error(&anyhow::Error::from(ScriptoriumError::ClusterNotFound(99)), false, start);
        assert_ne!(malformed, Some(not_found));

        assert_eq!(parse_cli(["scriptorium", "--help"], start).err(), Some(0));
        assert!(parse_cli(["scriptorium", "status"], start).is_ok());
    }

    #[test]
    fn test_import_detect_and_auto_merge() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("corpus.db");
        let config = dir.path().join("config.toml");
        let base = ["--db", db.to_str().unwrap(), "--config", config.to_str().unwrap()];

        let body = (0..80).map(|i| format!("liberty{i}")).collect::<Vec<_>>().join(" ");
        let records = [
            serde_json::json!({"id": 1, "title": "The Conquest of Bread", "author": "Peter Kropotkin", "content": body, "tags": ["economics"]}),
            serde_json::json!({"id": 2, "title": "Conquest of Bread", "content": body.to_uppercase(), "tags": ["classic"]}),
            serde_json::json!({"id": 3, "title": "Mutual Aid", "content": "short text"}),
        ];
        let file = dir.path().join("library.jsonl");
        let lines: Vec<String> = records.iter().map(|r| r.to_string()).collect();
        std::fs::write(&file, lines.join("\n")).unwrap();

        invoke(&base, &["import", "--source", "library", "--file", file.to_str().unwrap()]).unwrap();
        invoke(&base, &["generate-fingerprints"]).unwrap();
        invoke(&base, &["detect-duplicates"]).unwrap();
        invoke(&base, &["merge-duplicates", "auto-merge"]).unwrap();

        {
            let database = Database::open(&db, Duration::from_secs(1)).unwrap();
            let conn = database.connection();
            let store = SqliteDocumentStore::new(&conn);
            let kept = store.get(1).unwrap();
            assert_eq!(
                kept.tags,
                ["classic", "economics"].into_iter().map(String::from).collect::<BTreeSet<_>>()
            );
            assert!(!store.exists(2).unwrap());
            assert!(store.exists(3).unwrap());
        }

        let err = invoke(&base, &["merge-duplicates", "info", "--cluster-id", "99"]).unwrap_err();
        assert_eq!(report_error(&err, false, Instant::now()), 2);
    }
}
