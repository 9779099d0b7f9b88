//! Command-line front end for livecopy.
//!
//! Wires the SQLite stores and a filesystem asset directory into an
//! [`EditSession`] so edits can be buffered, persisted and published from a
//! shell or a deploy script. Every command prints a JSON document on stdout.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use livecopy_blobstore::FsBlobStore;
use livecopy_storage::{
    CaptionStore, ChangeStore, FallbackSnapshotStore, LocalSnapshotCache, SnapshotStore,
    SqliteStore,
};
use livecopy_sync::{EditSession, PublishReport, SyncConfig};
use livecopy_types::{ChangeKind, ProjectId, PublishedSnapshot};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "livecopy")]
#[command(about = "Buffer, persist and publish in-place site edits")]
pub struct Args {
    /// Path to a JSON sync configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database holding changes, snapshots and captions
    #[arg(long, global = true, default_value = "livecopy.db")]
    pub db: PathBuf,

    /// Directory promoted assets are written to
    #[arg(long, global = true, default_value = "assets")]
    pub assets: PathBuf,

    /// URL prefix the asset directory is served at
    #[arg(long, global = true, default_value = "/assets")]
    pub public_base: String,

    /// Mirror snapshots to JSON files in this directory
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Record one edit and persist it
    Edit {
        #[arg(long)]
        project: ProjectId,
        /// text, image or block
        #[arg(long)]
        kind: ChangeKind,
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
        /// Parse the value as JSON instead of taking it as a string
        #[arg(long)]
        json: bool,
    },

    /// Set the caption of an image
    Caption {
        #[arg(long)]
        project: ProjectId,
        /// Image key the caption belongs to
        #[arg(long)]
        key: String,
        #[arg(long)]
        text: String,
    },

    /// Merge persisted edits into the published snapshot
    Publish {
        #[arg(long)]
        project: ProjectId,
        /// Delete persisted edits and captions after publishing
        #[arg(long)]
        clear: bool,
    },

    /// Show persisted edits and the published snapshot
    Status {
        #[arg(long)]
        project: ProjectId,
    },
}

/// Reads the sync configuration, or the defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    let Some(path) = path else {
        return Ok(SyncConfig::default());
    };
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read config {}", path.display()))?;
    let config = serde_json::from_slice(&bytes)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Stores opened from the command-line options.
struct Backend {
    store: Arc<SqliteStore>,
    snapshots: Arc<dyn SnapshotStore>,
    blobs: Arc<FsBlobStore>,
}

impl Backend {
    fn open(args: &Args, config: &SyncConfig) -> Result<Self> {
        if let Some(parent) = args.db.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let store = Arc::new(
            SqliteStore::open(&args.db)
                .with_context(|| format!("Failed to open database {}", args.db.display()))?,
        );

        let snapshots: Arc<dyn SnapshotStore> = match &args.cache_dir {
            Some(dir) => Arc::new(FallbackSnapshotStore::new(
                store.clone(),
                LocalSnapshotCache::new(dir),
            )),
            None => store.clone(),
        };

        let blobs = Arc::new(FsBlobStore::with_policy(
            &args.assets,
            args.public_base.clone(),
            config.asset_policy.clone(),
        ));

        Ok(Self {
            store,
            snapshots,
            blobs,
        })
    }

    fn session(&self, project: ProjectId, config: SyncConfig) -> Result<EditSession> {
        let session = EditSession::builder(project)
            .config(config)
            .stores(self.store.clone())
            .snapshots(self.snapshots.clone())
            .blobs(self.blobs.clone())
            .build()?;
        Ok(session)
    }
}

/// Runs one command and returns the document to print.
pub async fn run(args: &Args) -> Result<Value> {
    let config = load_config(args.config.as_deref())?;
    let backend = Backend::open(args, &config)?;

    match &args.command {
        Command::Edit {
            project,
            kind,
            key,
            value,
            json,
        } => {
            let value = if *json {
                serde_json::from_str(value).context("--value is not valid JSON")?
            } else {
                Value::String(value.clone())
            };
            let session = backend.session(project.clone(), config)?;
            let accepted = session.enqueue_edit(*kind, key.clone(), value);
            let report = session.flush_now().await;
            session.shutdown();

            if let Some(failure) = report.failed.first() {
                bail!("Failed to save {} {}: {}", failure.kind, failure.key, failure.reason);
            }
            info!("Saved {} edit(s) for {}", report.persisted, project);
            Ok(json!({
                "project": project.as_str(),
                "accepted": accepted,
                "persisted": report.persisted,
                "remaining": report.remaining,
            }))
        }

        Command::Caption { project, key, text } => {
            backend
                .store
                .set_caption(project, key, text)
                .await
                .context("Failed to save caption")?;
            Ok(json!({
                "project": project.as_str(),
                "key": key,
                "caption": text,
            }))
        }

        Command::Publish { project, clear } => {
            let preserve = config.preserve_local_edits && !clear;
            let session = backend.session(project.clone(), config)?;
            let report = session
                .publisher()
                .publish(project, preserve)
                .await
                .with_context(|| format!("Failed to publish {project}"))?;
            session.shutdown();
            Ok(publish_summary(&report))
        }

        Command::Status { project } => {
            let changes = backend
                .store
                .list_changes(project)
                .await
                .context("Failed to read persisted changes")?;
            let snapshot = backend
                .snapshots
                .get_snapshot(project)
                .await
                .context("Failed to read published snapshot")?;
            let captions = backend
                .store
                .list_captions(project)
                .await
                .context("Failed to read captions")?;
            Ok(json!({
                "project": project.as_str(),
                "pending_changes": changes.len(),
                "captions": captions.len(),
                "snapshot": snapshot_json(snapshot.as_ref())?,
            }))
        }
    }
}

fn snapshot_json(snapshot: Option<&PublishedSnapshot>) -> Result<Value> {
    match snapshot {
        Some(snapshot) => Ok(serde_json::to_value(snapshot)?),
        None => Ok(Value::Null),
    }
}

fn publish_summary(report: &PublishReport) -> Value {
    json!({
        "project": report.snapshot.project_id.as_str(),
        "published_at": report.snapshot.published_at.as_millis(),
        "text": report.snapshot.text_content.len(),
        "images": report.snapshot.image_replacements.len(),
        "sections": report.snapshot.content_blocks.len(),
        "promoted": report.promoted,
        "failed": report
            .failed
            .iter()
            .map(|f| json!({ "kind": f.kind.as_str(), "key": f.key, "reason": f.reason }))
            .collect::<Vec<_>>(),
        "filtered": report.filtered,
        "collected": report.collected.deleted,
        "cleared_local_edits": report.cleared_local_edits,
    })
}
