//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::DateArgs;
use crate::api;
use crate::config::Config;
use chrono::{DateTime, Utc};
use evalsys_core::{
    EvalGroupId, EvaluationChange, EvaluationDraft, EvaluationId, EvaluationState, EvalsysError,
    HierarchyNode, ModificationPolicy, NodeId, Permission, Session, Snapshot, UserId,
    derive_state,
    formats::{snapshot_checksum, snapshot_crypto_hash, snapshot_from_bytes, snapshot_to_bytes},
    primitives::KNOWN_PERMISSIONS,
};
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum snapshot file size for import (256 MB).
const MAX_IMPORT_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), EvalsysError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| EvalsysError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(EvalsysError::InvalidInput(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize an input path and require a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, EvalsysError> {
    let canonical = path.canonicalize().map_err(|e| {
        EvalsysError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(EvalsysError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Canonicalize the parent of an output path and require a directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, EvalsysError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        EvalsysError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(EvalsysError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| EvalsysError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// INPUT PARSING
// =============================================================================

/// Parse an RFC 3339 instant.
pub fn parse_instant(label: &str, value: &str) -> Result<DateTime<Utc>, EvalsysError> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| EvalsysError::InvalidInput(format!("Invalid {label} '{value}': {e}")))
}

fn parse_optional(label: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, EvalsysError> {
    value.map(|v| parse_instant(label, v)).transpose()
}

/// Parsed `(start, due, stop, view)`.
type Dates = [Option<DateTime<Utc>>; 4];

fn parse_dates(dates: &DateArgs) -> Result<Dates, EvalsysError> {
    Ok([
        parse_optional("start", dates.start.as_deref())?,
        parse_optional("due", dates.due.as_deref())?,
        parse_optional("stop", dates.stop.as_deref())?,
        parse_optional("view", dates.view.as_deref())?,
    ])
}

fn parse_node_list(nodes: &str) -> Result<Vec<NodeId>, EvalsysError> {
    nodes
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map(NodeId)
                .map_err(|_| EvalsysError::InvalidInput(format!("Invalid node id: {s}")))
        })
        .collect()
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn format_instant(instant: Option<DateTime<Utc>>) -> String {
    instant.map_or_else(|| "-".to_string(), |d| d.to_rfc3339())
}

// =============================================================================
// DATABASE
// =============================================================================

/// Storage backend selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// ACID redb database, written through on every mutation.
    Redb,
    /// Snapshot file, rewritten after every mutating command.
    File,
}

/// Database location and backend.
#[derive(Debug, Clone)]
pub struct Database {
    pub path: PathBuf,
    pub backend: Backend,
}

impl Database {
    pub fn new(path: PathBuf, backend: &str) -> Result<Self, EvalsysError> {
        let backend = match backend {
            "redb" => Backend::Redb,
            "file" => Backend::File,
            other => {
                return Err(EvalsysError::InvalidInput(format!(
                    "Unknown backend: {other}. Use: redb, file"
                )));
            }
        };
        Ok(Self { path, backend })
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Redb => "redb",
            Backend::File => "file",
        }
    }

    /// Load the session, creating an empty one if the database is missing.
    pub fn open(&self) -> Result<Session, EvalsysError> {
        match self.backend {
            Backend::Redb => Session::with_redb(&self.path),
            Backend::File => {
                if !self.path.exists() {
                    return Ok(Session::new());
                }
                validate_file_size(&self.path, MAX_IMPORT_FILE_SIZE)?;
                let data = std::fs::read(&self.path)
                    .map_err(|e| EvalsysError::IoError(format!("Read db: {}", e)))?;
                Ok(Session::from_snapshot(snapshot_from_bytes(&data)?))
            }
        }
    }

    /// Persist after a mutating command. Redb sessions already wrote through.
    pub fn save(&self, session: &Session) -> Result<(), EvalsysError> {
        if session.is_persistent() {
            return Ok(());
        }
        write_snapshot(&self.path, &session.snapshot())
    }
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), EvalsysError> {
    let data = snapshot_to_bytes(snapshot)?;
    std::fs::write(path, &data)
        .map_err(|e| EvalsysError::IoError(format!("Write snapshot: {}", e)))
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(
    db: &Database,
    config_path: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), EvalsysError> {
    let mut config = Config::load(config_path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let session = db.open()?;

    println!("Evalsys Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Address:  {}", config.bind_addr());
    println!("  Backend:  {}", db.backend_name());
    println!("  Database: {:?}", db.path);
    println!(
        "  Ticker:   {}",
        if config.notifications.enabled {
            format!("every {}s", config.notifications.tick_seconds)
        } else {
            "disabled".to_string()
        }
    );
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    api::run_server(&config, session).await
}

// =============================================================================
// STATUS / INIT
// =============================================================================

/// Show session counts.
pub fn cmd_status(db: &Database, json_mode: bool) -> Result<(), EvalsysError> {
    let session = db.open()?;
    let stats = session.stats();
    let next_job = session.scheduler().next_run_at();

    if json_mode {
        print_json(&serde_json::json!({
            "database": db.path.to_string_lossy(),
            "backend": db.backend_name(),
            "hierarchy_id": session.hierarchy().hierarchy_id(),
            "evaluations": stats.evaluations,
            "nodes": stats.nodes,
            "groups": stats.groups,
            "grants": stats.grants,
            "jobs": stats.jobs,
            "next_job_at": next_job,
        }));
        return Ok(());
    }

    println!("Evalsys Status");
    println!("==============");
    println!("Database:    {:?}", db.path);
    println!("Backend:     {}", db.backend_name());
    println!("Hierarchy:   {}", session.hierarchy().hierarchy_id());
    println!();
    println!("Evaluations: {}", stats.evaluations);
    println!("Nodes:       {}", stats.nodes);
    println!("Groups:      {}", stats.groups);
    println!("Grants:      {}", stats.grants);
    println!("Jobs:        {}", stats.jobs);
    println!("Next job:    {}", format_instant(next_job));

    Ok(())
}

/// Initialize a new database.
pub fn cmd_init(db: &Database, force: bool, hierarchy_id: &str) -> Result<(), EvalsysError> {
    if db.path.exists() {
        if !force {
            return Err(EvalsysError::InvalidState(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(&db.path)
            .map_err(|e| EvalsysError::IoError(format!("Remove existing db: {}", e)))?;
    }

    let empty = Session::with_hierarchy_id(hierarchy_id).snapshot();
    match db.backend {
        Backend::Redb => {
            let mut session = Session::with_redb(&db.path)?;
            session.restore(empty)?;
        }
        Backend::File => write_snapshot(&db.path, &empty)?,
    }
    println!(
        "Initialized new {} database at {:?} (hierarchy '{}')",
        db.backend_name(),
        db.path,
        hierarchy_id
    );

    Ok(())
}

// =============================================================================
// STATE / CHECK (no database)
// =============================================================================

/// Derive the lifecycle state from dates.
pub fn cmd_state(dates: &DateArgs, at: Option<&str>, json_mode: bool) -> Result<(), EvalsysError> {
    let [start, due, stop, view] = parse_dates(dates)?;
    let now = match at {
        Some(at) => parse_instant("at", at)?,
        None => Utc::now(),
    };
    let state = derive_state(now, start, due, stop, view);

    if json_mode {
        print_json(&serde_json::json!({
            "at": now,
            "state": state.name(),
            "accepts_responses": state.accepts_responses(),
        }));
    } else {
        println!("{} at {}", state, now.to_rfc3339());
        if state == EvaluationState::Unknown {
            println!("  (a lifecycle date is missing)");
        }
    }
    Ok(())
}

/// Look up the standard modification policy.
pub fn cmd_check(state: &str, field: &str, json_mode: bool) -> Result<(), EvalsysError> {
    let policy = ModificationPolicy::standard();
    let permitted = policy.is_modification_permitted_by_name(state, field);

    if json_mode {
        print_json(&serde_json::json!({
            "state": state,
            "field": field,
            "permitted": permitted,
        }));
    } else {
        let verdict = if permitted { "permitted" } else { "denied" };
        println!("{field} in {state}: {verdict}");
        if state.parse::<EvaluationState>().is_err() {
            println!("  (unknown state name: every field is permitted)");
        }
    }
    Ok(())
}

// =============================================================================
// EVALUATIONS
// =============================================================================

/// Create an evaluation.
pub fn cmd_create(
    db: &Database,
    json_mode: bool,
    title: &str,
    owner: &str,
    dates: &DateArgs,
    reminder_days: u32,
    results_private: bool,
) -> Result<(), EvalsysError> {
    let [start_date, due_date, stop_date, view_date] = parse_dates(dates)?;
    let draft = EvaluationDraft {
        title: title.to_string(),
        owner: UserId::new(owner),
        start_date,
        due_date,
        stop_date,
        view_date,
        reminder_days,
        results_private,
        ..EvaluationDraft::default()
    };

    let now = Utc::now();
    let mut session = db.open()?;
    let id = session.create_evaluation(draft, now)?;
    db.save(&session)?;

    let state = session.evaluation_state(id, now).unwrap_or(EvaluationState::Unknown);
    if json_mode {
        print_json(&serde_json::json!({ "id": id.0, "state": state.name() }));
    } else {
        println!("Created evaluation {} ({})", id, state);
    }
    Ok(())
}

/// Show an evaluation.
pub fn cmd_show(db: &Database, json_mode: bool, id: u64) -> Result<(), EvalsysError> {
    let session = db.open()?;
    let id = EvaluationId(id);
    let evaluation = session
        .evaluation(id)
        .ok_or(EvalsysError::EvaluationNotFound(id))?;
    let state = evaluation.state_at(Utc::now());

    if json_mode {
        print_json(&serde_json::json!({
            "evaluation": evaluation,
            "state": state.name(),
        }));
        return Ok(());
    }

    println!("Evaluation {}: {}", evaluation.id, evaluation.title);
    println!("  Owner:     {}", evaluation.owner);
    println!("  State:     {}", state);
    println!("  Start:     {}", format_instant(evaluation.start_date));
    println!("  Due:       {}", format_instant(evaluation.due_date));
    println!("  Stop:      {}", format_instant(evaluation.stop_date));
    println!("  View:      {}", format_instant(evaluation.view_date));
    println!("  Reminders: every {} days", evaluation.reminder_days);
    println!("  Groups:    {}", evaluation.assigned_groups.len());

    let editable: Vec<&str> = session
        .policy()
        .permitted_fields(state)
        .iter()
        .map(|f| f.as_str())
        .collect();
    println!("  Editable:  {}", editable.join(", "));
    Ok(())
}

/// Update evaluation fields through the modification policy.
pub fn cmd_update(
    db: &Database,
    json_mode: bool,
    id: u64,
    title: Option<String>,
    dates: &DateArgs,
    reminder_days: Option<u32>,
) -> Result<(), EvalsysError> {
    let [start, due, stop, view] = parse_dates(dates)?;

    let mut changes = Vec::new();
    if let Some(title) = title {
        changes.push(EvaluationChange::Title(title));
    }
    if start.is_some() {
        changes.push(EvaluationChange::StartDate(start));
    }
    if due.is_some() {
        changes.push(EvaluationChange::DueDate(due));
    }
    if stop.is_some() {
        changes.push(EvaluationChange::StopDate(stop));
    }
    if view.is_some() {
        changes.push(EvaluationChange::ViewDate(view));
    }
    if let Some(days) = reminder_days {
        changes.push(EvaluationChange::ReminderDays(days));
    }
    if changes.is_empty() {
        return Err(EvalsysError::InvalidInput("No changes given".to_string()));
    }

    let mut session = db.open()?;
    let outcome = session.update_evaluation(EvaluationId(id), &changes, Utc::now())?;
    db.save(&session)?;

    if json_mode {
        print_json(&serde_json::json!({
            "state": outcome.state.name(),
            "jobs": outcome.jobs,
        }));
    } else {
        println!("Updated evaluation {} ({})", id, outcome.state);
        for job in &outcome.jobs.scheduled {
            println!("  scheduled   {job}");
        }
        for job in &outcome.jobs.rescheduled {
            println!("  rescheduled {job}");
        }
        for job in &outcome.jobs.cancelled {
            println!("  cancelled   {job}");
        }
    }
    Ok(())
}

/// Delete an evaluation.
pub fn cmd_delete(db: &Database, id: u64) -> Result<(), EvalsysError> {
    let mut session = db.open()?;
    let removed = session.delete_evaluation(EvaluationId(id), Utc::now())?;
    db.save(&session)?;
    println!("Deleted evaluation {}: {}", removed.id, removed.title);
    Ok(())
}

/// Assign an evaluation to nodes.
pub fn cmd_assign(
    db: &Database,
    json_mode: bool,
    id: u64,
    nodes: &str,
) -> Result<(), EvalsysError> {
    let nodes = parse_node_list(nodes)?;
    let mut session = db.open()?;
    let added = session.assign_evaluation(EvaluationId(id), &nodes, &[], Utc::now())?;
    db.save(&session)?;

    if json_mode {
        print_json(&serde_json::json!({ "added_groups": added }));
    } else {
        println!("Assigned evaluation {} to {} new groups", id, added.len());
    }
    Ok(())
}

// =============================================================================
// HIERARCHY
// =============================================================================

/// Add a node, or the root when no parent is given.
pub fn cmd_node_add(
    db: &Database,
    title: &str,
    parent: Option<u64>,
    description: &str,
    token: Option<String>,
) -> Result<(), EvalsysError> {
    let mut session = db.open()?;
    let id = match parent {
        None => session.create_root(title, description)?,
        Some(parent) => session.add_node(NodeId(parent), title, description, token)?,
    };
    db.save(&session)?;
    println!("Added node {} '{}'", id, title);
    Ok(())
}

/// Replace a node's descriptive data.
pub fn cmd_node_update(
    db: &Database,
    node: u64,
    title: &str,
    description: &str,
    token: Option<String>,
) -> Result<(), EvalsysError> {
    let mut session = db.open()?;
    session.update_node(NodeId(node), title, description, token)?;
    db.save(&session)?;
    println!("Updated node {} '{}'", node, title);
    Ok(())
}

/// Move a node under a new parent.
pub fn cmd_node_move(db: &Database, node: u64, parent: u64) -> Result<(), EvalsysError> {
    let mut session = db.open()?;
    session.move_node(NodeId(node), NodeId(parent))?;
    db.save(&session)?;
    println!("Moved node {} under {}", node, parent);
    Ok(())
}

/// Add or remove one parent link.
pub fn cmd_node_link(
    db: &Database,
    node: u64,
    parent: u64,
    remove: bool,
) -> Result<(), EvalsysError> {
    let mut session = db.open()?;
    let changed = if remove {
        session.remove_parent(NodeId(node), NodeId(parent))?
    } else {
        session.add_parent(NodeId(node), NodeId(parent))?
    };
    db.save(&session)?;

    let action = if remove { "Unlinked" } else { "Linked" };
    if changed {
        println!("{action} node {node} and parent {parent}");
    } else {
        println!("No change: node {node} and parent {parent}");
    }
    Ok(())
}

fn print_subtree(session: &Session, node: &HierarchyNode, indent: usize) {
    let Some(id) = node.id else {
        return;
    };
    let groups = session
        .bindings()
        .node_groups(id)
        .map_or(0, std::collections::BTreeSet::len);
    println!("{:indent$}{} [{}] ({} groups)", "", node.title, id, groups, indent = indent);
    for child in session.access().child_nodes(id, true) {
        print_subtree(session, child, indent + 2);
    }
}

/// Print the hierarchy.
pub fn cmd_tree(db: &Database, json_mode: bool) -> Result<(), EvalsysError> {
    let session = db.open()?;
    let access = session.access();

    if json_mode {
        let nodes: Vec<&HierarchyNode> = session.hierarchy().iter().collect();
        print_json(&serde_json::json!({
            "hierarchy_id": session.hierarchy().hierarchy_id(),
            "nodes": nodes,
        }));
        return Ok(());
    }

    let root = access.root_node()?;
    print_subtree(&session, root, 0);
    Ok(())
}

/// List (and optionally attach) groups under a node.
pub fn cmd_groups(
    db: &Database,
    json_mode: bool,
    node: u64,
    attach: Option<&str>,
    direct: bool,
) -> Result<(), EvalsysError> {
    let node = NodeId(node);
    let mut session = db.open()?;

    if let Some(attach) = attach {
        let ids: Vec<EvalGroupId> = attach
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(EvalGroupId::new)
            .collect();
        session.attach_groups(node, &ids)?;
        db.save(&session)?;
    }

    let access = session.access();
    let groups = if direct {
        access.groups_under_node(node)
    } else {
        access.groups_in_subtree(node)
    };

    if json_mode {
        print_json(&serde_json::json!({ "node": node.0, "groups": groups }));
    } else {
        println!("Groups under node {} ({}):", node, groups.len());
        for group in &groups {
            println!("  {group}");
        }
    }
    Ok(())
}

/// Grant or revoke a permission.
pub fn cmd_grant(
    db: &Database,
    user: &str,
    node: u64,
    permission: &str,
    revoke: bool,
) -> Result<(), EvalsysError> {
    if !KNOWN_PERMISSIONS.contains(&permission) {
        tracing::warn!(permission, "Non-standard permission token");
    }
    let user = UserId::new(user);
    let node = NodeId(node);
    let permission = Permission::new(permission);

    let mut session = db.open()?;
    let changed = if revoke {
        session.revoke_permission(&user, node, &permission)?
    } else {
        session.grant_permission(user.clone(), node, permission.clone())?
    };
    db.save(&session)?;

    let action = if revoke { "Revoked" } else { "Granted" };
    if changed {
        println!("{action} '{permission}' for {user} at node {node}");
    } else {
        println!("No change: '{permission}' for {user} at node {node}");
    }
    Ok(())
}

// =============================================================================
// JOBS
// =============================================================================

/// List pending notification jobs.
pub fn cmd_jobs(db: &Database, json_mode: bool) -> Result<(), EvalsysError> {
    let session = db.open()?;
    let jobs = session.jobs();

    if json_mode {
        print_json(&serde_json::json!({ "jobs": jobs }));
        return Ok(());
    }

    println!("Pending jobs ({}):", jobs.len());
    for job in jobs {
        println!("  {}  {}", job.run_at.to_rfc3339(), job.id);
    }
    Ok(())
}

/// Drain jobs due now, as the server ticker does.
pub fn cmd_tick(db: &Database, json_mode: bool) -> Result<(), EvalsysError> {
    let mut session = db.open()?;
    let fired = session.take_due_notifications(Utc::now())?;
    db.save(&session)?;

    for job in &fired {
        tracing::info!(
            event = "notification",
            job_id = %job.id,
            evaluation_id = job.payload.evaluation_id.0,
            kind = %job.payload.kind,
            "Notification due"
        );
    }
    if json_mode {
        print_json(&serde_json::json!({ "fired": fired }));
    } else {
        println!("Fired {} notifications", fired.len());
    }
    Ok(())
}

// =============================================================================
// EXPORT / IMPORT / HASH
// =============================================================================

/// Export the session snapshot.
pub fn cmd_export(db: &Database, output: &Path, format: &str) -> Result<(), EvalsysError> {
    let validated_output = validate_output_path(output)?;
    let session = db.open()?;
    let snapshot = session.snapshot();

    let data = match format {
        "snapshot" => {
            println!("Checksum: {}", snapshot_checksum(&snapshot)?);
            snapshot_to_bytes(&snapshot)?
        }
        "json" => serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| EvalsysError::SerializationError(e.to_string()))?,
        _ => {
            return Err(EvalsysError::InvalidInput(format!(
                "Unknown format: {}. Use: snapshot, json",
                format
            )));
        }
    };

    std::fs::write(&validated_output, &data)
        .map_err(|e| EvalsysError::IoError(format!("Write file: {}", e)))?;
    println!("Exported {} bytes to {:?}", data.len(), validated_output);
    Ok(())
}

/// Import a session snapshot, replacing the current state.
pub fn cmd_import(db: &Database, input: &Path) -> Result<(), EvalsysError> {
    let validated_path = validate_file_path(input)?;
    validate_file_size(&validated_path, MAX_IMPORT_FILE_SIZE)?;

    let data = std::fs::read(&validated_path)
        .map_err(|e| EvalsysError::IoError(format!("Read file: {}", e)))?;
    let snapshot = snapshot_from_bytes(&data)?;

    let mut session = db.open()?;
    session.restore(snapshot)?;
    db.save(&session)?;

    let stats = session.stats();
    println!(
        "Imported snapshot: {} evaluations, {} nodes, {} jobs",
        stats.evaluations, stats.nodes, stats.jobs
    );
    Ok(())
}

/// Print the BLAKE3 hash of the session snapshot.
pub fn cmd_hash(db: &Database, json_mode: bool) -> Result<(), EvalsysError> {
    let session = db.open()?;
    let hash = snapshot_crypto_hash(&session.snapshot())?;

    if json_mode {
        print_json(&serde_json::json!({ "algorithm": "blake3", "hash": hash }));
    } else {
        println!("{hash}");
    }
    Ok(())
}

/// Compact the redb database file.
pub fn cmd_compact(db: &Database) -> Result<(), EvalsysError> {
    if matches!(db.backend, Backend::File) {
        return Err(EvalsysError::InvalidInput("compact requires the redb backend".to_string()));
    }
    let mut session = db.open()?;
    let reclaimed = session.compact()?;
    tracing::info!(path = %db.path.display(), reclaimed, "Database compacted");
    println!(
        "Compacted {:?}{}",
        db.path,
        if reclaimed { "" } else { " (nothing to reclaim)" }
    );
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
