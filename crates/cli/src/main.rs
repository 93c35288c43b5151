use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use state_crdt::{
    spawn_tracker, CrdtKind, SequenceIdGenerator, StateTracker, SyncPayload, TrackerConfig,
    UserId,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "state-crdt-cli")]
#[command(about = "Replay and inspect per-user field state merges")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a script of add/remove/synchronize steps against one tracker
    Replay {
        /// Merge policy (FIRST_WRITER_WINS, LAST_WRITER_WINS, LAST_WRITER_WINS_NULLABLE, SET)
        #[arg(short, long)]
        kind: CrdtKind,

        /// Field name to track
        #[arg(short, long)]
        field: String,

        /// User whose state is tracked
        #[arg(short, long)]
        user: String,

        /// Tracker configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Generate operation ids PREFIX-1, PREFIX-2, ... instead of random ones
        #[arg(long, value_name = "PREFIX")]
        deterministic_ids: Option<String>,

        /// Script file: JSON array of steps
        script: PathBuf,
    },

    /// Check that a synchronize payload is well-formed for one (user, field) pair
    CheckPayload {
        /// Payload file (JSON)
        payload: PathBuf,

        /// User to look up
        #[arg(short, long)]
        user: String,

        /// Field to look up
        #[arg(short, long)]
        field: String,
    },
}

/// One step of a replay script
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum ScriptStep {
    Add { value: Value },
    Remove { value: Value },
    Synchronize { payload: SyncPayload<Value> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence
    let default_filter = if cli.verbose {
        "state_crdt=debug,state_crdt_cli=debug"
    } else {
        "state_crdt=info,state_crdt_cli=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let lines = match cli.command {
        Commands::Replay {
            kind,
            field,
            user,
            config,
            deterministic_ids,
            script,
        } => {
            replay_command(
                kind,
                field,
                UserId::new(user),
                config,
                deterministic_ids,
                &script,
            )
            .await?
        }
        Commands::CheckPayload {
            payload,
            user,
            field,
        } => vec![check_payload_command(&payload, &UserId::new(user), &field)?],
    };

    for line in lines {
        println!("{}", line);
    }

    Ok(())
}

/// Run every script step through a tracker worker; returns one JSON line per
/// change report followed by the final value
async fn replay_command(
    kind: CrdtKind,
    field: String,
    user: UserId,
    config_path: Option<PathBuf>,
    deterministic_ids: Option<String>,
    script_path: &Path,
) -> Result<Vec<String>> {
    let config = match config_path {
        Some(path) => TrackerConfig::load(&path)?,
        None => TrackerConfig::default(),
    };

    let mut tracker = StateTracker::from_config(&config, kind, field, user)?;
    if let Some(prefix) = deterministic_ids {
        tracker = tracker.with_id_generator(SequenceIdGenerator::new(prefix));
    }

    let script = std::fs::read_to_string(script_path)
        .with_context(|| format!("failed to read script {}", script_path.display()))?;
    let steps: Vec<ScriptStep> = serde_json::from_str(&script)
        .with_context(|| format!("invalid script {}", script_path.display()))?;

    info!("Replaying {} steps from {:?}", steps.len(), script_path);

    let handle = spawn_tracker(tracker);
    let mut lines = Vec::new();

    for (index, step) in steps.into_iter().enumerate() {
        let changes = match step {
            ScriptStep::Add { value } => handle.add(value).await?,
            ScriptStep::Remove { value } => handle.remove(value).await?,
            ScriptStep::Synchronize { payload } => handle
                .synchronize(payload)
                .await
                .with_context(|| format!("step {} rejected", index))?,
        };

        debug!(step = index, changes = changes.len(), "applied step");

        for change in &changes {
            lines.push(serde_json::to_string(&change.to_serializable())?);
        }
    }

    let value = handle.value().await?;
    lines.push(serde_json::to_string(&serde_json::json!({ "value": value }))?);

    handle.shutdown().await?;
    Ok(lines)
}

fn check_payload_command(payload_path: &Path, user: &UserId, field: &str) -> Result<String> {
    let json = std::fs::read_to_string(payload_path)
        .with_context(|| format!("failed to read payload {}", payload_path.display()))?;
    let payload: SyncPayload<Value> = SyncPayload::from_json(&json)?;

    let report = match payload.field_summary(user, field)? {
        Some(summary) => format!(
            "{}/{}: {} adds, {} removes",
            user,
            field,
            summary.adds.len(),
            summary.removes.len()
        ),
        None => format!("{}: not mentioned in payload", user),
    };

    info!("Payload check completed");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_replay_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_file(
            &dir,
            "script.json",
            r#"[
                { "op": "add", "value": "like" },
                { "op": "add", "value": "like" },
                { "op": "synchronize", "payload": {
                    "u1": { "reactions": { "adds": [ { "value": "love", "ids": ["srv"] } ] } }
                } },
                { "op": "remove", "value": "like" }
            ]"#,
        );

        let lines = replay_command(
            CrdtKind::Set,
            "reactions".to_string(),
            UserId::from("u1"),
            None,
            Some("op".to_string()),
            &script,
        )
        .await
        .unwrap();

        assert_eq!(lines.len(), 4);
        let first: Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["operationId"], "op-1");
        assert_eq!(first["changeKind"], "add");
        let removed: Value = serde_json::from_str(&lines[2]).unwrap();
        assert_eq!(removed["changeKind"], "remove");
        assert_eq!(lines[3], r#"{"value":["love"]}"#);
    }

    #[tokio::test]
    async fn test_replay_uses_config_id_length() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_file(&dir, "config.json", r#"{ "operation_id_length": 10 }"#);
        let script = write_file(&dir, "script.json", r#"[ { "op": "add", "value": true } ]"#);

        let lines = replay_command(
            CrdtKind::LastWriterWins,
            "flag".to_string(),
            UserId::from("u1"),
            Some(config),
            None,
            &script,
        )
        .await
        .unwrap();

        let change: Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(change["operationId"].as_str().unwrap().len(), 10);
        assert_eq!(lines[1], r#"{"value":true}"#);
    }

    #[tokio::test]
    async fn test_replay_rejects_malformed_payload() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_file(
            &dir,
            "script.json",
            r#"[ { "op": "synchronize", "payload": { "u1": { "other": {} } } } ]"#,
        );

        let result = replay_command(
            CrdtKind::Set,
            "reactions".to_string(),
            UserId::from("u1"),
            None,
            None,
            &script,
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_check_payload() {
        let dir = tempfile::tempdir().unwrap();
        let payload = write_file(
            &dir,
            "payload.json",
            r#"{ "u1": { "answer": { "adds": [ { "value": 1, "ids": ["a"] } ], "removes": ["b"] } } }"#,
        );

        let report = check_payload_command(&payload, &UserId::from("u1"), "answer").unwrap();
        assert_eq!(report, "u1/answer: 1 adds, 1 removes");

        let report = check_payload_command(&payload, &UserId::from("u2"), "answer").unwrap();
        assert_eq!(report, "u2: not mentioned in payload");

        assert!(check_payload_command(&payload, &UserId::from("u1"), "color").is_err());
    }
}
