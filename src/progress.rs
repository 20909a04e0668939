//! Stage progress reporting.
//!
//! `rctx run` (and the single-stage commands) report when each stage of a
//! commit starts and finishes, so users see where a long run is. Progress
//! goes to **stderr**; stdout stays parseable for scripts.

use std::io::Write;

use serde::Serialize;

/// Pipeline stage.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ingest,
    Parse,
    Embed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Parse => "parse",
            Stage::Embed => "embed",
        }
    }

    /// What `Finished::items` counts for this stage.
    fn unit(&self) -> &'static str {
        match self {
            Stage::Ingest => "files",
            Stage::Parse => "chunks",
            Stage::Embed => "vectors",
        }
    }
}

#[derive(Clone, Debug)]
pub enum StageProgressEvent {
    Started {
        stage: Stage,
        repo: String,
    },
    Finished {
        stage: Stage,
        repo: String,
        commit: String,
        items: u64,
    },
}

/// Reports stage progress. Implementations write to stderr (human or JSON).
pub trait StageProgressReporter: Send + Sync {
    fn report(&self, event: StageProgressEvent);
}

fn human_line(event: &StageProgressEvent) -> String {
    match event {
        StageProgressEvent::Started { stage, repo } => {
            format!("{} {}  started...", stage.as_str(), repo)
        }
        StageProgressEvent::Finished {
            stage,
            repo,
            commit,
            items,
        } => format!(
            "{} {}  done  {} {} @ {}",
            stage.as_str(),
            repo,
            format_number(*items),
            stage.unit(),
            short_commit(commit)
        ),
    }
}

fn json_line(event: &StageProgressEvent) -> serde_json::Value {
    match event {
        StageProgressEvent::Started { stage, repo } => serde_json::json!({
            "event": "progress",
            "stage": stage,
            "repo": repo,
            "phase": "started"
        }),
        StageProgressEvent::Finished {
            stage,
            repo,
            commit,
            items,
        } => serde_json::json!({
            "event": "progress",
            "stage": stage,
            "repo": repo,
            "phase": "finished",
            "commit": commit,
            "items": items
        }),
    }
}

/// Human-friendly progress on stderr: "parse acme/widgets  done  1,234 chunks @ 1a2b3c4".
pub struct StderrProgress;

impl StageProgressReporter for StderrProgress {
    fn report(&self, event: StageProgressEvent) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", human_line(&event));
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl StageProgressReporter for JsonProgress {
    fn report(&self, event: StageProgressEvent) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", json_line(&event));
        let _ = stderr.flush();
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl StageProgressReporter for NoProgress {
    fn report(&self, _event: StageProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

fn short_commit(commit: &str) -> &str {
    commit.get(..7).unwrap_or(commit)
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn StageProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
