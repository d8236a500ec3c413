//! Knowledge Probe: runs the local knowledge lookup executable and parses its one-line reply.
//!
//! Wire contract: `<executable> <query>` prints `"<fact> | <mood>"` on stdout.
//! The probe is advisory. A missing executable, a timeout, a spawn error, or unusable output
//! all produce [`KnowledgeResult::fallback`]; nothing is ever returned as an error.

use crate::config::ProbeConfig;
use crate::types::{KnowledgeResult, NEUTRAL_MOOD, NO_DATA_FACT};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

/// Source of the per-turn fact and mood.
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, query_key: &str) -> KnowledgeResult;
}

/// Probe backed by an external process with a hard timeout.
#[derive(Debug, Clone)]
pub struct ProcessProbe {
    executable: PathBuf,
    timeout: Duration,
}

impl ProcessProbe {
    pub fn new(executable: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            timeout,
        }
    }

    pub fn from_config(cfg: &ProbeConfig) -> Self {
        Self::new(&cfg.executable, cfg.timeout())
    }

    pub fn executable(&self) -> &std::path::Path {
        &self.executable
    }

    async fn run(&self, query_key: &str) -> Result<String, String> {
        if !self.executable.exists() {
            return Err(format!("executable not found: {}", self.executable.display()));
        }

        let child = tokio::process::Command::new(&self.executable)
            .arg(query_key)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("spawn failed: {}", e))?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| format!("timed out after {:?}", self.timeout))?
            .map_err(|e| format!("wait failed: {}", e))?;

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait::async_trait]
impl Probe for ProcessProbe {
    async fn probe(&self, query_key: &str) -> KnowledgeResult {
        let started = Instant::now();
        match self.run(query_key).await {
            Ok(stdout) => {
                let result = parse_probe_output(&stdout);
                tracing::debug!(
                    target: "maya::probe",
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    mood = %result.mood,
                    "Knowledge probe answered"
                );
                result
            }
            Err(reason) => {
                tracing::warn!(
                    target: "maya::probe",
                    executable = %self.executable.display(),
                    %reason,
                    "Knowledge probe unavailable; using neutral default"
                );
                KnowledgeResult::fallback()
            }
        }
    }
}

/// Parses `"<fact> | <mood>"`, splitting the trimmed output on the first `|`.
///
/// No delimiter: the whole trimmed output is the fact and the mood is `NEUTRAL`.
/// Blank fact or blank output falls back to `"No data found."`.
pub fn parse_probe_output(raw: &str) -> KnowledgeResult {
    let output = raw.trim();
    if output.is_empty() {
        return KnowledgeResult::fallback();
    }

    let (fact, mood) = match output.split_once('|') {
        Some((fact, mood)) => (fact.trim(), normalize_mood(mood)),
        None => (output, NEUTRAL_MOOD.to_string()),
    };

    let fact = if fact.is_empty() { NO_DATA_FACT } else { fact };
    KnowledgeResult::new(fact, mood)
}

/// Accepts both `NEUTRAL` and the older `User mood is NEUTRAL.` phrasing.
fn normalize_mood(raw: &str) -> String {
    let mut s = raw.trim().trim_end_matches('.').trim();
    let lower = s.to_ascii_lowercase();
    if let Some(idx) = lower.find("mood is") {
        s = s[idx + "mood is".len()..].trim();
    }
    if s.is_empty() {
        NEUTRAL_MOOD.to_string()
    } else {
        s.to_ascii_uppercase()
    }
}
