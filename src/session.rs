//! Session management for run artifacts.
//!
//! Every `verify` or `loop` invocation owns one session directory:
//!
//! ```text
//! <base>/<name>_<timestamp>/
//!   .session.json
//!   screenshots/<scenario-slug>-step-<n>.png            (verify)
//!   iteration-<n>/prompt.md, agent-output.log, failure-report.md, results.json
//!   iteration-<n>/screenshots/<scenario-slug>-step-<n>.png (loop)
//!   loop-summary.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config;

/// A run session with organized artifact files
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session ID
    pub id: String,
    /// Root directory for this session
    pub dir: PathBuf,
    /// Whether to keep files after the session is dropped
    pub keep: bool,
}

impl Session {
    /// Create a session named `<name>_<timestamp>` under the configured base directory
    pub fn with_name(name: &str) -> Self {
        Self::with_name_in(Path::new(&config::get().session.base_dir), name)
    }

    /// Create a session named `<name>_<timestamp>` under `base`
    pub fn with_name_in(base: &Path, name: &str) -> Self {
        let id = format!("{}_{}", sanitize_name(name), generate_timestamp_suffix());
        Self {
            dir: base.join(&id),
            id,
            keep: true,
        }
    }

    /// Use an explicit directory as the session root
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("session_{}", std::process::id()));
        Self { id, dir, keep: true }
    }

    /// Set whether to keep files after the session is dropped
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Create the session directory and write its metadata
    pub fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(self.screenshots_dir())?;

        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let metadata = serde_json::json!({
            "id": self.id,
            "created": chrono::Utc::now().to_rfc3339(),
            "hostname": host,
            "pid": std::process::id(),
        });

        fs::write(
            self.dir.join(".session.json"),
            serde_json::to_string_pretty(&metadata)?,
        )?;
        Ok(())
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.dir.join("screenshots")
    }

    /// Deterministic screenshot path for a failed step of a scenario
    pub fn screenshot_path(&self, scenario_name: &str, step: usize) -> PathBuf {
        self.screenshots_dir().join(screenshot_file_name(scenario_name, step))
    }

    /// Directory holding one iteration's prompt, agent output and reports
    pub fn iteration_dir(&self, iteration: u32) -> PathBuf {
        self.dir.join(format!("iteration-{}", iteration))
    }

    /// Failure screenshots of one iteration, kept apart from every other iteration's
    pub fn iteration_screenshots_dir(&self, iteration: u32) -> PathBuf {
        self.iteration_dir(iteration).join("screenshots")
    }

    /// Write a text artifact for an iteration, creating the directory if needed
    pub fn write_iteration_file(
        &self,
        iteration: u32,
        file_name: &str,
        contents: &str,
    ) -> std::io::Result<PathBuf> {
        let dir = self.iteration_dir(iteration);
        fs::create_dir_all(&dir)?;
        let path = dir.join(file_name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Write a file at the session root
    pub fn write_file(&self, file_name: &str, contents: &str) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file_name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// List all screenshots captured in this session
    pub fn list_screenshots(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut captures = Vec::new();
        let dir = self.screenshots_dir();
        if dir.exists() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().map(|e| e == "png").unwrap_or(false) {
                    captures.push(path);
                }
            }
        }
        captures.sort();
        Ok(captures)
    }

    /// Remove the session directory unless it is marked to be kept
    pub fn cleanup(&self) -> std::io::Result<()> {
        if self.dir.exists() && !self.keep {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

/// `<slug>-step-<n>.png`
pub fn screenshot_file_name(scenario_name: &str, step: usize) -> String {
    format!("{}-step-{}.png", slugify(scenario_name), step)
}

/// Lowercase, dash-separated slug built from the alphanumeric runs of `name`.
/// Letters and digits of any script are kept.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "scenario".to_string()
    } else {
        slug
    }
}

fn generate_timestamp_suffix() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Sanitize a name for use in directory names
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// `days` whole days, saturating instead of overflowing
pub fn days(days: u64) -> std::time::Duration {
    std::time::Duration::from_secs(days.saturating_mul(24 * 60 * 60))
}

/// Clean up sessions under `base` older than the specified duration
pub fn cleanup_old_sessions(base: &Path, max_age: std::time::Duration) -> std::io::Result<usize> {
    if !base.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut cleaned = 0;

    for entry in fs::read_dir(base)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if let Some(age) = age {
            if age > max_age && fs::remove_dir_all(&path).is_ok() {
                cleaned += 1;
            }
        }
    }

    Ok(cleaned)
}

/// List all existing sessions under `base`
pub fn list_sessions(base: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut sessions = Vec::new();
    for entry in fs::read_dir(base)? {
        let path = entry?.path();
        if path.join(".session.json").exists() {
            sessions.push(path);
        }
    }
    sessions.sort();
    Ok(sessions)
}
