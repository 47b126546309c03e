//! Replay engine seam.
//!
//! The engine runs a process against a fixed message list and frame set
//! and hands back whatever the process published. The harness treats it
//! as a pure function of those three inputs.

use crate::process::ProcessConfig;
use indexmap::IndexMap;
use lockstep_core::{CoreError, CoreResult};
use lockstep_log::{FrameSet, LogMessage, LogSegment};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Prefix of the variables carrying frame container paths to the child
pub const FRAMES_ENV_PREFIX: &str = "LOCKSTEP_FRAMES_";

/// Runs a process over recorded input
pub trait ReplayEngine {
    /// Replay `messages` and `frames` through `process`, returning its
    /// output in emission order
    ///
    /// # Errors
    ///
    /// Returns error if the process cannot be run or its output decoded
    fn replay(
        &mut self,
        process: &ProcessConfig,
        messages: &[LogMessage],
        frames: &FrameSet,
    ) -> CoreResult<Vec<LogMessage>>;
}

impl<F> ReplayEngine for F
where
    F: FnMut(&ProcessConfig, &[LogMessage], &FrameSet) -> CoreResult<Vec<LogMessage>>,
{
    fn replay(
        &mut self,
        process: &ProcessConfig,
        messages: &[LogMessage],
        frames: &FrameSet,
    ) -> CoreResult<Vec<LogMessage>> {
        self(process, messages, frames)
    }
}

/// Engine that spawns the process for every replay.
///
/// Input messages go to the child's stdin as JSON lines; the child's
/// stdout is read back the same way. Frame container paths are exported as
/// `LOCKSTEP_FRAMES_<KIND>` variables.
#[derive(Debug, Clone, Default)]
pub struct SubprocessEngine {
    workdir: Option<PathBuf>,
    env: IndexMap<String, String>,
}

impl SubprocessEngine {
    /// Engine running in the current directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run processes from `dir`
    #[must_use]
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Set a variable on every spawned process
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn build_command(&self, process: &ProcessConfig, frames: &FrameSet) -> CoreResult<Command> {
        let (program, args) = process
            .command
            .split_first()
            .ok_or_else(|| CoreError::InvalidConfig {
                reason: format!("process {} has an empty command", process.name),
            })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&process.env)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        for (kind, reader) in frames.iter() {
            if let Some(path) = reader.path() {
                cmd.env(
                    format!("{}{}", FRAMES_ENV_PREFIX, kind.as_str().to_uppercase()),
                    path,
                );
            }
        }
        Ok(cmd)
    }
}

impl ReplayEngine for SubprocessEngine {
    fn replay(
        &mut self,
        process: &ProcessConfig,
        messages: &[LogMessage],
        frames: &FrameSet,
    ) -> CoreResult<Vec<LogMessage>> {
        let replay_err = |reason: String| CoreError::Replay {
            process: process.name.clone(),
            reason,
        };

        let input = LogSegment::new(messages.to_vec()).to_json_lines()?;
        let mut child = self
            .build_command(process, frames)?
            .spawn()
            .map_err(|e| replay_err(format!("spawn failed: {}", e)))?;
        let stdin = child.stdin.take();

        tracing::debug!(
            process = %process.name,
            messages = messages.len(),
            pid = child.id(),
            "spawned replay process"
        );

        // Feed stdin on a separate thread so a chatty child cannot deadlock
        // against a full stdout pipe.
        let (written, output) = std::thread::scope(|s| {
            let writer = s.spawn(move || -> std::io::Result<()> {
                if let Some(mut stdin) = stdin {
                    stdin.write_all(input.as_bytes())?;
                }
                Ok(())
            });
            let output = child.wait_with_output();
            (writer.join(), output)
        });

        let output = output.map_err(|e| replay_err(format!("wait failed: {}", e)))?;
        if !output.status.success() {
            return Err(replay_err(format!("exited with {}", output.status)));
        }
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(replay_err(format!("writing input failed: {}", e))),
            Err(_) => return Err(replay_err("input writer panicked".to_string())),
        }

        let text = String::from_utf8(output.stdout)
            .map_err(|e| replay_err(format!("output is not UTF-8: {}", e)))?;
        let emitted = LogSegment::from_json_lines(&text)?.into_messages();
        tracing::debug!(process = %process.name, emitted = emitted.len(), "replay process exited");
        Ok(emitted)
    }
}
