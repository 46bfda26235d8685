//! The subprocess capability seam.
//!
//! Capture and download tools are external programs. They are reached
//! through the `ProcessLauncher`/`CaptureProcess` traits so the recording
//! and download logic can be exercised in tests with scripted fakes
//! instead of real subprocesses.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// A fully resolved command line, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Split a shell-ish command string into a spec. Whitespace-separated;
    /// no quoting support, which is enough for recovery hooks like
    /// `mount /mnt/recordings`.
    pub fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).args(parts))
    }
}

/// Error spawning a subprocess.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to spawn '{program}': {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },
}

/// Exit status of a subprocess, reduced to what callers act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ProcessExit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// A running subprocess owned by a session or download job.
#[async_trait]
pub trait CaptureProcess: Send + Sync {
    /// OS process id, if the process is still running.
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit on its own.
    async fn wait(&mut self) -> std::io::Result<ProcessExit>;

    /// Ask the process to stop, escalating to a kill after `grace`.
    async fn stop(&mut self, grace: Duration) -> std::io::Result<ProcessExit>;
}

/// Spawner of external tool processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync + 'static {
    async fn launch(&self, spec: &CommandSpec) -> Result<Box<dyn CaptureProcess>, SpawnError>;
}

/// Production launcher backed by `tokio::process`.
pub struct TokioLauncher {
    /// When set, children die with this process (the
    /// `stop_recordings_on_exit` shutdown policy). When unset, captures
    /// keep running detached across a shutdown.
    kill_on_drop: bool,
}

impl TokioLauncher {
    pub fn new(kill_on_drop: bool) -> Self {
        Self { kill_on_drop }
    }
}

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn launch(&self, spec: &CommandSpec) -> Result<Box<dyn CaptureProcess>, SpawnError> {
        debug!(program = %spec.program, args = ?spec.args, "spawning subprocess");

        let mut command = process_utils::tokio_command(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .kill_on_drop(self.kill_on_drop);

        let child = command.spawn().map_err(|source| SpawnError::Io {
            program: spec.program.clone(),
            source,
        })?;

        Ok(Box::new(TokioProcess { child }))
    }
}

struct TokioProcess {
    child: tokio::process::Child,
}

#[async_trait]
impl CaptureProcess for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> std::io::Result<ProcessExit> {
        self.child.wait().await.map(Into::into)
    }

    async fn stop(&mut self, grace: Duration) -> std::io::Result<ProcessExit> {
        process_utils::stop_with_grace(&mut self.child, grace)
            .await
            .map(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_builder() {
        let spec = CommandSpec::new("streamlink")
            .arg("https://example.com/live")
            .arg("best")
            .args(["-o", "/tmp/out.ts"]);

        assert_eq!(spec.program, "streamlink");
        assert_eq!(spec.args, vec!["https://example.com/live", "best", "-o", "/tmp/out.ts"]);
    }

    #[test]
    fn test_command_spec_parse() {
        let spec = CommandSpec::parse("mount /mnt/recordings").unwrap();
        assert_eq!(spec.program, "mount");
        assert_eq!(spec.args, vec!["/mnt/recordings"]);

        assert!(CommandSpec::parse("   ").is_none());
    }

    #[test]
    fn test_process_exit_success() {
        assert!(ProcessExit { code: Some(0) }.success());
        assert!(!ProcessExit { code: Some(1) }.success());
        assert!(!ProcessExit { code: None }.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_launcher_runs_real_process() {
        let launcher = TokioLauncher::new(true);
        let spec = CommandSpec::new("true");

        let mut process = launcher.launch(&spec).await.unwrap();
        let exit = process.wait().await.unwrap();
        assert!(exit.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_launcher_stop_long_running_process() {
        let launcher = TokioLauncher::new(true);
        let spec = CommandSpec::new("sleep").arg("30");

        let mut process = launcher.launch(&spec).await.unwrap();
        let exit = process.stop(Duration::from_secs(5)).await.unwrap();
        assert!(!exit.success());
    }

    #[tokio::test]
    async fn test_tokio_launcher_spawn_failure() {
        let launcher = TokioLauncher::new(true);
        let spec = CommandSpec::new("definitely-not-a-real-binary-name");

        let err = launcher.launch(&spec).await.err().unwrap();
        assert!(matches!(err, SpawnError::Io { .. }));
    }
}
