//! Starting the automation server and obtaining its transport.
//!
//! The proxy core does not build command lines; it receives a
//! `ProcessDescriptor` assembled elsewhere and hands it to a `ServerLauncher`.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

/// Grace period between SIGTERM and SIGKILL when stopping a server.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Opaque description of how to start the automation server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub current_dir: Option<PathBuf>,
}

impl ProcessDescriptor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The byte streams to a started server plus its process, if there is one.
pub struct ServerTransport {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub process: Option<Child>,
}

impl ServerTransport {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            process: None,
        }
    }

    pub fn with_process(mut self, process: Child) -> Self {
        self.process = Some(process);
        self
    }
}

/// Starts automation servers.
///
/// Called on the proxy entry's worker thread, inside its tokio runtime.
pub trait ServerLauncher: Send + Sync {
    fn launch(&self, descriptor: &ProcessDescriptor) -> io::Result<ServerTransport>;
}

/// Launches the server as a child process speaking over stdin/stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl ServerLauncher for ProcessLauncher {
    fn launch(&self, descriptor: &ProcessDescriptor) -> io::Result<ServerTransport> {
        if descriptor.program.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty program in process descriptor",
            ));
        }

        let mut command = Command::new(&descriptor.program);
        command
            .args(&descriptor.args)
            .envs(&descriptor.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &descriptor.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to spawn {}: {}", descriptor.program, e),
            )
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("failed to capture stdout"))?;

        debug!(
            target: "automation_proxy::launcher",
            "Spawned {} (pid {:?})",
            descriptor.program,
            child.id()
        );

        Ok(ServerTransport::new(stdout, stdin).with_process(child))
    }
}

/// Stop a server process with platform-appropriate escalation.
///
/// **Unix**: SIGTERM, wait up to two seconds, then SIGKILL.
/// **Windows**: `TerminateProcess` directly.
pub(crate) async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => {
                    if let Ok(status) = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                        debug!(
                            target: "automation_proxy::launcher",
                            "Server {} exited after SIGTERM: {:?}",
                            pid,
                            status
                        );
                        return;
                    }
                    warn!(
                        target: "automation_proxy::launcher",
                        "Server {} ignored SIGTERM for {:?}, killing",
                        pid,
                        TERMINATE_GRACE
                    );
                }
                Err(e) => {
                    debug!(
                        target: "automation_proxy::launcher",
                        "SIGTERM to {} failed: {}",
                        pid,
                        e
                    );
                }
            }
        }
    }

    if let Err(e) = child.kill().await {
        debug!(
            target: "automation_proxy::launcher",
            "Kill failed (process likely already exited): {}",
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawns_process_with_valid_command() {
        let transport = ProcessLauncher
            .launch(&ProcessDescriptor::new("cat"))
            .expect("cat should spawn");
        let mut child = transport.process.expect("process handle");
        assert!(child.id().is_some());
        terminate(&mut child).await;
    }

    #[tokio::test]
    async fn fails_with_invalid_command() {
        let result = ProcessLauncher.launch(&ProcessDescriptor::new("nonexistent-binary-xyz123"));
        let err = result.err().expect("should fail for nonexistent command");
        assert!(err.to_string().contains("nonexistent-binary-xyz123"));
    }

    #[tokio::test]
    async fn rejects_empty_program() {
        let err = ProcessLauncher
            .launch(&ProcessDescriptor::default())
            .err()
            .expect("empty program");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn descriptor_builder_collects_args_and_env() {
        let descriptor = ProcessDescriptor::new("server")
            .arg("--stdio")
            .args(["--lang", "en"])
            .env("PROFILE", "work");
        assert_eq!(descriptor.args, vec!["--stdio", "--lang", "en"]);
        assert_eq!(descriptor.env.get("PROFILE").map(String::as_str), Some("work"));
    }
}
