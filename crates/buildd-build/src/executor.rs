//! Step execution
//!
//! [`StepRunner`] is the only place the worker touches the operating system
//! on behalf of a pipeline step. [`ProcessRunner`] runs each step as one
//! subprocess in its own process group, appends its output to the build log
//! as it arrives and hands back the exit status together with a bounded tail
//! of the output.
//!
//! A step is complete once its direct child exits. Output still produced by
//! processes the step left behind is read for a short grace period only;
//! those processes are REAP's business, not the runner's.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use buildd_config::Config;
use buildd_core::StepOutcome;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::abort::AbortHandle;
use crate::error::{BuildError, Result};
use crate::pipeline::{StepName, StepRole};

/// Output lines buffered between the pipe readers and the build log
const OUTPUT_BUFFER_LINES: usize = 1024;

/// How long output is still read once the step's own process is gone
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// File written into the sandbox before a step runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Absolute destination path
    pub path: PathBuf,
    /// File contents
    pub contents: String,
}

/// Fully resolved command line of one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInvocation {
    /// Build the step belongs to
    pub build_id: String,
    /// Step name
    pub step: StepName,
    /// Lifecycle role of the step
    pub role: StepRole,
    /// Executable to run
    pub executable: PathBuf,
    /// Arguments, not including the executable
    pub args: Vec<String>,
    /// Run with the configured root command prefix
    pub as_root: bool,
    /// Files to write before the process starts
    pub staged_files: Vec<StagedFile>,
}

impl StepInvocation {
    /// Create an invocation running as the worker user
    pub fn new(
        build_id: impl Into<String>,
        step: StepName,
        executable: impl Into<PathBuf>,
        args: Vec<String>,
    ) -> Self {
        Self {
            build_id: build_id.into(),
            step,
            role: StepRole::Setup,
            executable: executable.into(),
            args,
            as_root: false,
            staged_files: Vec::new(),
        }
    }

    /// Run the step as root
    pub fn as_root(mut self) -> Self {
        self.as_root = true;
        self
    }

    /// Write a file before the step runs
    pub fn stage_file(mut self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.staged_files.push(StagedFile { path: path.into(), contents: contents.into() });
        self
    }

    /// Printable command line
    pub fn command_line(&self) -> String {
        std::iter::once(self.executable.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Executes pipeline steps
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run one step to completion
    async fn run_step(&self, invocation: &StepInvocation) -> Result<StepOutcome>;
}

/// Build log of one step plus the tail handed to the classifier
struct StepOutput {
    log: File,
    tail: TailBuffer,
}

impl StepOutput {
    async fn write(&mut self, line: &str) -> Result<()> {
        self.log.write_all(line.as_bytes()).await?;
        self.tail.push(line);
        Ok(())
    }
}

/// Pipe reader tasks, stopped when the step is done with its output
struct OutputReaders(Vec<JoinHandle<()>>);

impl Drop for OutputReaders {
    fn drop(&mut self) {
        for reader in &self.0 {
            reader.abort();
        }
    }
}

/// Runner spawning one subprocess per step
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    config: Arc<Config>,
    abort: AbortHandle,
}

impl ProcessRunner {
    /// Create a runner
    pub fn new(config: Arc<Config>, abort: AbortHandle) -> Self {
        Self { config, abort }
    }

    fn command(&self, invocation: &StepInvocation) -> Command {
        let root_command = &self.config.root_command;
        let mut cmd = match root_command.split_first() {
            Some((program, prefix_args)) if invocation.as_root => {
                let mut cmd = Command::new(program);
                cmd.args(prefix_args).arg(&invocation.executable);
                cmd
            }
            _ => Command::new(&invocation.executable),
        };
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    async fn stage_files(&self, invocation: &StepInvocation) -> Result<()> {
        for file in &invocation.staged_files {
            if let Some(parent) = file.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&file.path, &file.contents).await?;
            debug!(path = %file.path.display(), "Staged file");
        }
        Ok(())
    }

    async fn open_log(&self, build_id: &str) -> Result<File> {
        let path = self.config.build_log(build_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?)
    }

    /// Wait for the child while logging its output, killing its process
    /// group on timeout or, for steps that may be interrupted, on abort
    async fn wait_child(
        &self,
        child: &mut Child,
        invocation: &StepInvocation,
        lines: &mut mpsc::Receiver<String>,
        output: &mut StepOutput,
    ) -> Result<i32> {
        let timeout = self.config.step_timeout();
        let interruptible = invocation.role != StepRole::Teardown;
        let abort = self.abort.clone();

        let sleep = async {
            match timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        let aborted = async {
            if interruptible {
                abort.wait().await
            } else {
                std::future::pending::<()>().await
            }
        };
        tokio::pin!(sleep, aborted);
        let mut reading = true;

        loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status.map_err(|e| BuildError::step_execution(invocation.step, e.to_string()))?;
                    return Ok(status.code().unwrap_or(StepOutcome::KILLED));
                }
                line = lines.recv(), if reading => match line {
                    Some(line) => output.write(&line).await?,
                    None => reading = false,
                },
                _ = &mut sleep => {
                    warn!(step = %invocation.step, timeout = ?timeout, "Step timed out, killing it");
                    self.kill_step(child, invocation).await;
                    return Ok(StepOutcome::KILLED);
                }
                _ = &mut aborted => {
                    warn!(step = %invocation.step, "Build aborted, killing step");
                    self.kill_step(child, invocation).await;
                    return Ok(StepOutcome::KILLED);
                }
            }
        }
    }

    async fn kill_step(&self, child: &mut Child, invocation: &StepInvocation) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            self.kill_process_group(pid, invocation).await;
        }
        if let Err(e) = child.kill().await {
            warn!(step = %invocation.step, "Failed to kill step process: {}", e);
        }
    }

    #[cfg(unix)]
    async fn kill_process_group(&self, pid: u32, invocation: &StepInvocation) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Ok(pgid) = i32::try_from(pid) else {
            return;
        };
        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) => debug!(step = %invocation.step, pgid, "Killed step process group"),
            Err(Errno::ESRCH) => {}
            // Processes of a root step belong to root
            Err(Errno::EPERM) if invocation.as_root => self.kill_process_group_as_root(pgid, invocation).await,
            Err(e) => warn!(step = %invocation.step, pgid, "Failed to kill step process group: {}", e),
        }
    }

    #[cfg(unix)]
    async fn kill_process_group_as_root(&self, pgid: i32, invocation: &StepInvocation) {
        let Some((program, prefix_args)) = self.config.root_command.split_first() else {
            warn!(step = %invocation.step, pgid, "No root command to kill step process group with");
            return;
        };
        let target = format!("-{pgid}");
        let mut cmd = Command::new(program);
        cmd.args(prefix_args)
            .args(["kill", "-KILL", "--", target.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) if status.success() => {
                debug!(step = %invocation.step, pgid, "Killed step process group as root")
            }
            Ok(Ok(status)) => warn!(step = %invocation.step, pgid, "Root kill exited with {}", status),
            Ok(Err(e)) => warn!(step = %invocation.step, pgid, "Failed to run root kill: {}", e),
            Err(_) => warn!(step = %invocation.step, pgid, "Root kill timed out"),
        }
    }
}

#[async_trait]
impl StepRunner for ProcessRunner {
    async fn run_step(&self, invocation: &StepInvocation) -> Result<StepOutcome> {
        self.stage_files(invocation).await?;

        let mut log = self.open_log(&invocation.build_id).await?;
        log.write_all(format!("--- {}: {}\n", invocation.step, invocation.command_line()).as_bytes())
            .await?;
        let mut output = StepOutput { log, tail: TailBuffer::new(self.config.log_tail_bytes) };

        info!(step = %invocation.step, command = %invocation.command_line(), "Running step");
        let mut child = self
            .command(invocation)
            .spawn()
            .map_err(|e| BuildError::step_execution(invocation.step, format!("spawn failed: {e}")))?;

        let (tx, mut lines) = mpsc::channel(OUTPUT_BUFFER_LINES);
        let mut readers = OutputReaders(Vec::new());
        if let Some(stdout) = child.stdout.take() {
            readers.0.push(tokio::spawn(forward_lines(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.0.push(tokio::spawn(forward_lines(stderr, tx.clone())));
        }
        drop(tx);

        let exit_status = self.wait_child(&mut child, invocation, &mut lines, &mut output).await?;
        drain_output(invocation.step, &mut lines, &mut output).await?;
        drop(readers);
        output.log.flush().await?;

        debug!(step = %invocation.step, exit_status, "Step finished");
        Ok(StepOutcome { exit_status, log_tail: output.tail.into_string() })
    }
}

/// Log output still buffered or arriving shortly after the step ended
async fn drain_output(
    step: StepName,
    lines: &mut mpsc::Receiver<String>,
    output: &mut StepOutput,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + OUTPUT_DRAIN_TIMEOUT;
    loop {
        match tokio::time::timeout_at(deadline, lines.recv()).await {
            Ok(Some(line)) => output.write(&line).await?,
            Ok(None) => return Ok(()),
            Err(_) => {
                warn!(step = %step, "Step left processes holding its output open, not waiting for them");
                return Ok(());
            }
        }
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(String::from_utf8_lossy(&line).into_owned()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Error reading step output: {}", e);
                break;
            }
        }
    }
}

/// Keeps the last `limit` bytes of a stream of output
#[derive(Debug)]
pub struct TailBuffer {
    limit: usize,
    bytes: VecDeque<u8>,
}

impl TailBuffer {
    pub fn new(limit: usize) -> Self {
        Self { limit, bytes: VecDeque::with_capacity(limit) }
    }

    pub fn push(&mut self, text: &str) {
        self.bytes.extend(text.as_bytes());
        let excess = self.bytes.len().saturating_sub(self.limit);
        self.bytes.drain(..excess);
    }

    /// Tail as text; a character cut at the front is dropped
    pub fn into_string(self) -> String {
        let bytes: Vec<u8> = self.bytes.into();
        match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                let bytes = e.into_bytes();
                let start = bytes.iter().position(|b| (*b as i8) >= -0x40).unwrap_or(bytes.len());
                String::from_utf8_lossy(&bytes[start..]).into_owned()
            }
        }
    }
}
