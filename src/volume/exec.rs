use std::{
    ffi::{OsStr, OsString},
    io::{self, Read, Write},
    process::{Command, Stdio},
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::{
    error::{CryptainerError, Result},
    types::Passphrase,
};

/// Upper bound for container creation.
pub const CREATE_TIMEOUT: Duration = Duration::from_secs(120);
/// Upper bound for mount and unmount.
pub const MOUNT_TIMEOUT: Duration = Duration::from_secs(60);

const EXEC_BUSY_RETRY_ATTEMPTS: usize = 20;
const EXEC_BUSY_RETRY_DELAY: Duration = Duration::from_millis(10);
const POLL_INTERVAL: Duration = Duration::from_millis(20);
const STREAM_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// One external tool invocation with optional secret stdin.
pub struct ToolInvocation {
    binary: String,
    args: Vec<OsString>,
    stdin: Option<Zeroizing<Vec<u8>>>,
    timeout: Duration,
}

/// Captured result of a finished tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit code, `None` when killed by a signal.
    pub exit_code: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr, trimmed.
    pub stderr: String,
}

impl ToolOutput {
    /// Returns true for a zero exit code.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Best available diagnostic for error messages.
    pub fn diagnostic(&self) -> String {
        if !self.stderr.is_empty() {
            return self.stderr.clone();
        }
        match self.exit_code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_owned(),
        }
    }
}

impl ToolInvocation {
    /// Starts an invocation of `binary`.
    pub fn new(binary: &str, timeout: Duration) -> Self {
        Self {
            binary: binary.to_owned(),
            args: Vec::new(),
            stdin: None,
            timeout,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, value: impl AsRef<OsStr>) -> Self {
        self.args.push(value.as_ref().to_os_string());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(values.into_iter().map(|value| value.as_ref().to_os_string()));
        self
    }

    /// Feeds a passphrase line on stdin.
    pub fn passphrase(self, passphrase: &Passphrase) -> Self {
        self.stdin_lines(&[passphrase])
    }

    /// Feeds several secret lines on stdin, in order.
    pub fn stdin_lines(mut self, lines: &[&Passphrase]) -> Self {
        let mut buffer = Zeroizing::new(Vec::new());
        for line in lines {
            line.expose(|value| buffer.extend_from_slice(value.as_bytes()));
            buffer.push(b'\n');
        }
        self.stdin = Some(buffer);
        self
    }

    /// Argument vector as passed to the binary.
    pub fn argv(&self) -> &[OsString] {
        &self.args
    }

    /// Runs the tool to completion or until the timeout expires.
    pub fn run(&self) -> Result<ToolOutput> {
        debug!(binary = %self.binary, args = ?self.args, "running external tool");
        let mut child = retry_exec_busy(|| {
            let mut command = Command::new(&self.binary);
            command
                .args(&self.args)
                .stdin(if self.stdin.is_some() {
                    Stdio::piped()
                } else {
                    Stdio::null()
                })
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            command.spawn()
        })
        .map_err(|error| map_command_execution_error(&self.binary, error))?;

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        if let (Some(input), Some(mut pipe)) = (self.stdin.as_ref(), child.stdin.take()) {
            if let Err(error) = pipe.write_all(input) {
                if error.kind() != io::ErrorKind::BrokenPipe {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(error.into());
                }
            }
        }

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                warn!(binary = %self.binary, timeout = ?self.timeout, "external tool timed out");
                return Err(CryptainerError::tool_failure(
                    &self.binary,
                    format!("timed out after {:?}", self.timeout),
                ));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let output = ToolOutput {
            exit_code: status.code(),
            stdout: collect(stdout),
            stderr: collect(stderr).trim().to_owned(),
        };
        debug!(binary = %self.binary, exit_code = ?output.exit_code, "external tool finished");
        Ok(output)
    }
}

/// Maps spawn errors, turning a missing binary into a tool failure.
pub fn map_command_execution_error(binary: &str, error: io::Error) -> CryptainerError {
    if error.kind() == io::ErrorKind::NotFound {
        return CryptainerError::tool_failure(binary, format!("required binary not found: {binary}"));
    }
    CryptainerError::Io(error)
}

/// Retries an exec while the binary is still open for writing.
pub fn retry_exec_busy<T, F>(mut operation: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    let mut last_error = None;
    for attempt in 0..EXEC_BUSY_RETRY_ATTEMPTS {
        match operation() {
            Ok(value) => return Ok(value),
            Err(error) if is_exec_busy_error(&error) && attempt + 1 < EXEC_BUSY_RETRY_ATTEMPTS => {
                last_error = Some(error);
                thread::sleep(EXEC_BUSY_RETRY_DELAY);
            }
            Err(error) => return Err(error),
        }
    }

    Err(last_error.unwrap_or_else(|| io::Error::other("command execution failed")))
}

fn is_exec_busy_error(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::ExecutableFileBusy || error.raw_os_error() == Some(26)
}

fn spawn_reader<R>(source: Option<R>) -> Option<mpsc::Receiver<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    let mut source = source?;
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = source.read_to_end(&mut buffer);
        let _ = sender.send(buffer);
    });
    Some(receiver)
}

// Daemonizing tools can leave the pipe open in a detached child.
fn collect(receiver: Option<mpsc::Receiver<Vec<u8>>>) -> String {
    receiver
        .and_then(|receiver| receiver.recv_timeout(STREAM_DRAIN_TIMEOUT).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
