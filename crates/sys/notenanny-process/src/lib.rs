mod cancel;
mod interrupt;
#[cfg(feature = "mock-process")]
mod mock;

use anyhow::{Context, Result};
pub use cancel::{CancellationToken, CommandCancelled, is_cancelled};
pub use interrupt::install_interrupt_handler;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[cfg(feature = "mock-process")]
pub use mock::{MockExecutor, MockResponse, MockRunCall};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 8 * 1024;

/// A single external program invocation. The program is looked up on `PATH`
/// the same way a shell would.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandRequest {
    program: OsString,
    args: Vec<OsString>,
    stdin_file: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandRequest {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            stdin_file: None,
            timeout: None,
        }
    }

    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<S, I>(&mut self, args: I) -> &mut Self
    where
        S: AsRef<OsStr>,
        I: IntoIterator<Item = S>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    /// Feed the contents of `path` to the child's standard input.
    pub fn stdin_file(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.stdin_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Override the executor's default bounded wait for this request.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    pub fn stdin_path(&self) -> Option<&Path> {
        self.stdin_file.as_deref()
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    /// Render the invocation the way it would be typed into a shell.
    pub fn render(&self) -> String {
        let mut rendered = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&arg.to_string_lossy());
        }
        if let Some(path) = &self.stdin_file {
            rendered.push_str(" < ");
            rendered.push_str(&path.display().to_string());
        }
        rendered
    }
}

/// Exit status plus separately captured output streams.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Abstraction over running external programs to completion. The reconciler
/// only depends on this trait so tests can substitute [`MockExecutor`].
pub trait Executor {
    fn execute(&mut self, request: &CommandRequest) -> Result<CommandOutput>;
}

impl<E: Executor + ?Sized> Executor for &mut E {
    fn execute(&mut self, request: &CommandRequest) -> Result<CommandOutput> {
        (**self).execute(request)
    }
}

/// Default executor backed by `std::process::Command`. Every child is waited
/// on with a deadline; a child that outlives it (or a cancelled token) gets
/// SIGTERM, then SIGKILL after the grace period.
#[derive(Clone, Debug)]
pub struct ProcessExecutor {
    token: CancellationToken,
    timeout: Duration,
    kill_grace: Duration,
}

impl ProcessExecutor {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            timeout: DEFAULT_TIMEOUT,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_kill_grace(mut self, kill_grace: Duration) -> Self {
        self.kill_grace = kill_grace;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut(ExitStatus),
    Cancelled,
}

impl Executor for ProcessExecutor {
    fn execute(&mut self, request: &CommandRequest) -> Result<CommandOutput> {
        if self.token.is_cancelled() {
            return Err(CommandCancelled.into());
        }
        let desc = request.render();
        debug!(command = %desc, "spawning");

        let mut command = Command::new(request.program());
        command.args(request.arguments());
        match request.stdin_path() {
            Some(path) => {
                let file = File::open(path)
                    .with_context(|| format!("open stdin file {}", path.display()))?;
                command.stdin(Stdio::from(file));
            }
            None => {
                command.stdin(Stdio::null());
            }
        }
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        #[cfg(unix)]
        {
            // Own process group so terminate reaches grandchildren and the
            // terminal's SIGINT is routed through our handler instead.
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command
            .spawn()
            .with_context(|| format!("failed to spawn {desc}"))?;
        let mut guard = ChildGuard::new(child, self.kill_grace);
        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = guard.child.stdout.take() {
            spawn_reader(stdout, Stream::Stdout, tx.clone());
        }
        if let Some(stderr) = guard.child.stderr.take() {
            spawn_reader(stderr, Stream::Stderr, tx);
        }

        let timeout = request.timeout_override().unwrap_or(self.timeout);
        let started = Instant::now();
        let outcome = loop {
            if let Some(status) = guard.try_wait()? {
                break WaitOutcome::Exited(status);
            }
            if self.token.is_cancelled() {
                guard.terminate()?;
                break WaitOutcome::Cancelled;
            }
            if started.elapsed() >= timeout {
                warn!(command = %desc, ?timeout, "command exceeded its deadline, terminating");
                break WaitOutcome::TimedOut(guard.terminate()?);
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        };
        // Background jobs left behind by the script would keep the output
        // pipes open.
        guard.kill_leftovers();
        if matches!(outcome, WaitOutcome::Cancelled) {
            return Err(CommandCancelled.into());
        }

        let drain_until = (started + timeout).max(Instant::now() + OUTPUT_DRAIN_GRACE);
        let captured = collect_output(&rx, drain_until, &self.token);
        if captured.cancelled {
            return Err(CommandCancelled.into());
        }
        let Captured {
            stdout,
            mut stderr,
            complete,
            ..
        } = captured;
        if !complete {
            warn!(command = %desc, "output streams still open after exit, truncating");
        }

        match outcome {
            WaitOutcome::Exited(status) if complete => Ok(CommandOutput {
                status,
                stdout,
                stderr,
                timed_out: false,
            }),
            WaitOutcome::Exited(status) | WaitOutcome::TimedOut(status) => {
                if !stderr.is_empty() && !stderr.ends_with(b"\n") {
                    stderr.push(b'\n');
                }
                stderr.extend_from_slice(
                    format!("execution timed out after {}s\n", timeout.as_secs_f64()).as_bytes(),
                );
                Ok(CommandOutput {
                    status,
                    stdout,
                    stderr,
                    timed_out: true,
                })
            }
            WaitOutcome::Cancelled => Err(CommandCancelled.into()),
        }
    }
}

/// Owns a spawned child for the duration of one execution. Dropping the guard
/// before the child has been reaped terminates it, so no exit path (error,
/// panic, cancellation) leaves a stray interpreter running.
#[derive(Debug)]
pub struct ChildGuard {
    child: Child,
    kill_grace: Duration,
    reaped: bool,
}

impl ChildGuard {
    pub fn new(child: Child, kill_grace: Duration) -> Self {
        Self {
            child,
            kill_grace,
            reaped: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        let status = self.child.try_wait().context("poll child status")?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status)
    }

    /// Polite stop first, hard kill once the grace period runs out.
    pub fn terminate(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.try_wait()? {
            return Ok(status);
        }
        self.signal_group(Signal::Terminate);
        let deadline = Instant::now() + self.kill_grace;
        while Instant::now() < deadline {
            if let Some(status) = self.try_wait()? {
                return Ok(status);
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
        debug!(pid = self.child.id(), "grace period elapsed, killing");
        self.signal_group(Signal::Kill);
        let _ = self.child.kill();
        let status = self.child.wait().context("reap killed child")?;
        self.reaped = true;
        Ok(status)
    }

    /// SIGKILL whatever is still running in the child's process group once
    /// the leader has been reaped.
    pub fn kill_leftovers(&mut self) {
        if self.reaped {
            self.signal_group(Signal::Kill);
        }
    }

    #[cfg(unix)]
    fn signal_group(&mut self, signal: Signal) {
        let signo = match signal {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        let pgid = self.child.id() as libc::pid_t;
        // SAFETY: kill(2) has no memory-safety preconditions; a stale pgid
        // only yields ESRCH.
        unsafe {
            libc::kill(-pgid, signo);
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&mut self, _signal: Signal) {
        let _ = self.child.kill();
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.terminate();
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Signal {
    Terminate,
    Kill,
}

#[derive(Clone, Copy, Debug)]
enum Stream {
    Stdout,
    Stderr,
}

/// Forwards chunks as they arrive so output read before a deadline survives
/// even if the pipe never closes.
fn spawn_reader<R: Read + Send + 'static>(
    mut pipe: R,
    stream: Stream,
    tx: Sender<(Stream, Vec<u8>)>,
) {
    thread::spawn(move || {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send((stream, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
}

#[derive(Debug, Default)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    /// Both pipes reached end of file.
    complete: bool,
    cancelled: bool,
}

fn collect_output(
    rx: &Receiver<(Stream, Vec<u8>)>,
    deadline: Instant,
    token: &CancellationToken,
) -> Captured {
    let mut captured = Captured::default();
    loop {
        if token.is_cancelled() {
            captured.cancelled = true;
            return captured;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return captured;
        }
        match rx.recv_timeout(remaining.min(WAIT_POLL_INTERVAL)) {
            Ok((Stream::Stdout, chunk)) => captured.stdout.extend_from_slice(&chunk),
            Ok((Stream::Stderr, chunk)) => captured.stderr.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                captured.complete = true;
                return captured;
            }
        }
    }
}

#[cfg(unix)]
pub fn exit_status_from_code(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatusExt::from_raw(code << 8)
}

#[cfg(windows)]
pub fn exit_status_from_code(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    ExitStatusExt::from_raw(code as u32)
}
