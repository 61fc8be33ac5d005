/// External process seam
///
/// Build commands and target binaries both go through [`ProcessRunner`], so all
/// platform-specific spawning, stream wiring, and signal forwarding lives here.
use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

/// How a child's stdout/stderr are wired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Collect into [`ProcessOutput`]
    #[default]
    Capture,
    /// Share the launcher's own stream
    Inherit,
}

impl StreamMode {
    fn stdio(self) -> Stdio {
        match self {
            StreamMode::Capture => Stdio::piped(),
            StreamMode::Inherit => Stdio::inherit(),
        }
    }
}

/// Everything needed to start one child process
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(OsString, OsString)>,
    pub stdout: StreamMode,
    pub stderr: StreamMode,
}

impl ProcessSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            stdout: StreamMode::Capture,
            stderr: StreamMode::Capture,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn streams(mut self, mode: StreamMode) -> Self {
        self.stdout = mode;
        self.stderr = mode;
        self
    }
}

/// How a child terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Code(i32),
    Signal(i32),
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Code(0))
    }

    /// Exit code to propagate: the child's own code, or `128 + signal`
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitOutcome::Code(code) => *code,
            ExitOutcome::Signal(signal) => 128 + signal,
        }
    }

    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitOutcome::Code(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitOutcome::Signal(signal);
            }
        }

        ExitOutcome::Code(-1)
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitOutcome::Code(code) => write!(f, "exit code {}", code),
            ExitOutcome::Signal(signal) => write!(f, "signal {}", signal),
        }
    }
}

/// Result of a finished child; captured streams are empty when inherited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub outcome: ExitOutcome,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Run an external process to completion
pub trait ProcessRunner: Send + Sync {
    /// Spawn, wait, and collect. An `Err` means the process never started.
    fn run(&self, spec: &ProcessSpec) -> impl Future<Output = io::Result<ProcessOutput>> + Send;
}

/// Real processes via `tokio::process`, forwarding termination signals to the child
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    async fn run(&self, spec: &ProcessSpec) -> io::Result<ProcessOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::inherit())
            .stdout(spec.stdout.stdio())
            .stderr(spec.stderr.stdio());

        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        debug!("Running command: {:?}", cmd);

        // Listeners go up before the spawn so no signal slips through the gap
        #[cfg(unix)]
        let mut forwarder = forward::SignalForwarder::install()?;

        let mut child = cmd.spawn()?;

        let stdout_reader = child.stdout.take().map(|mut out| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                out.read_to_end(&mut buf).await.map(|_| buf)
            })
        });
        let stderr_reader = child.stderr.take().map(|mut err| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                err.read_to_end(&mut buf).await.map(|_| buf)
            })
        });

        #[cfg(unix)]
        let status = forwarder.wait(&mut child).await?;
        #[cfg(not(unix))]
        let status = child.wait().await?;

        let stdout = collect(stdout_reader).await?;
        let stderr = collect(stderr_reader).await?;

        Ok(ProcessOutput {
            outcome: ExitOutcome::from_status(status),
            stdout,
            stderr,
        })
    }
}

async fn collect(reader: Option<tokio::task::JoinHandle<io::Result<Vec<u8>>>>) -> io::Result<Vec<u8>> {
    match reader {
        Some(handle) => handle.await.map_err(io::Error::other)?,
        None => Ok(Vec::new()),
    }
}

#[cfg(unix)]
mod forward {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::{getpgrp, tcgetpgrp, Pid};
    use std::io;
    use std::process::ExitStatus;
    use tokio::process::Child;
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::{debug, warn};

    /// Relays SIGINT, SIGTERM, SIGHUP and SIGQUIT to a child until it exits
    pub struct SignalForwarder {
        interrupt: tokio::signal::unix::Signal,
        terminate: tokio::signal::unix::Signal,
        hangup: tokio::signal::unix::Signal,
        quit: tokio::signal::unix::Signal,
    }

    /// Ctrl-C and Ctrl-\ at the terminal already reach the child, which shares
    /// our foreground process group
    pub(super) fn from_terminal(signal: Signal) -> bool {
        matches!(signal, Signal::SIGINT | Signal::SIGQUIT)
            && tcgetpgrp(io::stdin()).is_ok_and(|foreground| foreground == getpgrp())
    }

    impl SignalForwarder {
        pub fn install() -> io::Result<Self> {
            Ok(Self {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
                hangup: signal(SignalKind::hangup())?,
                quit: signal(SignalKind::quit())?,
            })
        }

        pub async fn wait(&mut self, child: &mut Child) -> io::Result<ExitStatus> {
            let pid = child.id();

            loop {
                let signal = tokio::select! {
                    status = child.wait() => return status,
                    _ = self.interrupt.recv() => Signal::SIGINT,
                    _ = self.terminate.recv() => Signal::SIGTERM,
                    _ = self.hangup.recv() => Signal::SIGHUP,
                    _ = self.quit.recv() => Signal::SIGQUIT,
                };

                let Some(pid) = pid else { continue };
                if from_terminal(signal) {
                    debug!(pid, signal = %signal, "child shares the terminal, not forwarding");
                    continue;
                }
                debug!(pid, signal = %signal, "forwarding signal to child");
                if let Err(e) = kill(Pid::from_raw(pid as i32), signal) {
                    warn!(pid, signal = %signal, "failed to forward signal: {}", e);
                }
            }
        }
    }
}
