use crate::persister::SlowLogSink;
use crate::pipeline::{BatchReport, SlowQueryPipeline};
use crate::config::TraceManagerConfig;
use backtraced_error::{error_chain_to_pretty_formatted, IoError};
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, instrument, warn, Instrument};

pub const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Running,
    Restarting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    Spawned,
    SpawnFailed,
    /// Any exit, the code is only logged
    Exited,
    RestartDelayElapsed,
}

impl SupervisorState {
    /// There is no terminal state, a trace manager that keeps dying is restarted forever
    /// with the same delay.
    pub fn on(self, event: SupervisorEvent) -> SupervisorState {
        match (self, event) {
            (SupervisorState::Starting, SupervisorEvent::Spawned) => SupervisorState::Running,
            (SupervisorState::Starting, SupervisorEvent::SpawnFailed) => {
                SupervisorState::Restarting
            }
            (SupervisorState::Running, SupervisorEvent::Exited) => SupervisorState::Restarting,
            (SupervisorState::Restarting, SupervisorEvent::RestartDelayElapsed) => {
                SupervisorState::Starting
            }
            (state, _) => state,
        }
    }
}

#[derive(Clone)]
pub struct TraceCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl TraceCommand {
    pub fn fbtracemgr(config: &TraceManagerConfig) -> Self {
        Self {
            program: config.trace_bin.clone(),
            args: vec![
                "-se".to_string(),
                config.trace_service.clone(),
                "-user".to_string(),
                config.trace_user.clone(),
                "-password".to_string(),
                config.trace_password.clone(),
                "-start".to_string(),
                "-name".to_string(),
                config.trace_session_name.clone(),
                "-config".to_string(),
                config.trace_config.display().to_string(),
            ],
        }
    }

    fn spawn(&self) -> Result<Child, IoError> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| IoError::from_io_error(e, format!("spawning {:?}", self.program)))
    }
}

impl Debug for TraceCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut args = self.args.clone();
        if let Some(password_at) = args.iter().position(|arg| arg == "-password") {
            if let Some(password) = args.get_mut(password_at + 1) {
                *password = "***".to_string();
            }
        }
        f.debug_struct("TraceCommand")
            .field("program", &self.program)
            .field("args", &args)
            .finish()
    }
}

/// The trace session's own start-up notice on stderr, not worth reporting.
pub fn is_benign_banner(stderr_line: &str, banner: &str) -> bool {
    !banner.is_empty() && stderr_line.contains(banner)
}

pub struct Supervisor<S> {
    command: TraceCommand,
    restart_delay: Duration,
    stderr_banner: String,
    pipeline: SlowQueryPipeline<S>,
    state: SupervisorState,
    child: Option<Child>,
    starts: u64,
}

impl<S: SlowLogSink> Supervisor<S> {
    pub fn new(
        command: TraceCommand,
        restart_delay: Duration,
        stderr_banner: String,
        pipeline: SlowQueryPipeline<S>,
    ) -> Self {
        Self {
            command,
            restart_delay,
            stderr_banner,
            pipeline,
            state: SupervisorState::Starting,
            child: None,
            starts: 0,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn pipeline(&self) -> &SlowQueryPipeline<S> {
        &self.pipeline
    }

    pub async fn run_forever(&mut self) {
        info!(command = ?self.command, "Starting trace bridge");
        loop {
            self.step().await;
        }
    }

    /// Does the work of the current state and moves to the next one.
    pub async fn step(&mut self) {
        let current = self.state;
        let event = match current {
            SupervisorState::Starting => self.start(),
            SupervisorState::Running => match self.child.take() {
                Some(child) => {
                    let attempt = self.starts;
                    self.run_until_exit(child)
                        .instrument(info_span!("trace_session", attempt))
                        .await
                }
                None => SupervisorEvent::Exited,
            },
            SupervisorState::Restarting => {
                tokio::time::sleep(self.restart_delay).await;
                SupervisorEvent::RestartDelayElapsed
            }
        };
        self.state = current.on(event);
    }

    fn start(&mut self) -> SupervisorEvent {
        self.starts += 1;
        match self.command.spawn() {
            Ok(child) => {
                info!(pid = ?child.id(), "Trace manager started");
                self.child = Some(child);
                SupervisorEvent::Spawned
            }
            Err(e) => {
                error!("{}", error_chain_to_pretty_formatted(e));
                info!(
                    "Restarting trace manager in {}s",
                    self.restart_delay.as_secs_f32()
                );
                SupervisorEvent::SpawnFailed
            }
        }
    }

    async fn run_until_exit(&mut self, mut child: Child) -> SupervisorEvent {
        let stderr_forwarder = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(forward_stderr(stderr, self.stderr_banner.clone())));
        let mut session = BatchReport::default();
        if let Some(mut stdout) = child.stdout.take() {
            let mut chunk = vec![0u8; READ_CHUNK_BYTES];
            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(read) => {
                        session += self.pipeline.on_chunk(&chunk[..read]).await;
                    }
                    Err(e) => {
                        let e = IoError::from_io_error(e, "reading trace manager stdout");
                        error!("{}", error_chain_to_pretty_formatted(e));
                        if let Err(e) = child.start_kill() {
                            let e = IoError::from_io_error(e, "killing trace manager");
                            error!("{}", error_chain_to_pretty_formatted(e));
                        }
                        break;
                    }
                }
            }
        }
        session += self.pipeline.on_stream_end().await;
        info!(
            persisted = session.persisted,
            skipped = session.skipped,
            failed = session.failed,
            "Trace output drained"
        );
        match child.wait().await {
            Ok(status) => info!(
                "Trace manager closed ({status}). Restarting in {}s",
                self.restart_delay.as_secs_f32()
            ),
            Err(e) => {
                let e = IoError::from_io_error(e, "waiting for trace manager exit");
                error!("{}", error_chain_to_pretty_formatted(e));
            }
        }
        if let Some(stderr_forwarder) = stderr_forwarder {
            join_stderr_forwarder(stderr_forwarder).await;
        }
        SupervisorEvent::Exited
    }
}

/// False when the forwarder panicked or was cancelled, only stderr lines are lost then.
async fn join_stderr_forwarder(forwarder: JoinHandle<()>) -> bool {
    match forwarder.await {
        Ok(()) => true,
        Err(e) => {
            error!(
                "Forwarding trace manager stderr failed: {}",
                error_chain_to_pretty_formatted(e)
            );
            false
        }
    }
}

#[instrument(skip_all)]
async fn forward_stderr(stderr: ChildStderr, banner: String) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !line.trim().is_empty() && !is_benign_banner(&line, &banner) {
                    warn!("[FB Trace]: {line}");
                }
            }
            Ok(None) => return,
            Err(e) => {
                let e = IoError::from_io_error(e, "reading trace manager stderr");
                error!("{}", error_chain_to_pretty_formatted(e));
                return;
            }
        }
    }
}
