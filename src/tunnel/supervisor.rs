//! Tunnel process lifecycle management.
//!
//! Spawns the sc binary, classifies its output, detects readiness through
//! the signal file and tears the tunnel down again, including the
//! best-effort remote tunnel delete.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{oneshot, watch};

use crate::args;
use crate::config::Config;
use crate::defaults::{
    KILL_GRACE_SECS, READY_FILE_NAME, READY_POLL_INTERVAL_MS, REQUEST_TIMEOUT_SECS,
    SAUCE_BASE_URL,
};
use crate::guard;
use crate::tunnel::output::{classify_line, LineBuffer, TunnelState};
#[cfg(unix)]
use crate::tunnel::process;

/// Errors that can occur while connecting the tunnel.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The sc output reported invalid credentials.
    #[error("Invalid Sauce Connect credentials: {0}")]
    Unauthorized(String),

    /// The sc output reported a connection-establishment failure.
    #[error("Sauce Connect API failure: {0}")]
    ConnectionFailed(String),

    /// Any other error-prefixed sc output line.
    #[error("{0}")]
    Generic(String),

    /// The process exited before the tunnel became ready.
    #[error("Could not start Sauce Connect. Exit code {code:?} signal: {signal:?}")]
    LaunchFailed {
        code: Option<i32>,
        signal: Option<i32>,
    },

    /// OS-level failure launching or reaping the process.
    #[error("Sauce Connect process errored: {0}")]
    Spawn(#[from] std::io::Error),

    /// The HTTP client for the remote tunnel delete could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

type CompletionSlot = Arc<Mutex<Option<oneshot::Sender<Result<(), ConnectError>>>>>;

/// Resolve the pending connect at most once; later calls are no-ops.
fn complete(slot: &CompletionSlot, result: Result<(), ConnectError>) {
    if let Some(tx) = slot.lock().unwrap().take() {
        let _ = tx.send(result);
    }
}

/// Path of the readiness signal file passed to sc via `--readyfile`.
fn ready_file_path(ready_file_id: Option<&str>) -> PathBuf {
    let mut name = READY_FILE_NAME.to_string();
    if let Some(id) = ready_file_id {
        name.push('_');
        name.push_str(id);
    }
    std::env::temp_dir().join(name)
}

/// Supervises a single sc tunnel process per `connect` call.
///
/// The supervisor itself is stateless across attempts; retry policy lives
/// with the caller (see [`crate::retry`]).
pub struct Supervisor {
    config: Config,
    exe: PathBuf,
    client: Client,
}

impl Supervisor {
    /// Create a supervisor around an acquired (or caller-provided) sc
    /// executable.
    ///
    /// The remote tunnel delete goes through the same proxy as the
    /// binary downloads when `config.proxy` is set.
    pub fn new(config: Config, exe: PathBuf) -> Result<Self, ConnectError> {
        let mut builder = Client::builder().timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS));
        if let Some(url) = config.proxy.as_deref() {
            builder = builder.proxy(reqwest::Proxy::all(url)?);
        }
        let client = builder.build()?;

        Ok(Self {
            config,
            exe,
            client,
        })
    }

    /// Launch sc and resolve once the tunnel is ready or has failed.
    ///
    /// Readiness is solely signal-file driven; output lines only update
    /// the tunnel state. The returned [`TunnelProcess`] owns the live
    /// tunnel.
    pub async fn connect(&self) -> Result<TunnelProcess, ConnectError> {
        log::info!("Opening local tunnel using Sauce Connect");

        let mut cmd_args = args::build_args(&self.config);
        let ready_file = ready_file_path(self.config.ready_file_id.as_deref());

        // A leftover signal file from an earlier run would satisfy the
        // readiness poll instantly.
        let _ = std::fs::remove_file(&ready_file);

        cmd_args.push("--readyfile".to_string());
        cmd_args.push(ready_file.to_string_lossy().into_owned());

        log::info!(
            "Starting sc with args: {}",
            args::redact(&cmd_args.join(" "))
        );

        let mut child = Command::new(&self.exe)
            .args(&cmd_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let pid = child.id().unwrap_or(0);

        let (kill_tx, kill_rx) = watch::channel(false);
        guard::register_exit_hook();
        guard::set_active(pid, kill_tx.clone());

        let state = Arc::new(Mutex::new(TunnelState::default()));
        let (done_tx, done_rx) = oneshot::channel();
        let slot: CompletionSlot = Arc::new(Mutex::new(Some(done_tx)));
        let (exit_tx, exit_rx) = watch::channel(false);

        let pump = child
            .stdout
            .take()
            .map(|stdout| spawn_output_pump(stdout, Arc::clone(&state), self.config.verbose));
        spawn_ready_watcher(ready_file.clone(), Arc::clone(&slot), exit_rx.clone());
        spawn_exit_monitor(
            child,
            pid,
            ready_file,
            kill_rx,
            pump,
            Arc::clone(&state),
            Arc::clone(&slot),
            exit_tx,
        );

        match done_rx.await {
            Ok(Ok(())) => {
                log::info!("Testing tunnel ready");
                Ok(TunnelProcess {
                    pid,
                    state,
                    exited: exit_rx,
                    kill: kill_tx,
                    client: self.client.clone(),
                    username: self.config.username.clone(),
                    access_key: self.config.access_key.clone(),
                    rest_url: self
                        .config
                        .rest_url
                        .clone()
                        .unwrap_or_else(|| SAUCE_BASE_URL.to_string()),
                })
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ConnectError::Generic(
                "supervisor tasks ended unexpectedly".to_string(),
            )),
        }
    }
}

/// Feed stdout chunks through the line buffer into the trigger table.
fn spawn_output_pump(
    mut stdout: ChildStdout,
    state: Arc<Mutex<TunnelState>>,
    verbose: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer = LineBuffer::new();
        let mut chunk = [0u8; 4096];

        loop {
            match stdout.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    for line in buffer.push(&chunk[..n]) {
                        if verbose {
                            log::info!("{}", line);
                        }
                        classify_line(&line, &mut state.lock().unwrap());
                    }
                }
            }
        }
    })
}

/// Poll the readiness signal path; stops when it appears or the process
/// exits, whichever comes first.
fn spawn_ready_watcher(
    ready_file: PathBuf,
    slot: CompletionSlot,
    mut exited: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_millis(READY_POLL_INTERVAL_MS));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if ready_file.exists() {
                        log::info!("Detected sc ready");
                        complete(&slot, Ok(()));
                        break;
                    }
                }
                _ = exited.changed() => break,
            }
        }
    });
}

/// Pending until a kill is requested; pends forever once every requester
/// is gone without asking.
async fn kill_requested(kill: &mut watch::Receiver<bool>) {
    if kill.wait_for(|&requested| requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Ask the child to shut down. SIGTERM on unix so sc gets to close the
/// tunnel on its way out; a hard kill through the owned handle elsewhere,
/// where there is no signal to send.
#[cfg(unix)]
fn terminate_child(_child: &mut Child, pid: u32) {
    process::terminate(pid);
}

#[cfg(not(unix))]
fn terminate_child(child: &mut Child, _pid: u32) {
    let _ = child.start_kill();
}

/// Own the child handle, reap it and resolve any still-pending connect.
///
/// Kill requests arrive over the watch channel; holding the only handle
/// to the child here keeps termination working on every platform.
#[allow(clippy::too_many_arguments)]
fn spawn_exit_monitor(
    mut child: Child,
    pid: u32,
    ready_file: PathBuf,
    mut kill_rx: watch::Receiver<bool>,
    pump: Option<tokio::task::JoinHandle<()>>,
    state: Arc<Mutex<TunnelState>>,
    slot: CompletionSlot,
    exit_tx: watch::Sender<bool>,
) {
    tokio::spawn(async move {
        let reaped = {
            let wait = child.wait();
            tokio::pin!(wait);
            tokio::select! {
                status = &mut wait => Some(status),
                _ = kill_requested(&mut kill_rx) => None,
            }
        };
        let status = match reaped {
            Some(status) => status,
            None => {
                terminate_child(&mut child, pid);
                child.wait().await
            }
        };

        guard::clear_active(pid);

        // The readiness signal is cleaned up exactly once, here, no
        // matter which path reached the exit.
        let _ = std::fs::remove_file(&ready_file);

        // Let the output pump drain to EOF so every line the process ever
        // wrote has been classified before the error latch is read.
        if let Some(pump) = pump {
            let _ = pump.await;
        }

        match status {
            Ok(status) => {
                let latched = state.lock().unwrap().error.take();
                if let Some(err) = latched {
                    complete(&slot, Err(err));
                } else if !status.success() {
                    complete(
                        &slot,
                        Err(ConnectError::LaunchFailed {
                            code: status.code(),
                            signal: exit_signal(&status),
                        }),
                    );
                } else {
                    log::info!("Closing Sauce Connect Tunnel");
                    // Clean exit before the ready signal still resolves
                    // the caller instead of leaving connect pending.
                    complete(
                        &slot,
                        Err(ConnectError::LaunchFailed {
                            code: status.code(),
                            signal: None,
                        }),
                    );
                }
            }
            Err(err) => {
                log::error!("Sauce Connect process errored: {}", err);
                complete(&slot, Err(ConnectError::Spawn(err)));
            }
        }

        let _ = exit_tx.send(true);
    });
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// A live, ready tunnel process.
pub struct TunnelProcess {
    pid: u32,
    state: Arc<Mutex<TunnelState>>,
    exited: watch::Receiver<bool>,
    kill: watch::Sender<bool>,
    client: Client,
    username: Option<String>,
    access_key: Option<String>,
    rest_url: String,
}

// Credentials stay out of debug output.
impl std::fmt::Debug for TunnelProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelProcess")
            .field("pid", &self.pid)
            .field("tunnel_id", &self.tunnel_id())
            .field("port", &self.port())
            .field("exited", &self.has_exited())
            .finish_non_exhaustive()
    }
}

impl TunnelProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Tunnel identifier, once announced in the sc output.
    pub fn tunnel_id(&self) -> Option<String> {
        self.state.lock().unwrap().tunnel_id.clone()
    }

    /// Selenium listener port, once announced in the sc output.
    pub fn port(&self) -> Option<u16> {
        self.state.lock().unwrap().port
    }

    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Route a kill request to the exit monitor owning the child handle.
    fn request_kill(&self) {
        let _ = self.kill.send(true);
    }

    /// Close the tunnel and wait for the process to exit.
    ///
    /// If a tunnel id was captured, a remote tunnel delete is issued
    /// first and sc gets a grace period to shut down by itself; the
    /// deferred kill never fires when the process exits before it. With
    /// no tunnel id (or a failed delete request) the process is killed
    /// right away. Returns only after the process has actually exited.
    pub async fn close(mut self) {
        let tunnel_id = self.tunnel_id();

        match (tunnel_id, self.username.clone()) {
            (Some(id), Some(username)) => {
                let url = format!("{}/rest/v1/{}/tunnels/{}", self.rest_url, username, id);
                log::info!("Closing tunnel {}", id);

                let request = self
                    .client
                    .delete(&url)
                    .basic_auth(&username, self.access_key.as_deref());

                match request.send().await {
                    Ok(response) => {
                        // Drain the body so the connection is released.
                        let _ = response.bytes().await;

                        if !self.wait_exited(Duration::from_secs(KILL_GRACE_SECS)).await {
                            self.request_kill();
                        }
                    }
                    Err(err) => {
                        log::warn!("Tunnel delete request failed: {}", err);
                        self.request_kill();
                    }
                }
            }
            _ => self.request_kill(),
        }

        let _ = self.exited.wait_for(|&exited| exited).await;
    }

    async fn wait_exited(&mut self, timeout: Duration) -> bool {
        // A closed channel means the exit monitor already finished.
        tokio::time::timeout(timeout, self.exited.wait_for(|&exited| exited))
            .await
            .is_ok()
    }
}
