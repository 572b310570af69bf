use crate::config::{CommandConfig, UpstreamConfig};
use crate::error::StartupError;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

/// Interval for polling the child's exit status after its stdout closes (in milliseconds)
const EXIT_POLL_INTERVAL_MS: u64 = 50;

/// How a boot attempt resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A readiness marker appeared on stdout
    Signalled,
    /// No marker before the startup timeout; traffic is served anyway
    TimedOut,
    /// A start was already in flight or complete
    AlreadyStarted,
}

/// Owns the upstream application process.
///
/// Only this type spawns or signals the child. [`ensure_started`] is
/// idempotent: the first call installs dependencies and launches the
/// application, later calls return [`StartOutcome::AlreadyStarted`] until a
/// failed attempt clears the way for a new one.
///
/// [`ensure_started`]: UpstreamManager::ensure_started
pub struct UpstreamManager {
    config: UpstreamConfig,
    /// Handle to the running application, if launched
    child: Mutex<Option<Child>>,
    /// Set while a start is in flight or has succeeded
    launched: AtomicBool,
}

impl UpstreamManager {
    pub fn new(config: UpstreamConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            child: Mutex::new(None),
            launched: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Loopback port the application listens on
    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Whether a child handle is currently held
    pub async fn is_running(&self) -> bool {
        self.child.lock().await.is_some()
    }

    /// PID of the running application, if any
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(|c| c.id())
    }

    /// Install dependencies, launch the application and wait for readiness.
    pub async fn ensure_started(&self) -> Result<StartOutcome, StartupError> {
        if self.launched.swap(true, Ordering::SeqCst) {
            debug!("Upstream already started or starting");
            return Ok(StartOutcome::AlreadyStarted);
        }

        let result = self.boot().await;

        if let Err(ref e) = result {
            error!(error = %e, "Upstream startup failed");
            self.discard_child().await;
            self.launched.store(false, Ordering::SeqCst);
        }

        result
    }

    async fn boot(&self) -> Result<StartOutcome, StartupError> {
        if let Some(install) = self.config.install_step() {
            self.run_install(install).await?;
        }

        let (stdout, stderr) = self.launch().await?;

        if let Some(stderr) = stderr {
            tokio::spawn(log_stderr(stderr));
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        match stdout {
            Some(stdout) => {
                tokio::spawn(watch_stdout(stdout, self.config.clone(), ready_tx));
            }
            None => drop(ready_tx),
        }

        let timeout = self.config.startup_timeout();
        let start = Instant::now();

        match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(())) => {
                info!(
                    port = self.config.port,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Upstream signalled readiness"
                );
                Ok(StartOutcome::Signalled)
            }
            Ok(Err(_)) => {
                // stdout closed without a marker
                let remaining = timeout.saturating_sub(start.elapsed());
                self.wait_for_exit_or_timeout(remaining).await
            }
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "No readiness signal from upstream before timeout, serving traffic anyway"
                );
                Ok(StartOutcome::TimedOut)
            }
        }
    }

    /// Run the dependency installation step to completion
    async fn run_install(&self, install: &CommandConfig) -> Result<(), StartupError> {
        let (program, args) = install.argv().map_err(StartupError::Command)?;

        info!(command = %install.display(), "Installing dependencies");

        let mut cmd = Command::new(&program);
        cmd.args(&args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        if let Some(ref working_dir) = self.config.working_dir {
            cmd.current_dir(working_dir);
        }

        let status = cmd
            .status()
            .await
            .map_err(|source| StartupError::InstallSpawn {
                command: install.display(),
                source,
            })?;

        if !status.success() {
            return Err(StartupError::InstallFailed { status });
        }

        debug!("Dependency installation finished");
        Ok(())
    }

    /// Spawn the long-running application with piped output
    async fn launch(&self) -> Result<(Option<ChildStdout>, Option<ChildStderr>), StartupError> {
        let start = &self.config.start;
        let (program, args) = start.argv().map_err(StartupError::Command)?;

        info!(command = %start.display(), port = self.config.port, "Starting upstream application");

        let mut cmd = Command::new(&program);
        cmd.args(&args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        if let Some(ref working_dir) = self.config.working_dir {
            cmd.current_dir(working_dir);
        }

        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        cmd.env("PORT", self.config.port.to_string());

        let mut child = cmd.spawn().map_err(|source| StartupError::Launch {
            command: start.display(),
            source,
        })?;

        let pid = child.id().unwrap_or(0);
        info!(pid, "Upstream process spawned");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        *self.child.lock().await = Some(child);

        Ok((stdout, stderr))
    }

    /// Stdout closed before a marker: fail if the child has exited, otherwise
    /// keep the timeout-as-success behavior.
    async fn wait_for_exit_or_timeout(&self, remaining: Duration) -> Result<StartOutcome, StartupError> {
        let deadline = Instant::now() + remaining;

        loop {
            {
                let mut guard = self.child.lock().await;
                if let Some(child) = guard.as_mut() {
                    if let Ok(Some(status)) = child.try_wait() {
                        *guard = None;
                        return Err(StartupError::Exited { status });
                    }
                }
            }

            if Instant::now() >= deadline {
                warn!("Upstream closed stdout without a readiness signal, serving traffic anyway");
                return Ok(StartOutcome::TimedOut);
            }

            tokio::time::sleep(Duration::from_millis(EXIT_POLL_INTERVAL_MS)).await;
        }
    }

    /// Kill and forget the child after a failed boot
    async fn discard_child(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
    }

    /// Stop the application gracefully: SIGTERM, wait for the grace period,
    /// then SIGKILL.
    pub async fn stop(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        self.launched.store(false, Ordering::SeqCst);

        let grace_period = self.config.shutdown_grace_period();

        if let Some(pid) = child.id() {
            info!(pid, "Sending SIGTERM to upstream");

            #[cfg(unix)]
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }

            #[cfg(not(unix))]
            {
                let _ = child.start_kill();
            }
        }

        match tokio::time::timeout(grace_period, child.wait()).await {
            Ok(Ok(status)) => {
                info!(?status, "Upstream process exited");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Error waiting for upstream to exit");
            }
            Err(_) => {
                warn!(
                    grace_period_secs = grace_period.as_secs(),
                    "Grace period exceeded, sending SIGKILL"
                );
                let _ = child.kill().await;
            }
        }
    }
}

/// Read one line, decoding invalid UTF-8 lossily. `None` at EOF.
async fn next_lossy_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(buf).trim_end().to_string()))
}

/// Relay application stdout into the log and fire `ready_tx` on the first
/// line carrying a readiness marker. Keeps draining after readiness so the
/// pipe never fills.
async fn watch_stdout(stdout: ChildStdout, config: UpstreamConfig, ready_tx: oneshot::Sender<()>) {
    let mut ready_tx = Some(ready_tx);
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        match next_lossy_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => {
                if !line.is_empty() {
                    info!(target: "upstream", stream = "stdout", "{}", line);
                }
                if config.is_ready_line(&line) {
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(());
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Failed reading upstream stdout");
                break;
            }
        }
    }

    debug!("Upstream stdout closed");
}

async fn log_stderr(stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();

    loop {
        match next_lossy_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => {
                if !line.is_empty() {
                    warn!(target: "upstream", stream = "stderr", "{}", line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Failed reading upstream stderr");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandConfig {
        CommandConfig::new("sh", &["-c", script])
    }

    fn test_config(start: &str) -> UpstreamConfig {
        UpstreamConfig {
            port: 3999,
            skip_install: true,
            start: sh(start),
            startup_timeout_secs: 5,
            shutdown_grace_period_secs: 1,
            ..UpstreamConfig::default()
        }
    }

    #[tokio::test]
    async fn test_ready_marker_resolves_start() {
        let manager = UpstreamManager::new(test_config("echo 'compiling'; echo '- ready on 3999'; sleep 30"));

        let outcome = manager.ensure_started().await.unwrap();
        assert_eq!(outcome, StartOutcome::Signalled);
        assert!(manager.is_running().await);
        assert!(manager.pid().await.is_some());

        manager.stop().await;
        assert!(!manager.is_running().await);
    }

    #[tokio::test]
    async fn test_second_marker_also_resolves_start() {
        let manager = UpstreamManager::new(test_config("echo '> started server on 0.0.0.0'; sleep 30"));

        assert_eq!(manager.ensure_started().await.unwrap(), StartOutcome::Signalled);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_ensure_started_is_idempotent() {
        let manager = UpstreamManager::new(test_config("echo ready; sleep 30"));

        assert_eq!(manager.ensure_started().await.unwrap(), StartOutcome::Signalled);
        let pid = manager.pid().await;

        assert_eq!(manager.ensure_started().await.unwrap(), StartOutcome::AlreadyStarted);
        assert_eq!(manager.pid().await, pid);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_port_is_exported_to_application() {
        let manager = UpstreamManager::new(test_config(r#"echo "ready on $PORT"; sleep 30"#));
        assert_eq!(manager.ensure_started().await.unwrap(), StartOutcome::Signalled);
        assert_eq!(manager.port(), 3999);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_missing_marker_times_out_as_success() {
        let mut config = test_config("echo 'still compiling'; sleep 30");
        config.startup_timeout_secs = 1;
        let manager = UpstreamManager::new(config);

        let start = Instant::now();
        let outcome = manager.ensure_started().await.unwrap();

        assert_eq!(outcome, StartOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(manager.is_running().await);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_install_failure_is_startup_error() {
        let mut config = test_config("echo ready; sleep 30");
        config.skip_install = false;
        config.install = sh("exit 3");
        let manager = UpstreamManager::new(config);

        let err = manager.ensure_started().await.unwrap_err();
        assert!(matches!(err, StartupError::InstallFailed { .. }));
        assert!(!manager.is_running().await);
    }

    #[tokio::test]
    async fn test_failed_start_can_be_retried() {
        let mut config = test_config("echo ready; sleep 30");
        config.skip_install = false;
        config.install = sh("exit 1");
        let manager = UpstreamManager::new(config);

        assert!(manager.ensure_started().await.is_err());
        // The failed attempt cleared the launch flag
        assert!(manager.ensure_started().await.is_err());
    }

    #[tokio::test]
    async fn test_launch_failure_is_startup_error() {
        let mut config = test_config("unused");
        config.start = CommandConfig::new("/nonexistent/labelgate-upstream", &["run"]);
        let manager = UpstreamManager::new(config);

        let err = manager.ensure_started().await.unwrap_err();
        assert!(matches!(err, StartupError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_early_exit_is_startup_error() {
        let manager = UpstreamManager::new(test_config("echo 'boom' >&2; exit 1"));

        let err = manager.ensure_started().await.unwrap_err();
        assert!(matches!(err, StartupError::Exited { .. }));
        assert!(!manager.is_running().await);
    }

    #[tokio::test]
    async fn test_invalid_utf8_on_stdout_does_not_hide_marker() {
        let manager = UpstreamManager::new(test_config(r"printf '\377\376 compiling\n'; echo ready; sleep 30"));

        let start = Instant::now();
        assert_eq!(manager.ensure_started().await.unwrap(), StartOutcome::Signalled);
        assert!(start.elapsed() < Duration::from_secs(5));

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_utf8_on_stderr_keeps_draining() {
        let manager = UpstreamManager::new(test_config(
            r"printf '\377\n' >&2; sleep 0.5; echo 'warning: slow' >&2; echo ready; sleep 30",
        ));

        assert_eq!(manager.ensure_started().await.unwrap(), StartOutcome::Signalled);
        assert!(manager.is_running().await);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_lossy_line_reader() {
        let data: &[u8] = b"ok\r\n\xff bad\nlast";
        let mut reader = BufReader::new(data);
        let mut buf = Vec::new();

        assert_eq!(next_lossy_line(&mut reader, &mut buf).await.unwrap().as_deref(), Some("ok"));
        assert_eq!(
            next_lossy_line(&mut reader, &mut buf).await.unwrap().as_deref(),
            Some("\u{FFFD} bad")
        );
        assert_eq!(next_lossy_line(&mut reader, &mut buf).await.unwrap().as_deref(), Some("last"));
        assert_eq!(next_lossy_line(&mut reader, &mut buf).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stop_without_child_is_noop() {
        let manager = UpstreamManager::new(test_config("echo ready"));
        manager.stop().await;
        assert!(!manager.is_running().await);
    }
}
