// Process Pool
// Launches server processes and tears them down deterministically

use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Timing knobs of the pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
  /// Budget for one TCP connect attempt
  pub connect_timeout: Duration,
  /// Pause between readiness probes
  pub poll_interval: Duration,
  /// Outer bound on the whole batch becoming ready
  pub startup_deadline: Duration,
  /// Wait after the graceful signal before the forced kill
  pub shutdown_grace: Duration,
  /// Pause after each shutdown so the OS releases the port
  pub settle_delay: Duration,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      connect_timeout: Duration::from_millis(100),
      poll_interval: Duration::from_millis(250),
      startup_deadline: Duration::from_secs(60),
      shutdown_grace: Duration::from_secs(10),
      settle_delay: Duration::from_millis(100),
    }
  }
}

/// Errors launching a batch of server processes
#[derive(Error, Debug)]
pub enum PoolError {
  /// The command token list for a port is empty
  #[error("empty command for port {port}")]
  EmptyCommand { port: u16 },

  /// The OS refused to spawn the process
  #[error("failed to spawn '{command}' for port {port}: {source}")]
  SpawnFailed {
    port: u16,
    command: String,
    #[source]
    source: std::io::Error,
  },

  /// The process exited before its port became reachable
  #[error("process on port {port} exited during startup: {status}")]
  StartupFailed { port: u16, status: ExitStatus },

  /// Polling the process state failed
  #[error("failed to poll process on port {port}: {source}")]
  WaitFailed {
    port: u16,
    #[source]
    source: std::io::Error,
  },

  /// The port never became reachable within the deadline
  #[error("process on port {port} did not open its port within {deadline:?}")]
  StartupTimeout { port: u16, deadline: Duration },
}

/// Owns the launched server processes, keyed by port.
///
/// The pool is the only actor signalling its children. After a failed
/// [`ProcessPool::start`] the children launched so far stay in the pool so
/// the caller can decide to [`ProcessPool::stop`] them.
#[derive(Debug, Default)]
pub struct ProcessPool {
  config: PoolConfig,
  children: BTreeMap<u16, Child>,
}

impl ProcessPool {
  pub fn new(config: PoolConfig) -> Self {
    Self {
      config,
      children: BTreeMap::new(),
    }
  }

  /// Ports with a live child process
  pub fn ports(&self) -> Vec<u16> {
    self.children.keys().copied().collect()
  }

  pub fn is_empty(&self) -> bool {
    self.children.is_empty()
  }

  /// Launch one process per entry and wait until every port accepts
  /// a TCP connection.
  pub async fn start(
    &mut self,
    commands: BTreeMap<u16, Vec<String>>,
    env: &[(String, String)],
  ) -> Result<(), PoolError> {
    // A listener that predates the child would fake the readiness signal.
    for port in commands.keys() {
      if probe(*port, self.config.connect_timeout).await {
        warn!("port {} is already in use, readiness detection may be unreliable", port);
      }
    }

    let batch: Vec<u16> = commands.keys().copied().collect();
    for (port, tokens) in commands {
      let Some((program, arguments)) = tokens.split_first() else {
        return Err(PoolError::EmptyCommand { port });
      };

      let mut command = Command::new(program);
      command
        .args(arguments)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit());
      for (key, value) in env {
        command.env(key, value);
      }

      let child = command.spawn().map_err(|source| PoolError::SpawnFailed {
        port,
        command: program.clone(),
        source,
      })?;
      info!("launched '{}' on port {}", program, port);
      self.children.insert(port, child);
    }

    // Launch the whole batch first, then poll, so a slow starter does not
    // delay its peers.
    let deadline = Instant::now() + self.config.startup_deadline;
    for port in batch {
      self.wait_ready(port, deadline).await?;
    }
    Ok(())
  }

  /// Signal every child and wait out the grace period; stragglers are
  /// killed. Never fails; a refused shutdown is logged and escalated.
  pub async fn stop(&mut self) {
    let children = std::mem::take(&mut self.children);
    let mut stopping: Vec<(u16, Child)> = Vec::new();
    for (port, mut child) in children {
      terminate(&mut child);
      stopping.push((port, child));
    }

    for (port, mut child) in stopping {
      match timeout(self.config.shutdown_grace, child.wait()).await {
        Ok(Ok(status)) => debug!("process on port {} exited: {}", port, status),
        Ok(Err(e)) => warn!("failed to wait for process on port {}: {e}", port),
        Err(_) => {
          warn!("process on port {} ignored the termination signal, killing it", port);
          if let Err(e) = child.kill().await {
            warn!("failed to kill process on port {}: {e}", port);
          }
        }
      }
      sleep(self.config.settle_delay).await;
    }
  }

  async fn wait_ready(&mut self, port: u16, deadline: Instant) -> Result<(), PoolError> {
    loop {
      let exited = match self.children.get_mut(&port) {
        Some(child) => child
          .try_wait()
          .map_err(|source| PoolError::WaitFailed { port, source })?,
        None => None,
      };
      if let Some(status) = exited {
        self.children.remove(&port);
        return Err(PoolError::StartupFailed { port, status });
      }

      if probe(port, self.config.connect_timeout).await {
        debug!("port {} is ready", port);
        return Ok(());
      }
      if Instant::now() >= deadline {
        return Err(PoolError::StartupTimeout {
          port,
          deadline: self.config.startup_deadline,
        });
      }
      sleep(self.config.poll_interval).await;
    }
  }
}

async fn probe(port: u16, connect_timeout: Duration) -> bool {
  matches!(
    timeout(connect_timeout, TcpStream::connect(("127.0.0.1", port))).await,
    Ok(Ok(_))
  )
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
  if let Some(pid) = child.id() {
    unsafe {
      libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
  }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
  // No graceful signal on this platform, go straight to the kill.
  let _ = child.start_kill();
}

#[cfg(test)]
mod tests {
  use super::*;

  fn quick_config() -> PoolConfig {
    PoolConfig {
      connect_timeout: Duration::from_millis(50),
      poll_interval: Duration::from_millis(50),
      startup_deadline: Duration::from_millis(400),
      shutdown_grace: Duration::from_millis(400),
      settle_delay: Duration::from_millis(10),
    }
  }

  #[cfg(unix)]
  fn command(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|token| token.to_string()).collect()
  }

  #[tokio::test]
  async fn empty_command_is_rejected() {
    let mut pool = ProcessPool::new(quick_config());
    let mut commands = BTreeMap::new();
    commands.insert(39130, Vec::new());
    let error = pool.start(commands, &[]).await.unwrap_err();
    assert!(matches!(error, PoolError::EmptyCommand { port: 39130 }));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn early_exit_is_reported_as_startup_failure() {
    let mut pool = ProcessPool::new(quick_config());
    let mut commands = BTreeMap::new();
    commands.insert(39131, command(&["sh", "-c", "exit 3"]));
    let error = pool.start(commands, &[]).await.unwrap_err();
    match error {
      PoolError::StartupFailed { port, status } => {
        assert_eq!(port, 39131);
        assert_eq!(status.code(), Some(3));
      }
      other => panic!("unexpected error: {other}"),
    }
    pool.stop().await;
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn silent_process_times_out_and_stays_for_cleanup() {
    let mut pool = ProcessPool::new(quick_config());
    let mut commands = BTreeMap::new();
    commands.insert(39132, command(&["sleep", "30"]));
    let error = pool.start(commands, &[]).await.unwrap_err();
    assert!(matches!(error, PoolError::StartupTimeout { port: 39132, .. }));
    assert!(!pool.is_empty());

    pool.stop().await;
    assert!(pool.is_empty());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn stubborn_process_is_killed_after_the_grace_period() {
    let mut pool = ProcessPool::new(quick_config());
    let mut commands = BTreeMap::new();
    commands.insert(39133, command(&["sh", "-c", "trap '' TERM; sleep 30"]));
    let error = pool.start(commands, &[]).await.unwrap_err();
    assert!(matches!(error, PoolError::StartupTimeout { .. }));

    let begin = std::time::Instant::now();
    pool.stop().await;
    assert!(begin.elapsed() < Duration::from_secs(5));
    assert!(pool.is_empty());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn reachable_port_reports_ready() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // The listener satisfies the probe, the child only has to stay alive.
    let mut pool = ProcessPool::new(quick_config());
    let mut commands = BTreeMap::new();
    commands.insert(port, command(&["sleep", "30"]));
    pool.start(commands, &[]).await.unwrap();
    assert_eq!(pool.ports(), vec![port]);
    pool.stop().await;
  }
}
