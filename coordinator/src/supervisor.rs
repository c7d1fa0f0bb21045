//! Lifecycle of cloudnode worker processes.

use crate::config::WorkerCommand;
use crate::error::{Result, ScrapeError};
use log::{debug, info, warn};
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

/// How long a worker gets to exit after SIGTERM before it is killed
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Starts cloudnode processes
#[derive(Debug, Clone)]
pub struct WorkerSupervisor {
    command: WorkerCommand,
    logging_enabled: bool,
}

impl WorkerSupervisor {
    pub fn new(command: WorkerCommand, logging_enabled: bool) -> Self {
        Self {
            command,
            logging_enabled,
        }
    }

    /// Start worker `index`, capturing its stdout
    pub fn spawn(&self, index: usize) -> Result<WorkerHandle> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .arg(index.to_string())
            .arg(self.logging_enabled.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| ScrapeError::PortDiscoveryFailure {
            index,
            reason: "stdout was not captured".to_string(),
        })?;

        info!("Spawned CloudNode {} (pid {:?})", index, child.id());
        Ok(WorkerHandle {
            index,
            child,
            stdout: Some(BufReader::new(stdout).lines()),
            port: None,
        })
    }
}

/// A running worker process
#[derive(Debug)]
pub struct WorkerHandle {
    pub index: usize,
    child: Child,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
    port: Option<u16>,
}

impl WorkerHandle {
    /// Port announced by the worker, once known
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Read stdout until the worker prints a port number
    ///
    /// The first line that parses as a non-zero port wins. Remaining output is
    /// forwarded to the debug log.
    pub async fn wait_for_port(&mut self, timeout: Duration) -> Result<u16> {
        if let Some(port) = self.port {
            return Ok(port);
        }

        let index = self.index;
        let lines = self.stdout.as_mut().ok_or_else(|| ScrapeError::PortDiscoveryFailure {
            index,
            reason: "stdout already consumed".to_string(),
        })?;

        let read = async {
            while let Some(line) = lines.next_line().await? {
                match line.trim().parse::<u16>() {
                    Ok(port) if port > 0 => return Ok(Some(port)),
                    _ => debug!("CloudNode {}: {}", index, line),
                }
            }
            Ok::<_, io::Error>(None)
        };

        let port = match tokio::time::timeout(timeout, read).await {
            Ok(Ok(Some(port))) => port,
            Ok(Ok(None)) => {
                return Err(ScrapeError::PortDiscoveryFailure {
                    index,
                    reason: "stdout closed before a port was printed".to_string(),
                })
            }
            Ok(Err(e)) => {
                return Err(ScrapeError::PortDiscoveryFailure {
                    index,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ScrapeError::PortDiscoveryFailure {
                    index,
                    reason: format!("no port printed within {:?}", timeout),
                })
            }
        };

        info!("CloudNode {} is listening on port {}", index, port);
        self.port = Some(port);
        self.forward_output();
        Ok(port)
    }

    fn forward_output(&mut self) {
        if let Some(mut lines) = self.stdout.take() {
            let index = self.index;
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("CloudNode {}: {}", index, line);
                }
            });
        }
    }

    /// Ask the worker to exit and wait for it
    ///
    /// Sends SIGTERM where available. A worker still running after `grace` is
    /// killed and reported as a shutdown failure.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<()> {
        let index = self.index;

        if let Some(status) = self.child.try_wait()? {
            info!("CloudNode {} already exited with {}", index, status);
            return Ok(());
        }

        self.terminate()?;

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!("CloudNode {} exited with {}", index, status);
                Ok(())
            }
            Ok(Err(e)) => Err(ScrapeError::WorkerShutdownFailure {
                index,
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!("CloudNode {} ignored termination, killing it", index);
                self.child.kill().await?;
                Err(ScrapeError::WorkerShutdownFailure {
                    index,
                    reason: format!("did not exit within {:?}", grace),
                })
            }
        }
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(id) = self.child.id() {
            kill(Pid::from_raw(id as i32), Signal::SIGTERM).map_err(|e| {
                ScrapeError::WorkerShutdownFailure {
                    index: self.index,
                    reason: format!("Failed to send SIGTERM: {}", e),
                }
            })?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> Result<()> {
        self.child.start_kill()?;
        Ok(())
    }
}
