//! External process execution for build steps.
//!
//! Every step runs with a cleared environment rebuilt from the ambient
//! snapshot plus the step's [`EnvOverlay`]. Output is streamed line by line
//! to `tracing` and the last lines are kept for error reports. Steps are
//! blocking calls on the unit's worker thread; a [`CancelToken`] is polled
//! while the child runs.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{Span, debug, info, warn};

use crate::env::{AmbientEnv, EnvOverlay};

const DEFAULT_TAIL_LINES: usize = 20;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ProcessError {
  #[error("failed to start '{cmd}': {source}")]
  Spawn {
    cmd: String,
    #[source]
    source: std::io::Error,
  },

  #[error("'{cmd}' exited with {}", exit_description(*.code))]
  Failed {
    cmd: String,
    code: Option<i32>,
    tail: Vec<String>,
  },

  #[error("'{cmd}' was cancelled")]
  Cancelled { cmd: String },

  #[error("failed waiting for '{cmd}': {source}")]
  Wait {
    cmd: String,
    #[source]
    source: std::io::Error,
  },
}

impl ProcessError {
  /// Last output lines of the failed command, if any were captured.
  pub fn tail(&self) -> &[String] {
    match self {
      ProcessError::Failed { tail, .. } => tail,
      _ => &[],
    }
  }
}

fn exit_description(code: Option<i32>) -> String {
  match code {
    Some(code) => format!("exit code {}", code),
    None => "no exit code (killed by signal)".to_string(),
  }
}

/// One external command: argv, working directory and environment edits.
#[derive(Debug, Clone)]
pub struct Invocation {
  program: OsString,
  args: Vec<OsString>,
  cwd: PathBuf,
  env: EnvOverlay,
}

impl Invocation {
  pub fn new(program: impl Into<OsString>, cwd: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      cwd: cwd.into(),
      env: EnvOverlay::new(),
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

  pub fn env(mut self, overlay: EnvOverlay) -> Self {
    self.env = self.env.extend(overlay);
    self
  }

  pub fn cwd(&self) -> &Path {
    &self.cwd
  }

  /// The command line as shown in logs and errors.
  pub fn display(&self) -> String {
    std::iter::once(&self.program)
      .chain(&self.args)
      .map(|s| s.to_string_lossy())
      .collect::<Vec<_>>()
      .join(" ")
  }
}

/// Shared flag asking running steps to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
  pub code: i32,
  pub tail: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
  ambient: Arc<AmbientEnv>,
  cancel: CancelToken,
  tail_lines: usize,
  poll_interval: Duration,
}

impl ProcessRunner {
  pub fn new(ambient: AmbientEnv) -> Self {
    Self {
      ambient: Arc::new(ambient),
      cancel: CancelToken::new(),
      tail_lines: DEFAULT_TAIL_LINES,
      poll_interval: DEFAULT_POLL_INTERVAL,
    }
  }

  pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn with_tail_lines(mut self, lines: usize) -> Self {
    self.tail_lines = lines;
    self
  }

  pub fn ambient(&self) -> &AmbientEnv {
    &self.ambient
  }

  pub fn cancel_token(&self) -> &CancelToken {
    &self.cancel
  }

  /// Runs `invocation` to completion. Non-zero exit is [`ProcessError::Failed`].
  pub fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
    let cmd = invocation.display();
    if self.cancel.is_cancelled() {
      return Err(ProcessError::Cancelled { cmd });
    }

    let mut command = Command::new(&invocation.program);
    command
      .args(&invocation.args)
      .current_dir(&invocation.cwd)
      .env_clear()
      .envs(invocation.env.resolve(&self.ambient))
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());

    #[cfg(unix)]
    {
      use std::os::unix::process::CommandExt;
      command.process_group(0);
    }

    debug!(cmd = %cmd, cwd = ?invocation.cwd, "spawning process");
    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
      cmd: cmd.clone(),
      source,
    })?;

    let tail = Arc::new(Mutex::new(VecDeque::with_capacity(self.tail_lines)));
    let readers: Vec<JoinHandle<()>> = [
      child.stdout.take().map(|s| self.spawn_reader(s, "stdout", tail.clone())),
      child.stderr.take().map(|s| self.spawn_reader(s, "stderr", tail.clone())),
    ]
    .into_iter()
    .flatten()
    .collect();

    let waited = self.wait(&mut child, &cmd);
    for reader in readers {
      let _ = reader.join();
    }
    let status = waited?;

    let tail: Vec<String> = tail.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect();
    match status.code() {
      Some(0) => Ok(ProcessOutput { code: 0, tail }),
      code => Err(ProcessError::Failed { cmd, code, tail }),
    }
  }

  fn wait(&self, child: &mut Child, cmd: &str) -> Result<ExitStatus, ProcessError> {
    loop {
      if self.cancel.is_cancelled() {
        warn!(cmd = %cmd, "cancelling process");
        terminate(child);
        let _ = child.wait();
        return Err(ProcessError::Cancelled { cmd: cmd.to_string() });
      }

      match child.try_wait() {
        Ok(Some(status)) => return Ok(status),
        Ok(None) => thread::sleep(self.poll_interval),
        Err(source) => {
          terminate(child);
          let _ = child.wait();
          return Err(ProcessError::Wait {
            cmd: cmd.to_string(),
            source,
          });
        }
      }
    }
  }

  fn spawn_reader<R>(&self, stream: R, name: &'static str, tail: Arc<Mutex<VecDeque<String>>>) -> JoinHandle<()>
  where
    R: Read + Send + 'static,
  {
    let span = Span::current();
    let capacity = self.tail_lines;
    thread::spawn(move || {
      let _enter = span.enter();
      let mut reader = BufReader::new(stream);
      let mut buf = Vec::new();
      loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
          Ok(0) | Err(_) => break,
          Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&buf).trim_end_matches(['\r', '\n']).to_string();
        info!(target: "partkit::process", stream = name, "{}", line);

        if capacity > 0 {
          let mut tail = tail.lock().unwrap_or_else(|e| e.into_inner());
          if tail.len() == capacity {
            tail.pop_front();
          }
          tail.push_back(line);
        }
      }
    })
  }
}

/// Kills the child together with everything it spawned.
#[cfg(unix)]
fn terminate(child: &mut Child) {
  use rustix::process::{Pid, Signal, kill_process_group};

  if let Some(pgid) = Pid::from_raw(child.id() as i32)
    && kill_process_group(pgid, Signal::KILL).is_ok()
  {
    return;
  }
  let _ = child.kill();
}

#[cfg(windows)]
fn terminate(child: &mut Child) {
  let _ = child.kill();
}
