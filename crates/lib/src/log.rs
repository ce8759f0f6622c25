//! User-facing staging output.
//!
//! Buildpack staging output follows a fixed visual protocol (`-----> step`,
//! indented detail lines, `**WARNING**` and `**ERROR**` markers) that the
//! hosting platform streams to the user. `StepLog` is that output channel. It is
//! created once per invocation and handed to every component that reports
//! progress, instead of being process-global. Diagnostics for operators go
//! through `tracing` as usual.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

const STEP_PREFIX: &str = "-----> ";
const DETAIL_PREFIX: &str = "       ";

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Output channel for staging progress.
#[derive(Clone)]
pub struct StepLog {
  sink: Sink,
}

impl std::fmt::Debug for StepLog {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StepLog").finish_non_exhaustive()
  }
}

impl StepLog {
  pub fn new(writer: impl Write + Send + 'static) -> Self {
    Self {
      sink: Arc::new(Mutex::new(Box::new(writer))),
    }
  }

  pub fn stdout() -> Self {
    Self::new(io::stdout())
  }

  /// Discards everything.
  pub fn sink() -> Self {
    Self::new(io::sink())
  }

  /// A log whose output can be read back, for tests and embedding callers.
  pub fn capture() -> (Self, CapturedOutput) {
    let buffer = CapturedOutput::default();
    (Self::new(buffer.clone()), buffer)
  }

  pub fn begin_step(&self, message: &str) {
    self.write_line(STEP_PREFIX, message);
  }

  pub fn info(&self, message: &str) {
    self.write_line(DETAIL_PREFIX, message);
  }

  pub fn warning(&self, message: &str) {
    self.write_line(&format!("{}**WARNING** ", DETAIL_PREFIX), message);
  }

  pub fn error(&self, message: &str) {
    self.write_line(&format!("{}**ERROR** ", DETAIL_PREFIX), message);
  }

  fn write_line(&self, prefix: &str, message: &str) {
    let mut sink = lock(&*self.sink);
    // Output failures must never fail a staging run.
    let _ = writeln!(sink, "{}{}", prefix, message);
    let _ = sink.flush();
  }
}

/// Shared in-memory buffer backing `StepLog::capture`.
#[derive(Clone, Default)]
pub struct CapturedOutput {
  buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
  pub fn contents(&self) -> String {
    String::from_utf8_lossy(&lock(&*self.buffer)).into_owned()
  }
}

impl Write for CapturedOutput {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    lock(&*self.buffer).extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
