use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, ExitStatus};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::buffer::{AppendOutcome, CaptureBuffer, OutputStream, EXIT_CODE_WAIT_FAILED};
use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::query::QueryService;
use crate::registry::{HandleId, HandleRegistry};

/// Listing entry for one live handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleSummary {
    pub id: HandleId,
    pub command: String,
    pub complete: bool,
    pub exit_code: Option<i32>,
    pub line_count: usize,
}

/// Spawns shell commands and streams their output into registry-owned buffers.
#[derive(Debug)]
pub struct CaptureEngine {
    config: CaptureConfig,
    registry: Arc<HandleRegistry>,
    query: QueryService,
}

impl Default for CaptureEngine {
    fn default() -> Self {
        Self::new(CaptureConfig::default())
    }
}

impl CaptureEngine {
    #[must_use]
    pub fn new(config: CaptureConfig) -> Self {
        Self::with_registry(config, Arc::new(HandleRegistry::new()))
    }

    #[must_use]
    pub fn with_registry(config: CaptureConfig, registry: Arc<HandleRegistry>) -> Self {
        Self {
            config,
            query: QueryService::new(Arc::clone(&registry)),
            registry,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn query(&self) -> &QueryService {
        &self.query
    }

    /// Starts `command` under the configured shell and returns its handle immediately.
    ///
    /// The handle is registered before the process is spawned, so it is visible to
    /// lookups even before any output arrives. Pipe or spawn failures are returned
    /// here; failures after the process started end up in the handle's exit code.
    pub fn run_with_capture(&self, command: &str) -> Result<HandleId, CaptureError> {
        let id = self.registry.allocate();
        let buffer = Arc::new(CaptureBuffer::new(id, command, self.config.max_lines));
        self.registry.register(id, Arc::clone(&buffer))?;

        match self.spawn_capture(&buffer) {
            Ok(pid) => {
                debug!(handle = id, pid, command, "started captured command");
                Ok(id)
            }
            Err(error) => {
                let _ = self.registry.remove(id);
                warn!(handle = id, command, %error, "failed to start captured command");
                Err(error)
            }
        }
    }

    /// Waits at most `timeout` for the handle to complete.
    pub fn wait_for_completion(
        &self,
        id: HandleId,
        timeout: Duration,
    ) -> Result<bool, CaptureError> {
        let buffer = self.registry.lookup(id)?;
        Ok(buffer.wait_for_completion(timeout))
    }

    #[must_use]
    pub fn list(&self) -> Vec<HandleSummary> {
        self.registry
            .buffers()
            .into_iter()
            .map(|buffer| {
                let stats = buffer.stats();
                HandleSummary {
                    id: stats.id,
                    command: stats.command,
                    complete: stats.complete,
                    exit_code: stats.exit_code,
                    line_count: stats.line_count,
                }
            })
            .collect()
    }

    /// Releases a handle. A still-running process keeps running; its output is discarded.
    pub fn remove(&self, id: HandleId) -> Result<(), CaptureError> {
        self.registry.remove(id)?;
        debug!(handle = id, "released handle");
        Ok(())
    }

    fn spawn_capture(&self, buffer: &Arc<CaptureBuffer>) -> Result<u32, CaptureError> {
        let command = buffer.command();
        let mut child = self
            .config
            .command_for(command)
            .spawn()
            .map_err(|source| CaptureError::spawn(command, source))?;
        let pid = child.id();

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            kill_and_reap(&mut child);
            return Err(CaptureError::spawn(
                command,
                io::Error::other("output pipes were not created"),
            ));
        };

        let stdout_reader = match spawn_reader(Arc::clone(buffer), OutputStream::Stdout, stdout, "")
        {
            Ok(reader) => reader,
            Err(source) => {
                kill_and_reap(&mut child);
                return Err(CaptureError::spawn(command, source));
            }
        };

        let stderr_reader = match spawn_reader(
            Arc::clone(buffer),
            OutputStream::Stderr,
            stderr,
            self.config.effective_stderr_prefix(),
        ) {
            Ok(reader) => reader,
            Err(source) => {
                kill_and_reap(&mut child);
                let _ = stdout_reader.join();
                return Err(CaptureError::spawn(command, source));
            }
        };

        let watcher = CompletionWatcher {
            buffer: Arc::clone(buffer),
            child: Some(child),
            readers: vec![stdout_reader, stderr_reader],
        };

        // On spawn failure the closure is dropped, and the watcher's Drop reaps the child.
        thread::Builder::new()
            .name(format!("capture-{}-wait", buffer.id()))
            .spawn(move || watcher.run())
            .map_err(|source| CaptureError::spawn(command, source))?;

        Ok(pid)
    }
}

/// Joins both readers, then waits for the exit status and finalizes the buffer.
struct CompletionWatcher {
    buffer: Arc<CaptureBuffer>,
    child: Option<Child>,
    readers: Vec<JoinHandle<()>>,
}

impl CompletionWatcher {
    fn run(mut self) {
        for reader in self.readers.drain(..) {
            if reader.join().is_err() {
                warn!(handle = self.buffer.id(), "output reader panicked");
            }
        }

        let Some(mut child) = self.child.take() else {
            return;
        };

        let exit_code = match child.wait() {
            Ok(status) => exit_code_from_status(status),
            Err(error) => {
                warn!(handle = self.buffer.id(), %error, "failed to wait for captured command");
                EXIT_CODE_WAIT_FAILED
            }
        };

        self.buffer.finish(exit_code);
        debug!(
            handle = self.buffer.id(),
            exit_code,
            lines = self.buffer.line_count(),
            "captured command completed"
        );
    }
}

impl Drop for CompletionWatcher {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            kill_and_reap(&mut child);
            self.buffer.finish(EXIT_CODE_WAIT_FAILED);
        }
    }
}

fn spawn_reader<R>(
    buffer: Arc<CaptureBuffer>,
    stream: OutputStream,
    pipe: R,
    prefix: &str,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let prefix = prefix.to_string();
    thread::Builder::new()
        .name(format!("capture-{}-{}", buffer.id(), stream.as_str()))
        .spawn(move || drain_lines(&buffer, stream, pipe, &prefix))
}

fn drain_lines(buffer: &CaptureBuffer, stream: OutputStream, pipe: impl Read, prefix: &str) {
    let mut reader = BufReader::new(pipe);
    let mut raw = Vec::new();
    let mut reported_cap = false;

    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw) {
            Ok(0) => break,
            Ok(_) => {
                let outcome = buffer.append_line(decode_line(&raw, prefix));
                if outcome == AppendOutcome::Dropped && !reported_cap {
                    reported_cap = true;
                    warn!(
                        handle = buffer.id(),
                        stream = stream.as_str(),
                        "line cap reached; further output is counted but not stored"
                    );
                }
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => {
                warn!(handle = buffer.id(), stream = stream.as_str(), %error, "output read failed");
                break;
            }
        }
    }
}

fn decode_line(raw: &[u8], prefix: &str) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let text = String::from_utf8_lossy(line);

    if prefix.is_empty() {
        text.into_owned()
    } else {
        format!("{prefix}{text}")
    }
}

fn exit_code_from_status(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    EXIT_CODE_WAIT_FAILED
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
