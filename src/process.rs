/// Blocking external command execution with a deadline.
///
/// Used for the Yul compiler and the hashing utility. stdout/stderr are drained on
/// helper threads so a chatty child cannot block on a full pipe while we poll it.
use crate::error::{LinkError, Result};
use std::ffi::OsStr;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
}

/// Run `program` with `args`, failing on spawn errors, non-zero exit, or timeout.
/// stderr is logged as a warning rather than returned.
pub fn run_with_timeout<I, S>(program: &str, args: I, timeout: Duration) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    debug!("running {:?}", command);

    let invocation_error = |message: String| LinkError::CompilerInvocation { program: program.to_string(), message };

    let mut child = command.spawn().map_err(|e| invocation_error(e.to_string()))?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if started.elapsed() >= timeout => {
                if let Err(e) = child.kill() {
                    warn!("failed to kill {}: {}", program, e);
                }
                let _ = child.wait();
                return Err(LinkError::CompilerTimeout { program: program.to_string(), timeout });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(invocation_error(e.to_string())),
        }
    };

    let stdout = stdout.map(join_drain).transpose().map_err(invocation_error)?.unwrap_or_default();
    let stderr = stderr.map(join_drain).transpose().map_err(invocation_error)?.unwrap_or_default();

    if !stderr.trim().is_empty() {
        warn!("{}: {}", program, stderr.trim());
    }

    if !status.success() {
        return Err(invocation_error(format!("exited with {}", status)));
    }

    Ok(CommandOutput { stdout })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<std::io::Result<String>> {
    thread::spawn(move || {
        let mut text = String::new();
        pipe.read_to_string(&mut text)?;
        Ok(text)
    })
}

fn join_drain(handle: thread::JoinHandle<std::io::Result<String>>) -> std::result::Result<String, String> {
    match handle.join() {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(format!("failed to read output: {}", e)),
        Err(_) => Err("output reader panicked".to_string()),
    }
}
