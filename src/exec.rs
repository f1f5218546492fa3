//! Subprocess execution shared by mounting, name translation, and the copy
//! planner. Mirrors `execute()` in the original `synkrotron.py`: spawn,
//! optionally feed stdin, optionally capture stdout, return the exit code.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use tracing::debug;

/// Output of a subprocess invocation.
pub struct Output {
    pub status: i32,
    pub stdout: Vec<u8>,
}

/// Run `program` with `args`, optionally writing `stdin_data` to its stdin
/// and optionally capturing stdout. `cwd` and extra `env` are applied when
/// present. Never panics on a non-zero exit; the caller decides what a
/// non-zero status means.
pub fn run(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    stdin_data: Option<&str>,
    capture_stdout: bool,
    env: &HashMap<String, String>,
) -> std::io::Result<Output> {
    debug!(program, ?args, "spawning external process");
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    for (k, v) in env {
        cmd.env(k, v);
    }
    cmd.stdin(if stdin_data.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(if capture_stdout {
        Stdio::piped()
    } else {
        Stdio::inherit()
    });
    cmd.stderr(Stdio::inherit());

    let mut child = cmd.spawn()?;
    // Write stdin from a separate thread so a child that starts emitting
    // stdout before it has finished reading stdin can't deadlock against us:
    // with both on the same thread, a full stdout pipe buffer would block
    // this write while the child blocks writing stdout because nobody is
    // draining it yet. `wait_with_output` below drains stdout concurrently
    // with this thread's write, mirroring `Popen(...).communicate()`.
    let writer = child.stdin.take().map(|mut stdin| {
        let payload = stdin_data.map(|data| {
            let mut payload = data.to_string();
            if !payload.ends_with('\n') {
                payload.push('\n');
            }
            payload
        });
        thread::spawn(move || -> std::io::Result<()> {
            if let Some(payload) = payload {
                stdin.write_all(payload.as_bytes())?;
            }
            Ok(())
        })
    });
    let result = child.wait_with_output()?;
    if let Some(handle) = writer {
        handle.join().expect("stdin-writer thread panicked")?;
    }
    Ok(Output {
        status: result.status.code().unwrap_or(-1),
        stdout: result.stdout,
    })
}

/// Verify a required external tool is resolvable on `PATH` up front, so a
/// missing tool surfaces as a clear `MountError`/`ExternalHelperError`
/// rather than a raw `ENOENT` from `Command::spawn`.
pub fn require_tool(name: &'static str) -> bool {
    which::which(name).is_ok()
}
