//! Process runner: synchronous shell commands with timeouts and bounded
//! output, detached background commands, and termination by PID.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success() && !self.timed_out
    }

    /// Step-facing text: trimmed stdout on success, trimmed stderr otherwise.
    ///
    /// A failing command that wrote nothing to stderr reports its stdout and exit code instead,
    /// so the recovery prompt never receives an empty error.
    pub fn summary(&self, timeout: Duration) -> String {
        if self.timed_out {
            return format!("command timed out after {}s", timeout.as_secs());
        }
        if self.status.success() {
            return String::from_utf8_lossy(&self.stdout).trim().to_string();
        }
        let stderr = String::from_utf8_lossy(&self.stderr).trim().to_string();
        if !stderr.is_empty() {
            return stderr;
        }
        let stdout = String::from_utf8_lossy(&self.stdout).trim().to_string();
        match self.status.code() {
            Some(code) if stdout.is_empty() => format!("command exited with status {code}"),
            Some(code) => format!("command exited with status {code}\n{stdout}"),
            None if stdout.is_empty() => "command terminated by signal".to_string(),
            None => format!("command terminated by signal\n{stdout}"),
        }
    }
}

/// How to launch shell command lines relative to a working directory.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ProcessRunner {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
            output_limit_bytes,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a shell command line to completion, optionally inside a virtual environment.
    pub fn run(&self, command_line: &str, venv: Option<&Path>) -> Result<CommandOutput> {
        debug!(command = %command_line, "running command");
        let cmd = self.shell_command(command_line, venv);
        run_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run `{command_line}`"))
    }

    /// Run a program with explicit arguments (no shell) to completion.
    pub fn run_program(&self, program: &Path, args: &[&str]) -> Result<CommandOutput> {
        debug!(program = %program.display(), ?args, "running program");
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        run_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run {}", program.display()))
    }

    /// Spawn a shell command line detached from this process and return its PID.
    ///
    /// The child gets its own process group (Unix) so that termination reaches
    /// everything it starts. A reaper thread waits on it so it never lingers as a zombie.
    #[instrument(skip_all, fields(command = %command_line))]
    pub fn spawn_detached(&self, command_line: &str, venv: Option<&Path>) -> Result<u32> {
        let mut cmd = self.shell_command(command_line, venv);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        own_process_group(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                error!(err = %e, "failed to spawn background command");
                return Err(e).context("spawn background command");
            }
        };
        let pid = child.id();
        thread::spawn(move || {
            let _ = child.wait();
        });
        debug!(pid, "background command started");
        Ok(pid)
    }

    fn shell_command(&self, command_line: &str, venv: Option<&Path>) -> Command {
        let mut cmd = if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command_line);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command_line);
            cmd
        };
        cmd.current_dir(&self.workdir);
        if let Some(venv) = venv {
            let bin = venv_bin_dir(venv);
            let mut path = OsString::from(bin.as_os_str());
            if let Some(existing) = std::env::var_os("PATH") {
                path.push(if cfg!(windows) { ";" } else { ":" });
                path.push(existing);
            }
            cmd.env("PATH", path).env("VIRTUAL_ENV", venv);
        }
        cmd
    }
}

/// Directory holding a virtual environment's executables.
pub fn venv_bin_dir(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts")
    } else {
        venv.join("bin")
    }
}

/// Interpreter inside a virtual environment.
pub fn venv_python(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv_bin_dir(venv).join("python.exe")
    } else {
        venv_bin_dir(venv).join("python")
    }
}

/// Start the child as the leader of a new process group.
#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// Kill a timed-out child together with everything it spawned.
///
/// Grandchildren hold the output pipes open, so killing only the shell would
/// leave the readers blocked until they exit on their own.
#[cfg(unix)]
fn kill_tree(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pid = i32::try_from(child.id()).map_err(|_| anyhow!("pid {} out of range", child.id()))?;
    if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        warn!(pid, err = %err, "kill process group failed, killing child only");
        child.kill().context("kill command")?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> Result<()> {
    let status = Command::new("taskkill")
        .args(["/PID", &child.id().to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if !matches!(status, Ok(ref s) if s.success()) {
        warn!(pid = child.id(), "taskkill failed, killing child only");
    }
    child.kill().context("kill command")
}

/// Terminate a background process (and its process group on Unix).
#[cfg(unix)]
pub fn terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{Signal, kill, killpg};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| anyhow!("pid {pid} out of range"))?;
    if raw <= 0 {
        return Err(anyhow!("refusing to signal pid {pid}"));
    }
    let target = Pid::from_raw(raw);
    match killpg(target, Signal::SIGTERM) {
        Ok(()) => Ok(()),
        // Not a group leader (e.g. recorded by an older run): signal the process itself.
        Err(group_err) => kill(target, Signal::SIGTERM)
            .map_err(|err| anyhow!("terminate pid {pid}: {err} (group: {group_err})")),
    }
}

/// Terminate a background process tree.
#[cfg(not(unix))]
pub fn terminate(pid: u32) -> Result<()> {
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("spawn taskkill")?;
    if !status.success() {
        return Err(anyhow!("taskkill failed for pid {pid} ({status})"));
    }
    Ok(())
}

/// Run a command to completion, killing it after `timeout`.
///
/// Both pipes are drained on their own threads while the child runs; bytes past
/// `output_limit_bytes` are counted and dropped.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    own_process_group(&mut cmd);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            kill_tree(&mut child)?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
