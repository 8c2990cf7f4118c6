//! Subprocess runner for the external image tool (`wit`).
//!
//! The tool is driven through three subcommands:
//! - `extract <image> <tree> --psel=DATA -1ovv`
//! - `dolpatch <main.dol> [NEW=... LOAD=... XML=...] [<address>=<hex>]...`
//! - `copy <tree> <output> -ovv[z] [--id=<id>] [--name "<title>"]`
//!
//! With verbose output the tool prints progress lines containing `NN%`;
//! [`ToolRunner::run_with_progress`] feeds those into a [`ProgressState`].

use crate::models::{GameId, ProgressState};
use crate::services::Completion;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use regex::Regex;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use sysinfo::{ProcessStatus, ProcessesToUpdate, System};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::timeout;

/// Process name of the external tool
pub const TOOL_PROCESS_NAME: &str = "wit";

/// Cadence of cancellation checks while the tool runs
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for a killed process to exit
pub const KILL_TIMEOUT: Duration = Duration::from_secs(5);

static PERCENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)%").expect("Invalid percent regex"));

/// Errors that can occur while running the tool
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool executable not found: {0}")]
    NotFound(Utf8PathBuf),

    #[error("Failed to start tool: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Failed to wait for tool: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Tool exited with code {0}")]
    ExitCode(i32),

    #[error("Tool was terminated without an exit code")]
    Terminated,

    #[error("{0} instance(s) of {1} are still running")]
    InstancesStillRunning(usize, String),
}

/// Code-table load parameters for `dolpatch`
#[derive(Debug, Clone)]
pub struct CodeLoad {
    /// Load address of the code handler (hex text, e.g. `80001800`)
    pub loader_address: String,
    /// Size of the handler region (hex text, e.g. `10C0`)
    pub handler_size: String,
    pub codehandler: Utf8PathBuf,
    pub patch_xml: Utf8PathBuf,
    /// Where the code table is loaded
    pub offset: u32,
    pub gct: Utf8PathBuf,
    pub gct_size: u64,
}

/// A single tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    args: Vec<String>,
}

impl ToolCommand {
    pub fn extract(image: &Utf8Path, tree: &Utf8Path) -> Self {
        Self {
            args: vec![
                "extract".to_string(),
                image.to_string(),
                tree.to_string(),
                "--psel=DATA".to_string(),
                "-1ovv".to_string(),
            ],
        }
    }

    /// Build a `dolpatch` invocation.
    ///
    /// `address_patches` maps a hex address to the hex bytes written there,
    /// emitted in insertion order.
    pub fn dolpatch(
        dol: &Utf8Path,
        code_load: Option<&CodeLoad>,
        address_patches: &IndexMap<String, String>,
    ) -> Self {
        let mut args = vec!["dolpatch".to_string(), dol.to_string()];

        if let Some(load) = code_load {
            args.push(format!(
                "NEW=TEXT,{},{}",
                load.loader_address, load.handler_size
            ));
            args.push(format!("LOAD={},{}", load.loader_address, load.codehandler));
            args.push(format!("XML={}", load.patch_xml));
            args.push(format!("NEW=DATA,{:08X},{:X}", load.offset, load.gct_size));
            args.push(format!("LOAD={:08X},{}", load.offset, load.gct));
        }

        for (address, bytes) in address_patches {
            args.push(format!("{}={}", address, bytes));
        }

        Self { args }
    }

    pub fn copy(
        tree: &Utf8Path,
        output: &Utf8Path,
        split: bool,
        id: Option<&GameId>,
        title: Option<&str>,
    ) -> Self {
        let mut args = vec![
            "copy".to_string(),
            tree.to_string(),
            output.to_string(),
            if split { "-ovvz" } else { "-ovv" }.to_string(),
        ];

        if let Some(id) = id {
            args.push(format!("--id={}", id));
        }
        if let Some(title) = title {
            args.push("--name".to_string());
            args.push(title.to_string());
        }

        Self { args }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Shell-style rendering for logs; arguments with spaces are quoted.
    pub fn command_line(&self) -> String {
        self.args
            .iter()
            .map(|arg| {
                if arg.is_empty() || arg.contains(char::is_whitespace) {
                    format!("\"{}\"", arg)
                } else {
                    arg.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Extract the last `NN%` value in a line of tool output.
pub fn parse_percent(line: &str) -> Option<u64> {
    PERCENT_PATTERN
        .captures_iter(line)
        .last()
        .and_then(|captures| captures[1].parse::<u64>().ok())
        .map(|value| value.min(100))
}

/// Launches the tool.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    program: Utf8PathBuf,
    launcher: Option<String>,
    show_window: bool,
}

impl ToolRunner {
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            launcher: None,
            show_window: false,
        }
    }

    /// Run the tool through another program (e.g. `wine` or `sh`)
    pub fn via(mut self, launcher: impl Into<String>) -> Self {
        self.launcher = Some(launcher.into());
        self
    }

    /// Let the tool write straight to the console
    pub fn show_window(mut self, show: bool) -> Self {
        self.show_window = show;
        self
    }

    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    pub fn shows_window(&self) -> bool {
        self.show_window
    }

    pub fn ensure_available(&self) -> Result<(), ToolError> {
        if self.program.is_file() {
            Ok(())
        } else {
            Err(ToolError::NotFound(self.program.clone()))
        }
    }

    fn command(&self, tool: &ToolCommand) -> Command {
        let mut cmd = match &self.launcher {
            Some(launcher) => {
                let mut c = Command::new(launcher);
                c.arg(self.program.as_str());
                c
            }
            None => Command::new(self.program.as_std_path()),
        };
        cmd.args(tool.args()).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    /// Run to completion without progress capture.
    ///
    /// Output goes to the console when the window is shown and is discarded
    /// otherwise. A non-zero exit code is an error.
    pub async fn run(&self, tool: &ToolCommand) -> Result<(), ToolError> {
        tracing::info!("Executing: {} {}", self.program, tool.command_line());
        let start = Instant::now();

        let mut cmd = self.command(tool);
        if !self.show_window {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let status = cmd
            .spawn()
            .map_err(ToolError::Spawn)?
            .wait()
            .await
            .map_err(ToolError::Wait)?;

        tracing::info!(
            "Tool completed in {:.2}s with status {}",
            start.elapsed().as_secs_f32(),
            status
        );

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(ToolError::ExitCode(code)),
            None => Err(ToolError::Terminated),
        }
    }

    /// Run with stdout captured, publishing `NN%` lines to `progress`.
    ///
    /// Cancellation is observed on `cancel` and on every [`POLL_INTERVAL`]
    /// tick. A cancelled run kills the tool, waits up to [`KILL_TIMEOUT`] for
    /// it to exit and returns [`Completion::Cancelled`]; the kill itself is
    /// not reported as a failure.
    pub async fn run_with_progress(
        &self,
        tool: &ToolCommand,
        progress: &ProgressState,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Completion<()>, ToolError> {
        tracing::info!("Executing with progress: {} {}", self.program, tool.command_line());
        let start = Instant::now();
        progress.reset(100);

        let mut child = self
            .command(tool)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(ToolError::Spawn)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            ToolError::Spawn(std::io::Error::other("tool stdout was not captured"))
        })?;
        let mut lines = BufReader::new(stdout).lines();

        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        let mut stdout_open = true;
        let mut cancel_live = true;

        loop {
            if *cancel.borrow() {
                terminate_child(&mut child).await;
                tracing::warn!("Tool cancelled after {:.2}s", start.elapsed().as_secs_f32());
                return Ok(Completion::Cancelled);
            }

            tokio::select! {
                line = lines.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => {
                        if let Some(percent) = parse_percent(&line) {
                            progress.set_current(percent);
                        }
                    }
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        tracing::warn!("Failed to read tool output: {}", e);
                        stdout_open = false;
                    }
                },
                status = child.wait(), if !stdout_open => {
                    let status = status.map_err(ToolError::Wait)?;
                    tracing::info!(
                        "Tool completed in {:.2}s with status {}",
                        start.elapsed().as_secs_f32(),
                        status
                    );
                    return match status.code() {
                        Some(0) => Ok(Completion::Done(())),
                        Some(code) => Err(ToolError::ExitCode(code)),
                        None => Err(ToolError::Terminated),
                    };
                }
                changed = cancel.changed(), if cancel_live => {
                    // A dropped sender can no longer cancel
                    if changed.is_err() {
                        cancel_live = false;
                    }
                }
                _ = ticker.tick() => {}
            }
        }
    }
}

/// Kill `child` and wait up to [`KILL_TIMEOUT`] for it to exit.
async fn terminate_child(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::warn!("Failed to kill tool process: {}", e);
    }

    match timeout(KILL_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!("Killed tool exited with {}", status),
        Ok(Err(e)) => tracing::warn!("Failed to reap killed tool: {}", e),
        Err(_) => tracing::warn!(
            "Tool did not exit within {:?} after kill, continuing",
            KILL_TIMEOUT
        ),
    }
}

/// Whether an OS process name refers to `tool` (`wit`, `wit.exe`, `WIT.EXE`)
pub fn process_name_matches(process_name: &str, tool: &str) -> bool {
    let lower = process_name.to_lowercase();
    let stem = lower.strip_suffix(".exe").unwrap_or(&lower);
    stem == tool.to_lowercase()
}

fn running_pids(system: &System, tool: &str) -> Vec<sysinfo::Pid> {
    system
        .processes()
        .iter()
        // A killed child nobody has reaped yet is not running
        .filter(|(_, process)| process.status() != ProcessStatus::Zombie)
        .filter(|(_, process)| process_name_matches(&process.name().to_string_lossy(), tool))
        .map(|(pid, _)| *pid)
        .collect()
}

/// Number of running processes named like `tool`.
pub fn running_instances(tool: &str) -> usize {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    running_pids(&system, tool).len()
}

/// Kill every running instance of `tool` and wait up to [`KILL_TIMEOUT`]
/// for them to disappear. Blocking; run it off the async workers.
pub fn terminate_instances(tool: &str) -> Result<(), ToolError> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    for pid in running_pids(&system, tool) {
        if let Some(process) = system.process(pid) {
            tracing::info!("Killing stray {} process {}", tool, pid);
            if !process.kill() {
                tracing::warn!("Kill signal to process {} was not delivered", pid);
            }
        }
    }

    let deadline = Instant::now() + KILL_TIMEOUT;
    loop {
        system.refresh_processes(ProcessesToUpdate::All, true);
        let remaining = running_pids(&system, tool).len();
        if remaining == 0 {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(ToolError::InstancesStillRunning(remaining, tool.to_string()));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
