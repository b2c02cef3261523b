// SPDX-License-Identifier: GPL-3.0-only

//! External tool execution

use std::io::Write;
use std::process::{Command, Stdio};

use crate::{Result, SysError};

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout and stderr joined, for diagnostics.
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

/// Shell-like rendering of a command, used in logs and detail text.
pub fn command_line(command: &str, args: &[&str]) -> String {
    std::iter::once(command)
        .chain(args.iter().copied())
        .map(|part| {
            if part.is_empty() || part.contains(char::is_whitespace) {
                format!("'{part}'")
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn tool_available(tool: &str) -> bool {
    which::which(tool).is_ok()
}

fn spawn_error(command: &str, err: std::io::Error) -> SysError {
    if err.kind() == std::io::ErrorKind::NotFound {
        SysError::CommandFailed {
            command: command.to_string(),
            output: "command not found".to_string(),
        }
    } else {
        SysError::Io(err)
    }
}

/// Run a command and capture its output whatever the exit status.
pub fn run_command_output(command: &str, args: &[&str]) -> Result<CommandOutput> {
    tracing::debug!("Running {}", command_line(command, args));
    let output = Command::new(command)
        .args(args)
        .output()
        .map_err(|e| spawn_error(command, e))?;
    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run a command and return its stdout; a non-zero exit is an error.
pub fn run_command(command: &str, args: &[&str]) -> Result<String> {
    let output = run_command_output(command, args)?;
    if !output.success {
        return Err(SysError::CommandFailed {
            command: command_line(command, args),
            output: output.combined(),
        });
    }
    Ok(output.stdout)
}

/// Run a command feeding `input` on stdin.
pub fn run_command_with_input(command: &str, args: &[&str], input: &str) -> Result<String> {
    tracing::debug!("Running {} with {} bytes of input", command_line(command, args), input.len());
    let mut child = Command::new(command)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(command, e))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes())?;
    }

    let output = child.wait_with_output()?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SysError::CommandFailed {
            command: command_line(command, args),
            output: format!("{}\n{}", stdout.trim(), stderr.trim()).trim().to_string(),
        });
    }
    Ok(stdout)
}
