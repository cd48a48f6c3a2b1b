//! Running external programs.

use std::process::Command;

use crate::error::{Error, Result};

/// Captured output of a finished program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs a program to completion.
pub trait CommandRunner {
    /// Run `program` with `args`. A non-zero exit is not an error at this level.
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// Run and require success, returning stdout.
    fn run_checked(&self, program: &str, args: &[String]) -> Result<String> {
        let output = self.run(program, args)?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(Error::Command {
                command: format!("{} {}", program, args.join(" ")),
                status: output
                    .code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                stderr: output.stderr,
            })
        }
    }
}

/// Runs programs on the local system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        tracing::debug!(%program, args = ?args, "running command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| Error::Spawn {
                program: program.to_string(),
                source,
            })?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedRunner;
    use super::*;

    #[test]
    fn test_run_checked_reports_stderr() {
        let runner = ScriptedRunner::new([CommandOutput::failed(2, "no such socket")]);
        let err = runner
            .run_checked("ovn-appctl", &["-t".to_string(), "x.ctl".to_string()])
            .unwrap_err();
        assert_eq!(err.detail(), "no such socket");
        assert!(err.to_string().contains("ovn-appctl -t x.ctl"));
    }
}
