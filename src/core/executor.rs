//! External command execution.
//!
//! Deploy procedures describe each external command as an [`Invocation`] and
//! hand it to an [`Executor`]. `SystemExecutor` spawns the process;
//! `RecordingExecutor` only records it, which backs `--dry-run` and tests.

use std::collections::VecDeque;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::error::{CommandFailedDetails, Error, Result};
use crate::utils::shell;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Fed to the child's stdin, never rendered.
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Shell-quoted command line for logs and reports.
    pub fn render(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        shell::quote_args(&parts)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            exit_code: 0,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
            exit_code,
        }
    }
}

pub trait Executor: Send + Sync {
    fn run(&self, invocation: &Invocation) -> CommandOutput;
    fn sleep(&self, duration: Duration);
}

pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn run(&self, invocation: &Invocation) -> CommandOutput {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return CommandOutput::failed(
                    127,
                    format!("Failed to start {}: {}", invocation.program, e),
                )
            }
        };

        if let (Some(input), Some(mut stdin)) = (&invocation.stdin, child.stdin.take()) {
            if let Err(e) = stdin.write_all(input.as_bytes()) {
                let _ = child.kill();
                let _ = child.wait();
                return CommandOutput::failed(-1, format!("Failed to write stdin: {}", e));
            }
        }

        match child.wait_with_output() {
            Ok(out) => CommandOutput {
                stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                success: out.status.success(),
                exit_code: out.status.code().unwrap_or(-1),
            },
            Err(e) => CommandOutput::failed(-1, format!("Command error: {}", e)),
        }
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordedCall {
    Command { command: String },
    Sleep { seconds: u64 },
}

/// Records calls instead of running them.
///
/// Every command succeeds with empty output unless a scripted response was
/// queued for a matching command prefix with [`RecordingExecutor::respond`].
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<RecordedCall>>,
    invocations: Mutex<Vec<Invocation>>,
    responses: Mutex<Vec<(String, VecDeque<CommandOutput>)>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the output returned by the next call whose rendered command starts with `prefix`.
    pub fn respond(&self, prefix: &str, output: CommandOutput) {
        let mut responses = lock(&self.responses);
        match responses.iter_mut().find(|(p, _)| p == prefix) {
            Some((_, queue)) => queue.push_back(output),
            None => responses.push((prefix.to_string(), VecDeque::from([output]))),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        lock(&self.invocations).clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.invocations().iter().map(Invocation::render).collect()
    }
}

impl Executor for RecordingExecutor {
    fn run(&self, invocation: &Invocation) -> CommandOutput {
        let rendered = invocation.render();
        lock(&self.calls).push(RecordedCall::Command {
            command: rendered.clone(),
        });
        lock(&self.invocations).push(invocation.clone());

        let mut responses = lock(&self.responses);
        let scripted = responses
            .iter_mut()
            .find(|(prefix, queue)| rendered.starts_with(prefix.as_str()) && !queue.is_empty())
            .and_then(|(_, queue)| queue.pop_front());
        scripted.unwrap_or_else(|| CommandOutput::ok(""))
    }

    fn sleep(&self, duration: Duration) {
        lock(&self.calls).push(RecordedCall::Sleep {
            seconds: duration.as_secs(),
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run `invocation`, turning a non-zero exit into `deploy.command_failed`.
pub fn run_checked(
    executor: &dyn Executor,
    invocation: &Invocation,
    step: &str,
) -> Result<CommandOutput> {
    let output = executor.run(invocation);
    if output.success {
        return Ok(output);
    }

    Err(Error::command_failed(CommandFailedDetails {
        step: step.to_string(),
        command: invocation.render(),
        exit_code: output.exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_quotes_arguments() {
        let inv = Invocation::new("ssh", ["ec2-user@host", "cd /app && docker image prune -f"]);
        assert_eq!(
            inv.render(),
            "ssh ec2-user@host 'cd /app && docker image prune -f'"
        );
    }

    #[test]
    fn render_omits_stdin() {
        let inv = Invocation::new("docker", ["login"]).with_stdin("secret-token");
        assert!(!inv.render().contains("secret-token"));
    }

    #[test]
    fn system_executor_captures_stdout() {
        let out = SystemExecutor.run(&Invocation::new("echo", ["hello"]));
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn system_executor_feeds_stdin() {
        let out = SystemExecutor.run(&Invocation::new("cat", Vec::<String>::new()).with_stdin("piped"));
        assert!(out.success);
        assert_eq!(out.stdout, "piped");
    }

    #[test]
    fn system_executor_reports_missing_program() {
        let out = SystemExecutor.run(&Invocation::new("nonexistent_command_xyz", Vec::<String>::new()));
        assert!(!out.success);
        assert_eq!(out.exit_code, 127);
    }

    #[test]
    fn run_checked_maps_failure_to_command_failed() {
        let exec = RecordingExecutor::new();
        exec.respond("docker push", CommandOutput::failed(1, "denied"));

        let err = run_checked(&exec, &Invocation::new("docker", ["push", "x"]), "push-web")
            .unwrap_err();

        assert_eq!(err.code.as_str(), "deploy.command_failed");
        assert_eq!(err.details["stderr"], "denied");
        assert_eq!(err.details["command"], "docker push x");
    }

    #[test]
    fn recording_executor_records_commands_and_sleeps_in_order() {
        let exec = RecordingExecutor::new();
        exec.run(&Invocation::new("true", Vec::<String>::new()));
        exec.sleep(Duration::from_secs(30));

        assert_eq!(
            exec.calls(),
            vec![
                RecordedCall::Command {
                    command: "true".to_string()
                },
                RecordedCall::Sleep { seconds: 30 },
            ]
        );
    }

    #[test]
    fn scripted_responses_are_consumed_once() {
        let exec = RecordingExecutor::new();
        exec.respond("aws ecr", CommandOutput::ok("token"));

        let first = exec.run(&Invocation::new("aws", ["ecr", "get-login-password"]));
        let second = exec.run(&Invocation::new("aws", ["ecr", "get-login-password"]));

        assert_eq!(first.stdout, "token");
        assert_eq!(second.stdout, "");
    }
}
