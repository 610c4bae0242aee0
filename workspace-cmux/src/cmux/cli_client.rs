//! `RuntimeClient` backed by the `cmux` command line
//!
//! Every call runs `<bin> --json <command> [args]` and parses stdout as JSON.
//! A non-zero exit becomes an error carrying stderr so the runtime's own
//! "not found" wording reaches the stale-entry heuristic unchanged.

use crate::cmux::client::{
    Capabilities, CancelToken, ClientFactory, Identity, Pane, RuntimeClient, RuntimeWorkspace,
    Surface,
};
use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

/// How often a running child is checked for exit or cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

pub trait CommandRunner: Send + Sync {
    /// Run to completion, or kill the child and return `Interrupted` once `ctx` is cancelled
    fn run(&self, ctx: &CancelToken, program: &Path, args: &[&str]) -> io::Result<CommandOutput>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, ctx: &CancelToken, program: &Path, args: &[&str]) -> io::Result<CommandOutput> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Pipes are drained on their own threads so a chatty child cannot block on a full pipe
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if ctx.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io::Error::new(io::ErrorKind::Interrupted, "cancelled"));
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(CommandOutput {
            status: status.code(),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        })
    }
}

/// cmux CLI adapter
#[derive(Debug, Clone)]
pub struct CmuxCli<R: CommandRunner = SystemCommandRunner> {
    runner: R,
    program: PathBuf,
}

impl CmuxCli<SystemCommandRunner> {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self::with_runner(program, SystemCommandRunner)
    }
}

impl<R: CommandRunner> CmuxCli<R> {
    pub fn with_runner(program: impl Into<PathBuf>, runner: R) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    /// Run one cmux command; `Value::Null` when it prints nothing
    fn invoke(&self, ctx: &CancelToken, command: &str, args: &[&str]) -> Result<Value> {
        let mut argv = vec!["--json", command];
        argv.extend_from_slice(args);
        debug!("{} {}", self.program.display(), argv.join(" "));

        let output = self
            .runner
            .run(ctx, &self.program, &argv)
            .with_context(|| format!("failed to run {} {command}", self.program.display()))?;

        if !output.success() {
            let detail = if output.stderr.trim().is_empty() {
                output.stdout.trim()
            } else {
                output.stderr.trim()
            };
            let status = output
                .status
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            bail!("cmux {command} exited with {status}: {detail}");
        }

        let stdout = output.stdout.trim();
        if stdout.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(stdout)
            .with_context(|| format!("cmux {command} printed invalid JSON"))
    }

    fn invoke_as<T: DeserializeOwned>(
        &self,
        ctx: &CancelToken,
        command: &str,
        args: &[&str],
    ) -> Result<T> {
        let value = self.invoke(ctx, command, args)?;
        serde_json::from_value(value).with_context(|| format!("unexpected cmux {command} output"))
    }

    /// Accept either a bare array or an object wrapping it under `key`
    fn invoke_list<T: DeserializeOwned>(
        &self,
        ctx: &CancelToken,
        command: &str,
        key: &str,
        args: &[&str],
    ) -> Result<Vec<T>> {
        let value = match self.invoke(ctx, command, args)? {
            Value::Null => return Ok(Vec::new()),
            Value::Object(mut object) => object.remove(key).unwrap_or(Value::Null),
            other => other,
        };
        if value.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(value).with_context(|| format!("unexpected cmux {command} output"))
    }
}

/// Pull a string out of `{"<key>": "..."}` or a bare JSON string
fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    if let Value::String(s) = value {
        return Some(s.clone());
    }
    keys.iter()
        .find_map(|k| value.get(k).and_then(Value::as_str))
        .map(str::to_string)
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("path is not valid UTF-8: {}", path.display()))
}

impl<R: CommandRunner> RuntimeClient for CmuxCli<R> {
    fn capabilities(&self, ctx: &CancelToken) -> Result<Capabilities> {
        self.invoke_as(ctx, "capabilities", &[])
    }

    fn create_workspace_with_command(&self, ctx: &CancelToken, command: &str) -> Result<String> {
        let value = self.invoke(ctx, "new-workspace", &["--command", command])?;
        string_field(&value, &["workspace_id", "id"])
            .ok_or_else(|| anyhow!("cmux new-workspace did not report a workspace id"))
    }

    fn rename_workspace(&self, ctx: &CancelToken, workspace_id: &str, title: &str) -> Result<()> {
        self.invoke(
            ctx,
            "rename-workspace",
            &["--workspace", workspace_id, "--title", title],
        )
        .map(drop)
    }

    fn select_workspace(&self, ctx: &CancelToken, workspace_id: &str) -> Result<()> {
        self.invoke(ctx, "select-workspace", &["--workspace", workspace_id])
            .map(drop)
    }

    fn list_workspaces(&self, ctx: &CancelToken) -> Result<Vec<RuntimeWorkspace>> {
        self.invoke_list(ctx, "list-workspaces", "workspaces", &[])
    }

    fn identify(
        &self,
        ctx: &CancelToken,
        workspace_id: Option<&str>,
        surface_id: Option<&str>,
    ) -> Result<Identity> {
        let mut args = Vec::new();
        if let Some(id) = workspace_id {
            args.extend(["--workspace", id]);
        }
        if let Some(id) = surface_id {
            args.extend(["--surface", id]);
        }
        match self.invoke(ctx, "identify", &args)? {
            Value::Null => Ok(Identity::default()),
            value => serde_json::from_value(value).context("unexpected cmux identify output"),
        }
    }

    fn list_panes(&self, ctx: &CancelToken, workspace_id: &str) -> Result<Vec<Pane>> {
        self.invoke_list(ctx, "list-panes", "panes", &["--workspace", workspace_id])
    }

    fn list_pane_surfaces(
        &self,
        ctx: &CancelToken,
        workspace_id: &str,
        pane_id: &str,
    ) -> Result<Vec<Surface>> {
        self.invoke_list(
            ctx,
            "list-pane-surfaces",
            "surfaces",
            &["--workspace", workspace_id, "--pane", pane_id],
        )
    }

    fn read_screen(
        &self,
        ctx: &CancelToken,
        workspace_id: &str,
        surface_id: &str,
        lines: u32,
        scrollback: bool,
    ) -> Result<String> {
        let lines = lines.to_string();
        let mut args = vec![
            "--workspace",
            workspace_id,
            "--surface",
            surface_id,
            "--lines",
            lines.as_str(),
        ];
        if scrollback {
            args.push("--scrollback");
        }
        let value = self.invoke(ctx, "read-screen", &args)?;
        Ok(string_field(&value, &["text", "content"]).unwrap_or_default())
    }

    fn browser_state_save(
        &self,
        ctx: &CancelToken,
        workspace_id: &str,
        surface_id: &str,
        path: &Path,
    ) -> Result<()> {
        self.invoke(
            ctx,
            "browser-state-save",
            &[
                "--workspace",
                workspace_id,
                "--surface",
                surface_id,
                "--path",
                path_arg(path)?,
            ],
        )
        .map(drop)
    }

    fn browser_state_load(
        &self,
        ctx: &CancelToken,
        workspace_id: &str,
        surface_id: &str,
        path: &Path,
    ) -> Result<()> {
        self.invoke(
            ctx,
            "browser-state-load",
            &[
                "--workspace",
                workspace_id,
                "--surface",
                surface_id,
                "--path",
                path_arg(path)?,
            ],
        )
        .map(drop)
    }

    fn focus_pane(&self, ctx: &CancelToken, pane_id: &str, workspace_id: &str) -> Result<()> {
        self.invoke(
            ctx,
            "focus-pane",
            &["--pane", pane_id, "--workspace", workspace_id],
        )
        .map(drop)
    }
}

/// Each worker gets its own adapter over a copy of the runner
impl<R: CommandRunner + Clone + 'static> ClientFactory for CmuxCli<R> {
    fn create(&self) -> Result<Box<dyn RuntimeClient>> {
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmux::client::is_not_found_error;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MockRunner {
        calls: Arc<Mutex<Vec<Vec<String>>>>,
        responses: Arc<Mutex<VecDeque<io::Result<CommandOutput>>>>,
    }

    impl MockRunner {
        fn push(&self, status: i32, stdout: &str, stderr: &str) {
            self.responses.lock().unwrap().push_back(Ok(CommandOutput {
                status: Some(status),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            }));
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for MockRunner {
        fn run(
            &self,
            _ctx: &CancelToken,
            _program: &Path,
            args: &[&str],
        ) -> io::Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push(args.iter().map(|s| s.to_string()).collect());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::Other, "no response")))
        }
    }

    fn cli(runner: &MockRunner) -> CmuxCli<MockRunner> {
        CmuxCli::with_runner("cmux", runner.clone())
    }

    #[test]
    fn test_create_parses_workspace_id() {
        let runner = MockRunner::default();
        runner.push(0, r#"{"workspace_id":"7F3A"}"#, "");
        let id = cli(&runner)
            .create_workspace_with_command(&CancelToken::new(), "cd \"$HOME/ws\"")
            .unwrap();
        assert_eq!(id, "7F3A");
        assert_eq!(
            runner.calls()[0],
            vec!["--json", "new-workspace", "--command", "cd \"$HOME/ws\""]
        );
    }

    #[test]
    fn test_failure_carries_stderr_for_stale_detection() {
        let runner = MockRunner::default();
        runner.push(1, "", "Error: workspace not found: 7F3A\n");
        let err = cli(&runner)
            .identify(&CancelToken::new(), Some("7F3A"), None)
            .unwrap_err();
        assert!(is_not_found_error(&err));
        assert!(err.to_string().contains("cmux identify exited with 1"));
    }

    #[test]
    fn test_list_accepts_wrapped_or_bare_arrays() {
        let runner = MockRunner::default();
        runner.push(0, r#"{"workspaces":[{"id":"a","title":"one"}]}"#, "");
        runner.push(0, r#"[{"id":"p1","ref":"pane:1","focused":true}]"#, "");
        runner.push(0, "", "");
        let cli = cli(&runner);
        let ctx = CancelToken::new();

        let workspaces = cli.list_workspaces(&ctx).unwrap();
        assert_eq!(workspaces[0].id, "a");

        let panes = cli.list_panes(&ctx, "a").unwrap();
        assert_eq!(panes[0].pane_ref, "pane:1");
        assert!(panes[0].focused);

        assert!(cli.list_pane_surfaces(&ctx, "a", "p1").unwrap().is_empty());
    }

    #[test]
    fn test_read_screen_arguments() {
        let runner = MockRunner::default();
        runner.push(0, r#"{"text":"$ ls\n"}"#, "");
        let text = cli(&runner)
            .read_screen(&CancelToken::new(), "ws", "s-1", 200, true)
            .unwrap();
        assert_eq!(text, "$ ls\n");
        assert_eq!(
            runner.calls()[0],
            vec![
                "--json",
                "read-screen",
                "--workspace",
                "ws",
                "--surface",
                "s-1",
                "--lines",
                "200",
                "--scrollback"
            ]
        );
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let runner = MockRunner::default();
        runner.push(0, "not json", "");
        assert!(cli(&runner).capabilities(&CancelToken::new()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_kills_child_on_cancel() {
        let ctx = CancelToken::new();
        let cancel = ctx.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        let err = SystemCommandRunner
            .run(&ctx, Path::new("sleep"), &["5"])
            .unwrap_err();
        canceller.join().unwrap();

        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
