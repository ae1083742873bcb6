//! Shutdown / reboot dispatch.
//!
//! A target carries its commands under the `shutdown` and `reboot` keys, in
//! one of three shapes:
//!
//! ```text
//! "ssh nas sudo poweroff"                        shell string
//! ["ssh", "nas", "sudo", "poweroff"]             argv, no shell
//! {"cmd": ..., "shell": true, "timeout": 30,     structured
//!  "desc": "power off nas"}
//! ```

use crate::error::{WolError, WolResult};
use crate::logs::LogStore;
use crate::runner::{CommandLine, CommandRunner, ExecRequest, RunError};
use crate::targets::Registry;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Output excerpt kept in audit entries.
pub(crate) const LOG_EXCERPT: usize = 4000;
/// Output excerpt attached to a failed-command error.
pub(crate) const ERROR_EXCERPT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Shutdown,
    Reboot,
}

impl PowerAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PowerAction::Shutdown => "shutdown",
            PowerAction::Reboot => "reboot",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandSpec {
    Shell(String),
    Argv(Vec<String>),
    Structured {
        cmd: CommandLine,
        shell: bool,
        timeout: Option<f64>,
        description: Option<String>,
    },
}

impl CommandSpec {
    /// Reads a stored spec. Keys are matched loosely: `command` stands in for
    /// a missing or falsy `cmd`, `description` for `desc`, and a timeout may
    /// be a number or a numeric string.
    pub fn from_value(value: &Value) -> WolResult<Self> {
        match value {
            Value::String(line) => Ok(CommandSpec::Shell(line.clone())),
            Value::Array(items) => Ok(CommandSpec::Argv(items.iter().map(word).collect())),
            Value::Object(map) => {
                let cmd = map.get("cmd").filter(|v| truthy(v)).or_else(|| map.get("command"));
                let cmd = match cmd {
                    Some(Value::String(line)) => CommandLine::Line(line.clone()),
                    Some(Value::Array(items)) => CommandLine::Argv(items.iter().map(word).collect()),
                    _ => return Err(WolError::invalid("invalid command type")),
                };
                let shell = map.get("shell").is_some_and(truthy);
                let timeout = map.get("timeout").and_then(|t| match t {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                });
                let description = first_truthy(map, &["desc", "description"]).map(word);
                Ok(CommandSpec::Structured { cmd, shell, timeout, description })
            }
            _ => Err(WolError::invalid("invalid command type")),
        }
    }

    pub fn normalize(&self) -> WolResult<ExecRequest> {
        let (cmd, shell, timeout, description) = match self {
            CommandSpec::Shell(line) => (CommandLine::Line(line.clone()), true, None, None),
            CommandSpec::Argv(args) => (CommandLine::Argv(args.clone()), false, None, None),
            CommandSpec::Structured { cmd, shell, timeout, description } => {
                (cmd.clone(), *shell, *timeout, description.clone())
            }
        };
        let (command, default_description) = match cmd {
            CommandLine::Line(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    return Err(WolError::invalid("empty command string"));
                }
                (CommandLine::Line(line.clone()), line)
            }
            CommandLine::Argv(args) => {
                if args.is_empty() {
                    return Err(WolError::invalid("empty command list"));
                }
                let joined = args.join(" ");
                (CommandLine::Argv(args), joined)
            }
        };
        Ok(ExecRequest {
            command,
            shell,
            timeout: timeout.and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
            description: description.unwrap_or(default_description),
        })
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn first_truthy<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| map.get(*k)).find(|v| truthy(v))
}

fn word(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Strips surrounding whitespace and caps the result at `limit` characters,
/// ending with `...` when something was cut.
pub(crate) fn trim_text(value: &str, limit: usize) -> String {
    let value = value.trim();
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let mut out: String = value.chars().take(limit.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandReport {
    pub ok: bool,
    pub action: PowerAction,
    pub target: String,
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
    pub command: String,
}

pub struct PowerDispatcher {
    registry: Arc<Registry>,
    logs: Arc<LogStore>,
    runner: Arc<dyn CommandRunner>,
}

impl PowerDispatcher {
    pub fn new(registry: Arc<Registry>, logs: Arc<LogStore>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { registry, logs, runner }
    }

    /// Runs the target's configured `action` command. Every outcome past
    /// command validation is appended to the audit log.
    pub async fn execute(&self, name: &str, action: PowerAction) -> WolResult<CommandReport> {
        let target = self.registry.get_or_fail(name)?;
        let spec = target
            .action(action.as_str())
            .ok_or_else(|| WolError::invalid(format!("no {action} command configured for target")))?;
        let request = CommandSpec::from_value(spec)
            .and_then(|spec| spec.normalize())
            .map_err(|e| WolError::invalid(format!("invalid {action} command: {e}")))?;

        info!(name = %target.name, %action, command = %request.description, "running power command");
        let output = match self.runner.run(&request).await {
            Ok(output) => output,
            Err(RunError::Timeout(limit)) => {
                warn!(name = %target.name, %action, ?limit, "power command timed out");
                self.logs.record(json!({
                    "evt": action,
                    "target": target.name,
                    "from": "api",
                    "command": request.description,
                    "error": "timeout",
                    "timeout": limit.as_secs_f64(),
                }));
                return Err(WolError::Timeout(format!("{action} command timed out")));
            }
            Err(RunError::Start(e)) => {
                warn!(name = %target.name, %action, error = %e, "power command failed to start");
                self.logs.record(json!({
                    "evt": action,
                    "target": target.name,
                    "from": "api",
                    "command": request.description,
                    "error": "oserror",
                    "message": e.to_string(),
                }));
                return Err(WolError::Unavailable(format!("{action} command failed to start")));
            }
        };

        let mut entry = json!({
            "evt": action,
            "target": target.name,
            "from": "api",
            "command": request.description,
            "rc": output.exit_code,
        });
        if !output.stdout.is_empty() {
            entry["stdout"] = json!(trim_text(&output.stdout, LOG_EXCERPT));
        }
        if !output.stderr.is_empty() {
            entry["stderr"] = json!(trim_text(&output.stderr, LOG_EXCERPT));
        }

        if !output.success() {
            warn!(name = %target.name, %action, rc = output.exit_code, "power command failed");
            self.logs.record(entry);
            return Err(WolError::CommandFailed {
                action: action.to_string(),
                returncode: output.exit_code,
                stdout: trim_text(&output.stdout, ERROR_EXCERPT),
                stderr: trim_text(&output.stderr, ERROR_EXCERPT),
            });
        }
        self.logs.append(entry)?;

        Ok(CommandReport {
            ok: true,
            action,
            target: target.name,
            returncode: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            command: request.description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::SystemRunner;
    use crate::testing::{fixture, FakeRunner, Fixture, Scripted};

    fn with_commands(fx: &Fixture, shutdown: Value, reboot: Value) {
        fx.write_targets(json!({"targets": [{
            "name": "nas",
            "ip": "10.0.0.2",
            "created_at": "2024-05-01T21:00:00+09:00",
            "updated_at": "2024-05-01T21:00:00+09:00",
            "shutdown": shutdown,
            "reboot": reboot,
        }]}));
    }

    fn dispatcher(fx: &Fixture, runner: Arc<dyn CommandRunner>) -> PowerDispatcher {
        PowerDispatcher::new(fx.registry.clone(), fx.logs.clone(), runner)
    }

    #[test]
    fn spec_shapes() {
        assert_eq!(
            CommandSpec::from_value(&json!("ssh nas poweroff")).unwrap(),
            CommandSpec::Shell("ssh nas poweroff".into())
        );
        assert_eq!(
            CommandSpec::from_value(&json!(["wakeonlan", 9, true])).unwrap(),
            CommandSpec::Argv(vec!["wakeonlan".into(), "9".into(), "true".into()])
        );
        let structured = CommandSpec::from_value(&json!({
            "cmd": "", "command": ["systemctl", "poweroff"], "shell": 0, "timeout": "2.5", "description": "off"
        }))
        .unwrap();
        assert_eq!(
            structured,
            CommandSpec::Structured {
                cmd: CommandLine::Argv(vec!["systemctl".into(), "poweroff".into()]),
                shell: false,
                timeout: Some(2.5),
                description: Some("off".into()),
            }
        );
        for bad in [json!(null), json!(42), json!({"cmd": 7}), json!({"cmd": [], "shell": true})] {
            assert!(CommandSpec::from_value(&bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn normalize_fills_description_and_rejects_empty() {
        let req = CommandSpec::Shell("  poweroff  ".into()).normalize().unwrap();
        assert_eq!(req.command, CommandLine::Line("poweroff".into()));
        assert!(req.shell);
        assert_eq!(req.description, "poweroff");

        let req = CommandSpec::from_value(&json!({"cmd": "sleep 1", "timeout": 3, "desc": "nap"}))
            .unwrap()
            .normalize()
            .unwrap();
        assert!(!req.shell);
        assert_eq!(req.timeout, Some(Duration::from_secs(3)));
        assert_eq!(req.description, "nap");

        let err = CommandSpec::Shell("   ".into()).normalize().unwrap_err();
        assert_eq!(err.to_string(), "empty command string");
        let err = CommandSpec::Argv(vec![]).normalize().unwrap_err();
        assert_eq!(err.to_string(), "empty command list");
        let err = CommandSpec::from_value(&json!({"cmd": "", "command": []})).unwrap().normalize().unwrap_err();
        assert_eq!(err.to_string(), "empty command list");
    }

    #[test]
    fn trim_text_caps_and_marks() {
        assert_eq!(trim_text("  ok \n", 10), "ok");
        assert_eq!(trim_text("abcdefghij", 10), "abcdefghij");
        assert_eq!(trim_text("abcdefghijk", 10), "abcdefg...");
        assert_eq!(trim_text("ééééé", 4), "é...");
    }

    #[tokio::test]
    async fn success_reports_full_output_and_logs_excerpt() {
        let fx = fixture();
        with_commands(&fx, json!("ssh nas sudo poweroff"), json!(["ssh", "nas", "reboot"]));
        let long = "x".repeat(5000);
        let runner = Arc::new(FakeRunner::new([Scripted::exit(0, &long, "")]));
        let report = dispatcher(&fx, runner.clone()).execute("NAS", PowerAction::Shutdown).await.unwrap();

        assert!(report.ok);
        assert_eq!(report.target, "nas");
        assert_eq!(report.stdout.len(), 5000);
        assert_eq!(report.command, "ssh nas sudo poweroff");
        assert!(runner.requests()[0].shell);

        let entry = &fx.events("shutdown")[0];
        assert_eq!(entry["rc"], 0);
        assert_eq!(entry["from"], "api");
        assert_eq!(entry["stdout"].as_str().unwrap().chars().count(), LOG_EXCERPT);
        assert!(entry.get("stderr").is_none());
    }

    #[tokio::test]
    async fn argv_spec_runs_without_shell() {
        let fx = fixture();
        with_commands(&fx, json!(null), json!(["ssh", "nas", "reboot"]));
        let runner = Arc::new(FakeRunner::new([]));
        let report = dispatcher(&fx, runner.clone()).execute("nas", PowerAction::Reboot).await.unwrap();
        assert_eq!(report.command, "ssh nas reboot");
        assert!(!runner.requests()[0].shell);
    }

    #[tokio::test]
    async fn missing_or_invalid_specs_are_rejected() {
        let fx = fixture();
        with_commands(&fx, json!(null), json!([]));
        let runner = Arc::new(FakeRunner::new([]));
        let power = dispatcher(&fx, runner.clone());

        let err = power.execute("nas", PowerAction::Shutdown).await.unwrap_err();
        assert_eq!(err.to_string(), "no shutdown command configured for target");
        let err = power.execute("nas", PowerAction::Reboot).await.unwrap_err();
        assert!(matches!(err, WolError::InvalidArgument(_)));
        assert_eq!(err.to_string(), "invalid reboot command: empty command list");
        assert!(matches!(power.execute("ghost", PowerAction::Reboot).await, Err(WolError::NotFound(_))));
        assert!(runner.requests().is_empty());
    }

    #[tokio::test]
    async fn nonzero_exit_is_command_failed() {
        let fx = fixture();
        with_commands(&fx, json!("poweroff"), json!(null));
        let stderr = "e".repeat(2000);
        let runner = Arc::new(FakeRunner::new([Scripted::exit(255, "", &stderr)]));
        let err = dispatcher(&fx, runner).execute("nas", PowerAction::Shutdown).await.unwrap_err();
        match err {
            WolError::CommandFailed { action, returncode, stdout, stderr } => {
                assert_eq!(action, "shutdown");
                assert_eq!(returncode, 255);
                assert_eq!(stdout, "");
                assert_eq!(stderr.chars().count(), ERROR_EXCERPT);
                assert!(stderr.ends_with("..."));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fx.events("shutdown")[0]["rc"], 255);
    }

    #[tokio::test]
    async fn timeout_and_start_failure_are_logged() {
        let fx = fixture();
        with_commands(&fx, json!({"cmd": "poweroff", "timeout": 1.5}), json!("reboot"));
        let runner = Arc::new(FakeRunner::new([Scripted::Timeout, Scripted::StartFailure]));
        let power = dispatcher(&fx, runner);

        let err = power.execute("nas", PowerAction::Shutdown).await.unwrap_err();
        assert!(matches!(err, WolError::Timeout(_)));
        assert_eq!(err.to_string(), "shutdown command timed out");
        let entry = &fx.events("shutdown")[0];
        assert_eq!(entry["error"], "timeout");
        assert_eq!(entry["timeout"], 1.5);

        let err = power.execute("nas", PowerAction::Reboot).await.unwrap_err();
        assert!(matches!(err, WolError::Unavailable(_)));
        let entry = &fx.events("reboot")[0];
        assert_eq!(entry["error"], "oserror");
        assert!(entry["message"].as_str().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out_for_real() {
        let fx = fixture();
        with_commands(&fx, json!({"cmd": "sleep 5", "shell": true, "timeout": 0.2}), json!(null));
        let started = std::time::Instant::now();
        let err = dispatcher(&fx, Arc::new(SystemRunner)).execute("nas", PowerAction::Shutdown).await.unwrap_err();
        assert!(matches!(err, WolError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
