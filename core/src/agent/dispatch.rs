//! Maps remote command names to local entry-point invocations.

use std::time::Duration;

use serde_json::Value;

use crate::config::RunnerConfig;

use super::types::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Arguments after `<entry> [entry_args..]`.
    pub args: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Run(Invocation),
    /// Resolved to a failed outcome without spawning anything.
    Reject(String),
}

pub fn resolve(command: &Command, cfg: &RunnerConfig) -> Dispatch {
    let default_timeout = Duration::from_millis(cfg.default_timeout_ms);
    let audit_timeout = Duration::from_millis(cfg.audit_timeout_ms);
    let run = |args: &[&str], timeout| {
        Dispatch::Run(Invocation {
            args: args.iter().map(|s| s.to_string()).collect(),
            timeout,
        })
    };

    match command.name.as_str() {
        "audit" => {
            if command.args.get("fix") == Some(&Value::Bool(true)) {
                run(&["audit", "--fix"], audit_timeout)
            } else {
                run(&["audit"], audit_timeout)
            }
        }
        "audit:fix" | "fix" => run(&["audit", "--fix"], audit_timeout),
        "inventory" => run(&["inventory"], default_timeout),
        "diagrams" => run(&["diagrams"], default_timeout),
        "export" => match export_format(command) {
            Ok(format) => run(&["export", format], default_timeout),
            Err(reason) => Dispatch::Reject(reason),
        },
        "watch" => Dispatch::Reject(format!(
            "command '{}' requires an interactive session",
            command.name
        )),
        other => Dispatch::Reject(format!("unknown command '{other}'")),
    }
}

fn export_format(command: &Command) -> Result<&str, String> {
    let format = match command.args.get("format") {
        None | Some(Value::Null) => return Ok("json"),
        Some(Value::String(s)) => s.as_str(),
        Some(other) => return Err(format!("invalid export format: {other}")),
    };
    if format.is_empty() || format.starts_with('-') || format.chars().any(char::is_whitespace) {
        return Err(format!("invalid export format: {format:?}"));
    }
    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg() -> RunnerConfig {
        RunnerConfig {
            default_timeout_ms: 120_000,
            audit_timeout_ms: 300_000,
            ..RunnerConfig::default()
        }
    }

    fn args_of(d: Dispatch) -> Vec<String> {
        match d {
            Dispatch::Run(inv) => inv.args,
            Dispatch::Reject(reason) => panic!("unexpected reject: {reason}"),
        }
    }

    #[test]
    fn audit_uses_long_timeout() {
        let Dispatch::Run(inv) = resolve(&Command::new("c1", "audit"), &cfg()) else {
            panic!("audit should run");
        };
        assert_eq!(inv.args, vec!["audit"]);
        assert_eq!(inv.timeout, Duration::from_secs(300));
    }

    #[test]
    fn fix_variants() {
        let fix_arg = Command::new("c1", "audit").with_arg("fix", json!(true));
        assert_eq!(args_of(resolve(&fix_arg, &cfg())), vec!["audit", "--fix"]);
        assert_eq!(
            args_of(resolve(&Command::new("c2", "audit:fix"), &cfg())),
            vec!["audit", "--fix"]
        );
        assert_eq!(
            args_of(resolve(&Command::new("c3", "fix"), &cfg())),
            vec!["audit", "--fix"]
        );
        let truthy_string = Command::new("c4", "audit").with_arg("fix", json!("yes"));
        assert_eq!(args_of(resolve(&truthy_string, &cfg())), vec!["audit"]);
    }

    #[test]
    fn generic_commands_use_default_timeout() {
        let Dispatch::Run(inv) = resolve(&Command::new("c1", "inventory"), &cfg()) else {
            panic!("inventory should run");
        };
        assert_eq!(inv.timeout, Duration::from_secs(120));
        assert_eq!(
            args_of(resolve(&Command::new("c2", "diagrams"), &cfg())),
            vec!["diagrams"]
        );
    }

    #[test]
    fn export_format_defaults_and_validation() {
        assert_eq!(
            args_of(resolve(&Command::new("c1", "export"), &cfg())),
            vec!["export", "json"]
        );
        let md = Command::new("c2", "export").with_arg("format", json!("markdown"));
        assert_eq!(args_of(resolve(&md, &cfg())), vec!["export", "markdown"]);

        for bad in [json!("--output=/etc/passwd"), json!("a b"), json!(""), json!(3)] {
            let cmd = Command::new("c3", "export").with_arg("format", bad);
            assert!(matches!(resolve(&cmd, &cfg()), Dispatch::Reject(_)));
        }
    }

    #[test]
    fn interactive_and_unknown_are_rejected() {
        assert_eq!(
            resolve(&Command::new("c1", "watch"), &cfg()),
            Dispatch::Reject("command 'watch' requires an interactive session".into())
        );
        assert_eq!(
            resolve(&Command::new("c2", "rm -rf"), &cfg()),
            Dispatch::Reject("unknown command 'rm -rf'".into())
        );
    }
}
