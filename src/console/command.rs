use crate::optimize::actor::OptimizeCommand;
use crate::scheduler::actor::SyncCommand;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub const HELP: &str = "\
commands:
  pause | resume             disable / enable polling
  interval <secs>            set poll interval (clamped to the floor)
  refresh                    refresh now
  hide | show                simulate the view losing / regaining focus
  reload                     reload suggestions
  select <name>              toggle a suggestion
  all | none                 select every / no suggestion
  custom <name> <json>       override the value for <name>
  uncustom <name>            drop the override
  trial | reset              run / forget a what-if backtest
  apply | confirm | cancel   two-step commit of the selection
  dismiss <name>             dismiss a suggestion
  help";

#[derive(Clone, Debug, PartialEq)]
pub enum ConsoleCommand {
    Sync(SyncCommand),
    Optimize(OptimizeCommand),
    Help,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`, try `help`")]
    Unknown(String),
    #[error("`{0}` expects {1}")]
    MissingArgument(&'static str, &'static str),
    #[error("invalid {what} `{value}`")]
    Invalid { what: &'static str, value: String },
}

fn required<'a>(arg: Option<&'a str>, cmd: &'static str, what: &'static str) -> Result<&'a str, ParseError> {
    arg.map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or(ParseError::MissingArgument(cmd, what))
}

/// Parse one console line.
pub fn parse(line: &str) -> Result<ConsoleCommand, ParseError> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, Some(rest.trim())),
        None => (line, None),
    };

    use ConsoleCommand::{Optimize, Sync};
    let cmd = match verb.to_ascii_lowercase().as_str() {
        "" => return Err(ParseError::Empty),
        "help" | "?" => ConsoleCommand::Help,

        "pause" => Sync(SyncCommand::Disable),
        "resume" => Sync(SyncCommand::Enable),
        "refresh" => Sync(SyncCommand::RefreshNow),
        "hide" => Sync(SyncCommand::SetVisible(false)),
        "show" => Sync(SyncCommand::SetVisible(true)),
        "interval" => {
            let raw = required(rest, "interval", "a number of seconds")?;
            let secs: u64 = raw.parse().map_err(|_| ParseError::Invalid {
                what: "interval",
                value: raw.to_string(),
            })?;
            Sync(SyncCommand::SetInterval(Duration::from_secs(secs)))
        }

        "reload" => Optimize(OptimizeCommand::Reload),
        "all" => Optimize(OptimizeCommand::SelectAll),
        "none" => Optimize(OptimizeCommand::SelectNone),
        "trial" => Optimize(OptimizeCommand::Trial),
        "reset" => Optimize(OptimizeCommand::ResetTrial),
        "apply" => Optimize(OptimizeCommand::Apply),
        "confirm" => Optimize(OptimizeCommand::Confirm),
        "cancel" => Optimize(OptimizeCommand::Cancel),
        "select" => {
            let name = required(rest, "select", "a setting name")?;
            Optimize(OptimizeCommand::Toggle(name.to_string()))
        }
        "dismiss" => {
            let name = required(rest, "dismiss", "a setting name")?;
            Optimize(OptimizeCommand::Dismiss(name.to_string()))
        }
        "uncustom" => {
            let name = required(rest, "uncustom", "a setting name")?;
            Optimize(OptimizeCommand::ClearCustom(name.to_string()))
        }
        "custom" => {
            let args = required(rest, "custom", "a setting name and a JSON value")?;
            let (name, raw) = args
                .split_once(char::is_whitespace)
                .ok_or(ParseError::MissingArgument("custom", "a JSON value"))?;
            let raw = raw.trim();
            let value: Value = serde_json::from_str(raw).map_err(|_| ParseError::Invalid {
                what: "JSON value",
                value: raw.to_string(),
            })?;
            Optimize(OptimizeCommand::SetCustom(name.to_string(), value))
        }

        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sync_commands() {
        assert_eq!(parse("pause"), Ok(ConsoleCommand::Sync(SyncCommand::Disable)));
        assert_eq!(parse("  RESUME "), Ok(ConsoleCommand::Sync(SyncCommand::Enable)));
        assert_eq!(
            parse("interval 30"),
            Ok(ConsoleCommand::Sync(SyncCommand::SetInterval(Duration::from_secs(30))))
        );
        assert_eq!(
            parse("hide"),
            Ok(ConsoleCommand::Sync(SyncCommand::SetVisible(false)))
        );
    }

    #[test]
    fn test_interval_argument_errors() {
        assert_eq!(
            parse("interval"),
            Err(ParseError::MissingArgument("interval", "a number of seconds"))
        );
        assert!(matches!(
            parse("interval soon"),
            Err(ParseError::Invalid { what: "interval", .. })
        ));
    }

    #[test]
    fn test_optimize_commands_with_names() {
        assert_eq!(
            parse("select stop_loss_pct"),
            Ok(ConsoleCommand::Optimize(OptimizeCommand::Toggle("stop_loss_pct".into())))
        );
        assert_eq!(
            parse("dismiss take_profit_pct"),
            Ok(ConsoleCommand::Optimize(OptimizeCommand::Dismiss("take_profit_pct".into())))
        );
        assert_eq!(
            parse("dismiss"),
            Err(ParseError::MissingArgument("dismiss", "a setting name"))
        );
    }

    #[test]
    fn test_custom_value_is_json() {
        assert_eq!(
            parse("custom take_profit_pct 4.5"),
            Ok(ConsoleCommand::Optimize(OptimizeCommand::SetCustom(
                "take_profit_pct".into(),
                json!(4.5)
            )))
        );
        assert_eq!(
            parse(r#"custom symbols ["QQQ", "SPY"]"#),
            Ok(ConsoleCommand::Optimize(OptimizeCommand::SetCustom(
                "symbols".into(),
                json!(["QQQ", "SPY"])
            )))
        );
        assert!(matches!(
            parse("custom take_profit_pct four"),
            Err(ParseError::Invalid { what: "JSON value", .. })
        ));
        assert_eq!(
            parse("custom take_profit_pct"),
            Err(ParseError::MissingArgument("custom", "a JSON value"))
        );
    }

    #[test]
    fn test_unknown_and_empty() {
        assert_eq!(parse("   "), Err(ParseError::Empty));
        assert_eq!(parse("launch"), Err(ParseError::Unknown("launch".into())));
        assert_eq!(parse("help"), Ok(ConsoleCommand::Help));
    }
}
