//! healingctl subcommands - ASCII-only terminal output

use crate::errors::{exit_code_for, EXIT_SUCCESS, EXIT_USAGE};
use crate::executor::ExecutionResult;
use crate::permission::PermissionHandler;
use anyhow::{bail, Result};
use healing_common::ActionName;
use owo_colors::OwoColorize;
use serde_json::{Map, Value};

/// Parse `key=value` pairs. Values that are valid JSON scalars (numbers,
/// booleans) keep their type; everything else is a string.
pub fn parse_params(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut params = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Parameter must be key=value, got {:?}", pair);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Parameter name is empty in {:?}", pair);
        }
        let value = match serde_json::from_str::<Value>(raw) {
            Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
            _ => Value::String(raw.to_string()),
        };
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

pub fn status(handler: &PermissionHandler, json: bool) -> Result<i32> {
    let status = handler.get_status();
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(EXIT_SUCCESS);
    }

    let mode = if status.is_production {
        status.mode.as_str().bright_green().to_string()
    } else {
        status.mode.as_str().yellow().to_string()
    };
    println!("[MODE]      {} ({})", mode, status.mode_description);
    println!("[EXECUTOR]  {}", status.executor_type);
    println!("[ACTIONS]");
    for capability in &status.capabilities {
        println!("  * {}", capability);
    }
    Ok(EXIT_SUCCESS)
}

pub fn actions() -> i32 {
    for name in ActionName::ALL {
        println!("  {:<22} {}", name.as_str().cyan(), name.description().dimmed());
    }
    EXIT_SUCCESS
}

pub async fn run(
    handler: &PermissionHandler,
    action: &str,
    pairs: &[String],
    json: bool,
) -> Result<i32> {
    let params = match parse_params(pairs) {
        Ok(params) => params,
        Err(e) => {
            eprintln!("[ERROR] {}", e.to_string().red());
            return Ok(EXIT_USAGE);
        }
    };

    let result = handler.execute(action, &params).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        display_result(action, &result);
    }

    Ok(if result.success {
        EXIT_SUCCESS
    } else {
        exit_code_for(result.error_kind)
    })
}

fn display_result(action: &str, result: &ExecutionResult) {
    if result.success {
        println!(
            "{} {} ({} ms, {} mode)",
            "[OK]".bright_green(),
            action,
            result.duration_ms,
            result.mode
        );
        if let Some(output) = &result.output {
            for line in output.lines() {
                println!("  {}", line);
            }
        }
        return;
    }

    eprintln!(
        "{} {}: {}",
        "[FAILED]".bright_red(),
        action,
        result.error.as_deref().unwrap_or("unknown error").red()
    );
    if let Some(suggestion) = &result.suggestion {
        eprintln!("{} {}", "[HINT]".yellow(), suggestion);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_params_types() {
        let params = parse_params(&pairs(&[
            "service=nginx",
            "pid=4242",
            "value=60",
            "signal=TERM",
        ]))
        .unwrap();
        assert_eq!(params["service"], "nginx");
        assert_eq!(params["pid"], 4242);
        assert_eq!(params["value"], 60);
        assert_eq!(params["signal"], "TERM");
    }

    #[test]
    fn test_parse_params_keeps_equals_in_value() {
        let params = parse_params(&pairs(&["service=a=b"])).unwrap();
        assert_eq!(params["service"], "a=b");
    }

    #[test]
    fn test_parse_params_rejects_bad_pairs() {
        assert!(parse_params(&pairs(&["nginx"])).is_err());
        assert!(parse_params(&pairs(&["=nginx"])).is_err());
    }
}
