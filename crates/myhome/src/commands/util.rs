//! Shared helpers for command handlers.

use std::io::IsTerminal;

use serde_json::Value;

use crate::error::CliError;

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(action: &str, message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: action.into(),
        });
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
    Ok(confirmed)
}

/// Parse optional JSON params given on the command line.
pub fn parse_params(raw: Option<&str>) -> Result<Option<Value>, CliError> {
    raw.map(|text| {
        serde_json::from_str(text).map_err(|e| CliError::Validation {
            field: "params".into(),
            reason: format!("invalid JSON: {e}"),
        })
    })
    .transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_are_optional_json() {
        assert_eq!(parse_params(None).unwrap(), None);
        assert_eq!(
            parse_params(Some(r#"{"id":0}"#)).unwrap(),
            Some(json!({"id": 0}))
        );
        assert!(matches!(
            parse_params(Some("{id:0")),
            Err(CliError::Validation { .. })
        ));
    }

    #[test]
    fn yes_skips_the_prompt() {
        assert!(confirm("forget", "Forget porch?", true).unwrap());
    }
}
