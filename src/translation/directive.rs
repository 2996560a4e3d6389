// src/translation/directive.rs - translator settings embedded in a printable
use serde_json::Value;

/// A control instruction carried in the comment of an ESTIMATES command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslatorDirective {
    SetVerbose(bool),
}

#[derive(Debug, thiserror::Error)]
pub enum DirectiveError {
    #[error("directive is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("\"verbose\" must be a boolean, found {0}")]
    VerboseNotBool(Value),
}

impl TranslatorDirective {
    /// Parses a comment once. Comments without any directive key yield an
    /// empty list; malformed ones are an error for the caller to report.
    pub fn parse(comment: &str) -> Result<Vec<TranslatorDirective>, DirectiveError> {
        let value: Value = serde_json::from_str(comment)?;
        let mut found = Vec::new();
        collect(&value, &mut found)?;
        Ok(found)
    }
}

// Children are visited before their own key; the caller applies the last match.
fn collect(value: &Value, found: &mut Vec<TranslatorDirective>) -> Result<(), DirectiveError> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                collect(child, found)?;
                if key == "verbose" {
                    match child {
                        Value::Bool(flag) => found.push(TranslatorDirective::SetVerbose(*flag)),
                        other => return Err(DirectiveError::VerboseNotBool(other.clone())),
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, found)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nested_verbose() {
        let parsed = TranslatorDirective::parse(r#"{"translator":{"verbose":false}}"#).unwrap();
        assert_eq!(parsed, vec![TranslatorDirective::SetVerbose(false)]);
    }

    #[test]
    fn no_directive_is_empty() {
        assert!(TranslatorDirective::parse(r#"{"time": 12}"#).unwrap().is_empty());
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(
            TranslatorDirective::parse("{verbose: yes"),
            Err(DirectiveError::Json(_))
        ));
        assert!(matches!(
            TranslatorDirective::parse(r#"{"verbose": "on"}"#),
            Err(DirectiveError::VerboseNotBool(_))
        ));
    }
}
