use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use validator::ValidateEmail;

pub const ALLOWED_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".mp4"];

pub const MSG_REQUIRED: &str = "This field is required.";
pub const MSG_NULL: &str = "This field may not be null.";
pub const MSG_BLANK: &str = "This field may not be blank.";
pub const MSG_NOT_A_STRING: &str = "Not a valid string.";
pub const MSG_INVALID_EMAIL: &str = "Enter a valid email address.";
pub const MSG_INVALID_INTEGER: &str = "A valid integer is required.";
pub const MSG_NO_FILE: &str = "No file was submitted.";
pub const MSG_NOT_A_FILE: &str =
    "The submitted data was not a file. Check the encoding type on the form.";
pub const MSG_NO_FILENAME: &str = "No filename could be determined.";
pub const MSG_EMPTY_FILE: &str = "The submitted file is empty.";
pub const MSG_BAD_CREDENTIALS: &str = "Unable to log in with provided credentials.";

pub const NON_FIELD_ERRORS: &str = "non_field_errors";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported file extension. Supported file extensions: {}", .allowed.join(", "))]
pub struct InvalidExtension {
    pub allowed: &'static [&'static str],
}

/// Returns the extension of the last path component, dot included.
///
/// Leading dots belong to the stem, so `.jpg` has no extension.
pub fn extension(filename: &str) -> Option<&str> {
    let base = filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(filename);
    let stem_start = base.find(|c: char| c != '.')?;
    let dot = base.rfind('.')?;
    if dot <= stem_start {
        return None;
    }
    Some(&base[dot..])
}

pub fn validate_extension(filename: &str) -> Result<(), InvalidExtension> {
    let accepted = extension(filename)
        .map(|ext| ext.to_lowercase())
        .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()));
    if accepted {
        Ok(())
    } else {
        Err(InvalidExtension {
            allowed: ALLOWED_EXTENSIONS,
        })
    }
}

/// Field name to the list of reasons it was rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Email,
    Integer { min: i64 },
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub name: &'static str,
    pub kind: FieldKind,
    /// `None` means the field is required.
    pub default: Option<i64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

const fn rule(
    name: &'static str,
    kind: FieldKind,
    default: Option<i64>,
    min_length: Option<usize>,
    max_length: Option<usize>,
) -> FieldRule {
    FieldRule {
        name,
        kind,
        default,
        min_length,
        max_length,
    }
}

pub const REGISTRATION: &[FieldRule] = &[
    rule("email", FieldKind::Email, None, None, None),
    rule("username", FieldKind::Text, None, None, Some(150)),
    rule("password", FieldKind::Text, None, Some(8), Some(100)),
];

pub const LOGIN: &[FieldRule] = &[
    rule("username", FieldKind::Text, None, None, None),
    rule("password", FieldKind::Text, None, None, None),
];

pub const DEFAULT_LICENSE_DURATION: i64 = 30;

pub const LICENSE_CHECK: &[FieldRule] = &[rule(
    "license_duration",
    FieldKind::Integer { min: 0 },
    Some(DEFAULT_LICENSE_DURATION),
    None,
    None,
)];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
}

#[derive(Debug, Default)]
pub struct CleanedData(BTreeMap<&'static str, FieldValue>);

impl CleanedData {
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(FieldValue::Text(value)) => Some(value),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.0.get(name) {
            Some(FieldValue::Integer(value)) => Some(*value),
            _ => None,
        }
    }
}

/// Runs every rule against `body`, collecting all failures before returning.
pub fn validate(body: &Value, rules: &[FieldRule]) -> Result<CleanedData, FieldErrors> {
    let (cleaned, errors) = clean(body, rules);
    if errors.is_empty() {
        Ok(cleaned)
    } else {
        Err(errors)
    }
}

/// Like [`validate`], but also hands back the fields that did pass so that
/// callers can run further checks on them before reporting.
pub fn clean(body: &Value, rules: &[FieldRule]) -> (CleanedData, FieldErrors) {
    let object = match body {
        Value::Object(object) => object,
        other => {
            let errors = FieldErrors::single(
                NON_FIELD_ERRORS,
                format!(
                    "Invalid data. Expected a dictionary, but got {}.",
                    json_type_name(other)
                ),
            );
            return (CleanedData::default(), errors);
        }
    };

    let mut cleaned = CleanedData::default();
    let mut errors = FieldErrors::new();

    for rule in rules {
        match object.get(rule.name) {
            None => match rule.default {
                Some(default) => {
                    cleaned.0.insert(rule.name, FieldValue::Integer(default));
                }
                None => errors.add(rule.name, MSG_REQUIRED),
            },
            Some(Value::Null) => errors.add(rule.name, MSG_NULL),
            Some(raw) => match check_field(rule, raw) {
                Ok(value) => {
                    cleaned.0.insert(rule.name, value);
                }
                Err(messages) => {
                    for message in messages {
                        errors.add(rule.name, message);
                    }
                }
            },
        }
    }

    (cleaned, errors)
}

fn check_field(rule: &FieldRule, raw: &Value) -> Result<FieldValue, Vec<String>> {
    match rule.kind {
        FieldKind::Text | FieldKind::Email => {
            let text = match raw {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => return Err(vec![MSG_NOT_A_STRING.to_string()]),
            };
            if text.is_empty() {
                return Err(vec![MSG_BLANK.to_string()]);
            }

            let mut messages = Vec::new();
            let length = text.chars().count();
            if let Some(max) = rule.max_length {
                if length > max {
                    messages.push(format!(
                        "Ensure this field has no more than {} characters.",
                        max
                    ));
                }
            }
            if let Some(min) = rule.min_length {
                if length < min {
                    messages.push(format!("Ensure this field has at least {} characters.", min));
                }
            }
            if rule.kind == FieldKind::Email && !text.validate_email() {
                messages.push(MSG_INVALID_EMAIL.to_string());
            }

            if messages.is_empty() {
                Ok(FieldValue::Text(text))
            } else {
                Err(messages)
            }
        }
        FieldKind::Integer { min } => {
            let value = match raw {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            }
            .ok_or_else(|| vec![MSG_INVALID_INTEGER.to_string()])?;
            if value < min {
                return Err(vec![format!(
                    "Ensure this value is greater than or equal to {}.",
                    min
                )]);
            }
            Ok(FieldValue::Integer(value))
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}
