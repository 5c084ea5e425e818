//! Declarative input schema a manifest may attach to a skill.
//!
//! Checked by the host before arguments cross any process boundary, so a
//! skill never sees arguments that violate its declared shape.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Named parameters a skill accepts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputSchema {
    pub params: BTreeMap<String, ParamSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Allowed values.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    /// Regex a string value must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl InputSchema {
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Check the schema itself is usable (patterns compile, bounds ordered).
    pub fn check(&self) -> Result<(), String> {
        for (name, spec) in &self.params {
            if name.is_empty() {
                return Err("empty parameter name".into());
            }
            if let Some(pattern) = &spec.pattern {
                Regex::new(pattern).map_err(|e| format!("{name}: bad pattern: {e}"))?;
            }
            if let (Some(min), Some(max)) = (spec.minimum, spec.maximum) {
                if min > max {
                    return Err(format!("{name}: minimum {min} exceeds maximum {max}"));
                }
            }
        }
        Ok(())
    }

    /// Validate an argument object. Extra keys are allowed; every violation
    /// is collected into one message.
    pub fn validate(&self, args: &Value) -> Result<(), String> {
        let Some(obj) = args.as_object() else {
            return Err("arguments must be a JSON object".into());
        };

        let mut violations = Vec::new();
        for (name, spec) in &self.params {
            match obj.get(name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        violations.push(format!("{name}: required"));
                    }
                }
                Some(value) => spec.check_value(name, value, &mut violations),
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations.join("; "))
        }
    }
}

impl ParamSpec {
    fn check_value(&self, name: &str, value: &Value, violations: &mut Vec<String>) {
        if !self.kind.matches(value) {
            violations.push(format!("{name}: expected {}", self.kind.as_str()));
            return;
        }
        if let Some(allowed) = &self.enum_values {
            if !allowed.contains(value) {
                violations.push(format!("{name}: not one of the allowed values"));
            }
        }
        if let Some(n) = value.as_f64() {
            if self.minimum.is_some_and(|min| n < min) {
                violations.push(format!("{name}: below minimum"));
            }
            if self.maximum.is_some_and(|max| n > max) {
                violations.push(format!("{name}: above maximum"));
            }
        }
        if let (Some(pattern), Some(s)) = (&self.pattern, value.as_str()) {
            match Regex::new(pattern) {
                Ok(re) if re.is_match(s) => {}
                Ok(_) => violations.push(format!("{name}: does not match {pattern}")),
                Err(_) => violations.push(format!("{name}: schema pattern is invalid")),
            }
        }
    }
}
