use crate::domain::agent::TaskResult;
use chrono::Duration;
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Declared type of a task parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParameterType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Number => value.is_number(),
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Object => value.is_object(),
            ParameterType::Array => value.is_array(),
        }
    }
}

/// Extra constraints on a single parameter value
///
/// `min`/`max` bound numbers by value and strings/arrays by length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

impl ParameterValidation {
    fn check(&self, name: &str, value: &Value) -> Result<(), String> {
        if let Some(allowed) = &self.allowed {
            if !allowed.contains(value) {
                return Err(format!("{} must be one of {:?}", name, allowed));
            }
        }

        let measure = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => Some(s.chars().count() as f64),
            Value::Array(a) => Some(a.len() as f64),
            _ => None,
        };
        if let Some(measure) = measure {
            if let Some(min) = self.min {
                if measure < min {
                    return Err(format!("{} is below the minimum of {}", name, min));
                }
            }
            if let Some(max) = self.max {
                if measure > max {
                    return Err(format!("{} is above the maximum of {}", name, max));
                }
            }
        }

        if let (Some(pattern), Value::String(s)) = (&self.pattern, value) {
            let re = Regex::new(pattern)
                .map_err(|e| format!("{} has an invalid pattern: {}", name, e))?;
            if !re.is_match(s) {
                return Err(format!("{} does not match pattern {}", name, pattern));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ParameterValidation>,
}

impl ParameterDefinition {
    pub fn required(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            required: true,
            default: None,
            validation: None,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParameterType, default: Option<Value>) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            required: false,
            default,
            validation: None,
        }
    }

    pub fn with_validation(mut self, validation: ParameterValidation) -> Self {
        self.validation = Some(validation);
        self
    }
}

/// Named predicate run before or after a task executes
///
/// Serializes as its message only; the predicate itself stays in process.
pub struct Condition<T: ?Sized> {
    pub message: String,
    check: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: ?Sized> Condition<T> {
    pub fn new(message: impl Into<String>, check: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            message: message.into(),
            check: Arc::new(check),
        }
    }

    pub fn check(&self, input: &T) -> bool {
        (self.check)(input)
    }
}

impl<T: ?Sized> Clone for Condition<T> {
    fn clone(&self) -> Self {
        Self {
            message: self.message.clone(),
            check: Arc::clone(&self.check),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Condition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition").field("message", &self.message).finish()
    }
}

impl<T: ?Sized> Serialize for Condition<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.message)
    }
}

/// Checked against the schedule's parameters before execution
pub type Precondition = Condition<Map<String, Value>>;
/// Checked against the agent's result after execution
pub type Postcondition = Condition<TaskResult>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskValidation {
    pub preconditions: Vec<Precondition>,
    pub postconditions: Vec<Postcondition>,
}

/// Exponential backoff settings; delays are in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_multiplier: f64,
    pub initial_delay: u64,
    pub max_delay: u64,
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts` have been made
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the next try, after `attempt` attempts have been made
    ///
    /// `min(initial_delay * backoff_multiplier^(attempt - 1), max_delay)`
    ///
    /// # Example
    /// ```
    /// use agent_ledger::domain::task::RetryPolicy;
    ///
    /// let policy = RetryPolicy {
    ///     max_attempts: 5,
    ///     backoff_multiplier: 2.0,
    ///     initial_delay: 1000,
    ///     max_delay: 5000,
    /// };
    /// assert_eq!(policy.delay_for_attempt(3).num_milliseconds(), 4000);
    /// assert_eq!(policy.delay_for_attempt(4).num_milliseconds(), 5000);
    /// ```
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.initial_delay as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay as f64).max(0.0);
        Duration::try_milliseconds(capped as i64).unwrap_or(Duration::MAX)
    }
}

/// Immutable description of a kind of task
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub tool_requirements: Vec<String>,
    pub parameters: Vec<ParameterDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<TaskValidation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// Declarative only; enforcing it belongs to the capability provider
    #[serde(rename = "timeoutMs", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl TaskDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version: version.into(),
            tool_requirements: Vec::new(),
            parameters: Vec::new(),
            validation: None,
            retry_policy: None,
            timeout_ms: None,
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterDefinition) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_precondition(mut self, condition: Precondition) -> Self {
        self.validation
            .get_or_insert_with(TaskValidation::default)
            .preconditions
            .push(condition);
        self
    }

    pub fn with_postcondition(mut self, condition: Postcondition) -> Self {
        self.validation
            .get_or_insert_with(TaskValidation::default)
            .postconditions
            .push(condition);
        self
    }

    pub fn preconditions(&self) -> &[Precondition] {
        self.validation
            .as_ref()
            .map(|v| v.preconditions.as_slice())
            .unwrap_or(&[])
    }

    pub fn postconditions(&self) -> &[Postcondition] {
        self.validation
            .as_ref()
            .map(|v| v.postconditions.as_slice())
            .unwrap_or(&[])
    }

    /// Checks `params` against the parameter schema and fills in defaults
    ///
    /// Parameters the schema does not declare are passed through untouched.
    /// All violations are reported together.
    pub fn normalize_parameters(&self, params: &Map<String, Value>) -> Result<Map<String, Value>, Vec<String>> {
        let mut normalized = params.clone();
        let mut errors = Vec::new();

        for param in &self.parameters {
            let present = normalized.get(&param.name).is_some_and(|v| !v.is_null());
            if !present {
                match &param.default {
                    Some(default) => {
                        normalized.insert(param.name.clone(), default.clone());
                    }
                    None if param.required => {
                        errors.push(format!("{} is required", param.name));
                    }
                    None => {}
                }
                continue;
            }

            let Some(value) = normalized.get(&param.name) else {
                continue;
            };

            if !param.param_type.matches(value) {
                errors.push(format!(
                    "{} must be of type {:?}",
                    param.name, param.param_type
                ));
                continue;
            }

            if let Some(validation) = &param.validation {
                if let Err(e) = validation.check(&param.name, value) {
                    errors.push(e);
                }
            }
        }

        if errors.is_empty() {
            Ok(normalized)
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_multiplier: 2.0,
            initial_delay: 1000,
            max_delay: 5000,
        }
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let delays: Vec<i64> = (1..=4)
            .map(|attempt| policy().delay_for_attempt(attempt).num_milliseconds())
            .collect();

        assert_eq!(delays, vec![1000, 2000, 4000, 5000]);
    }

    #[test]
    fn huge_delays_saturate() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_multiplier: 10.0,
            initial_delay: u64::MAX,
            max_delay: u64::MAX,
        };

        let delay = policy.delay_for_attempt(2);

        assert!(delay.num_milliseconds() > 0);
    }

    #[test]
    fn retry_allowed_below_max_attempts() {
        assert!(policy().allows_retry(1));
        assert!(policy().allows_retry(2));
        assert!(!policy().allows_retry(3));
    }

    #[test]
    fn missing_required_parameter_is_rejected() {
        let def = TaskDefinition::new("send", "Send", "1.0.0")
            .with_parameter(ParameterDefinition::required("to", ParameterType::String));

        let errors = def.normalize_parameters(&Map::new()).unwrap_err();

        assert_eq!(errors, vec!["to is required".to_string()]);
    }

    #[test]
    fn defaults_are_filled_in() {
        let def = TaskDefinition::new("send", "Send", "1.0.0").with_parameter(
            ParameterDefinition::optional("retries", ParameterType::Number, Some(json!(2))),
        );

        let normalized = def.normalize_parameters(&Map::new()).unwrap();

        assert_eq!(normalized["retries"], 2);
    }

    #[test]
    fn wrong_type_is_rejected() {
        let def = TaskDefinition::new("send", "Send", "1.0.0")
            .with_parameter(ParameterDefinition::required("count", ParameterType::Number));

        let result = def.normalize_parameters(&params(json!({"count": "three"})));

        assert!(result.is_err());
    }

    #[test]
    fn validation_rules_apply() {
        let def = TaskDefinition::new("send", "Send", "1.0.0")
            .with_parameter(
                ParameterDefinition::required("to", ParameterType::String).with_validation(
                    ParameterValidation {
                        pattern: Some("^[^@]+@[^@]+$".to_string()),
                        ..Default::default()
                    },
                ),
            )
            .with_parameter(
                ParameterDefinition::required("priority", ParameterType::Number).with_validation(
                    ParameterValidation {
                        min: Some(1.0),
                        max: Some(5.0),
                        ..Default::default()
                    },
                ),
            )
            .with_parameter(
                ParameterDefinition::required("channel", ParameterType::String).with_validation(
                    ParameterValidation {
                        allowed: Some(vec![json!("email"), json!("sms")]),
                        ..Default::default()
                    },
                ),
            );

        let ok = def.normalize_parameters(&params(json!({
            "to": "a@b.c", "priority": 3, "channel": "sms"
        })));
        assert!(ok.is_ok());

        let errors = def
            .normalize_parameters(&params(json!({
                "to": "nobody", "priority": 9, "channel": "fax"
            })))
            .unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn undeclared_parameters_pass_through() {
        let def = TaskDefinition::new("send", "Send", "1.0.0");

        let normalized = def.normalize_parameters(&params(json!({"extra": true}))).unwrap();

        assert_eq!(normalized["extra"], true);
    }

    #[test]
    fn conditions_serialize_as_messages() {
        let def = TaskDefinition::new("send", "Send", "1.0.0")
            .with_precondition(Precondition::new("has recipient", |p| p.contains_key("to")))
            .with_postcondition(Postcondition::new("succeeded", |r| r.success));

        let value = serde_json::to_value(&def).unwrap();

        assert_eq!(value["validation"]["preconditions"][0], "has recipient");
        assert_eq!(value["validation"]["postconditions"][0], "succeeded");
        assert!(def.preconditions()[0].check(&params(json!({"to": "x"}))));
    }
}
