//! Story mechanics: conditions that gate transitions and effects that
//! mutate node or graph variables.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::entities::Locals;
use crate::error::EffectError;

/// Anything a condition can read variables from.
pub trait Scope {
    /// Exact-key lookup.
    fn lookup(&self, key: &str) -> Option<&Value>;

    /// Lookup with dotted-path support: `actor.label` reads field `label`
    /// of the object bound to `actor`. An exact key always wins.
    fn resolve(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.lookup(key) {
            return Some(value);
        }
        let mut parts = key.split('.');
        let head = parts.next()?;
        let mut value = self.lookup(head)?;
        let mut walked = false;
        for part in parts {
            value = value.get(part)?;
            walked = true;
        }
        walked.then_some(value)
    }
}

impl Scope for Locals {
    fn lookup(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

/// Truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// A predicate over a scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// The key is bound to a truthy value.
    Truthy { key: String },
    Equals { key: String, value: Value },
    /// The key is bound to a number `>= value`.
    AtLeast { key: String, value: f64 },
    Not { condition: Box<Condition> },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
}

impl Condition {
    pub fn truthy(key: impl Into<String>) -> Self {
        Condition::Truthy { key: key.into() }
    }

    pub fn equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Equals {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn at_least(key: impl Into<String>, value: f64) -> Self {
        Condition::AtLeast {
            key: key.into(),
            value,
        }
    }

    pub fn negate(self) -> Self {
        Condition::Not {
            condition: Box::new(self),
        }
    }

    pub fn evaluate(&self, scope: &dyn Scope) -> bool {
        match self {
            Condition::Truthy { key } => scope.resolve(key).map(is_truthy).unwrap_or(false),
            Condition::Equals { key, value } => scope.resolve(key) == Some(value),
            Condition::AtLeast { key, value } => scope
                .resolve(key)
                .and_then(Value::as_f64)
                .map(|v| v >= *value)
                .unwrap_or(false),
            Condition::Not { condition } => !condition.evaluate(scope),
            Condition::All { conditions } => conditions.iter().all(|c| c.evaluate(scope)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.evaluate(scope)),
        }
    }

    /// Human-readable form used in "unavailable" explanations.
    pub fn describe(&self) -> String {
        match self {
            Condition::Truthy { key } => key.clone(),
            Condition::Equals { key, value } => format!("{} == {}", key, value),
            Condition::AtLeast { key, value } => format!("{} >= {}", key, value),
            Condition::Not { condition } => format!("not ({})", condition.describe()),
            Condition::All { conditions } => join(conditions, " and "),
            Condition::Any { conditions } => join(conditions, " or "),
        }
    }
}

fn join(conditions: &[Condition], separator: &str) -> String {
    conditions
        .iter()
        .map(Condition::describe)
        .collect::<Vec<_>>()
        .join(separator)
}

/// Which variables an effect writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectTarget {
    /// Locals of the node at the cursor.
    #[default]
    Node,
    /// Graph-wide locals.
    Graph,
}

/// A mutation of node or graph locals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Effect {
    Set {
        #[serde(default)]
        target: EffectTarget,
        key: String,
        value: Value,
    },
    /// Numeric increment; a missing key counts as zero. Integer plus
    /// integer stays exact, anything else is added as floating point.
    Add {
        #[serde(default)]
        target: EffectTarget,
        key: String,
        amount: Number,
    },
    Remove {
        #[serde(default)]
        target: EffectTarget,
        key: String,
    },
}

impl Effect {
    pub fn set(target: EffectTarget, key: impl Into<String>, value: impl Into<Value>) -> Self {
        Effect::Set {
            target,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn add(target: EffectTarget, key: impl Into<String>, amount: f64) -> Self {
        let amount = match number(amount) {
            Value::Number(n) => n,
            _ => Number::from(0),
        };
        Effect::Add {
            target,
            key: key.into(),
            amount,
        }
    }

    /// Exact integer increment.
    pub fn add_int(target: EffectTarget, key: impl Into<String>, amount: i64) -> Self {
        Effect::Add {
            target,
            key: key.into(),
            amount: Number::from(amount),
        }
    }

    pub fn remove(target: EffectTarget, key: impl Into<String>) -> Self {
        Effect::Remove {
            target,
            key: key.into(),
        }
    }

    pub fn target(&self) -> EffectTarget {
        match self {
            Effect::Set { target, .. } | Effect::Add { target, .. } | Effect::Remove { target, .. } => {
                *target
            }
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Effect::Set { key, .. } | Effect::Add { key, .. } | Effect::Remove { key, .. } => key,
        }
    }

    /// Apply to a set of locals.
    pub fn apply(&self, locals: &mut Locals) -> Result<(), EffectError> {
        match self {
            Effect::Set { key, value, .. } => {
                locals.insert(key.clone(), value.clone());
            }
            Effect::Add { key, amount, .. } => {
                let current = match locals.get(key) {
                    None | Some(Value::Null) => Number::from(0),
                    Some(Value::Number(n)) => n.clone(),
                    Some(_) => return Err(EffectError::NotNumeric { key: key.clone() }),
                };
                let exact = current
                    .as_i64()
                    .zip(amount.as_i64())
                    .and_then(|(a, b)| a.checked_add(b))
                    .map(Value::from);
                let sum = match exact {
                    Some(sum) => sum,
                    None => {
                        let a = current.as_f64().unwrap_or_default();
                        let b = amount.as_f64().unwrap_or_default();
                        number(a + b)
                    }
                };
                locals.insert(key.clone(), sum);
            }
            Effect::Remove { key, .. } => {
                locals.remove(key);
            }
        }
        Ok(())
    }
}

/// Keep whole numbers integral so `3 + 1` stays `4`, not `4.0`.
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Locals {
        let mut locals = Locals::new();
        locals.insert("gold".to_string(), json!(12));
        locals.insert("door_open".to_string(), json!(false));
        locals.insert("mood".to_string(), json!("grumpy"));
        locals.insert(
            "shopkeeper".to_string(),
            json!({ "label": "Bob", "stock": { "apples": 3 } }),
        );
        locals
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!(0.5)));
        assert!(is_truthy(&json!([1])));
    }

    #[test]
    fn test_dotted_resolution() {
        let scope = scope();
        assert_eq!(scope.resolve("shopkeeper.label"), Some(&json!("Bob")));
        assert_eq!(scope.resolve("shopkeeper.stock.apples"), Some(&json!(3)));
        assert_eq!(scope.resolve("shopkeeper.missing"), None);
        assert_eq!(scope.resolve("gold"), Some(&json!(12)));
        assert_eq!(scope.resolve("nobody"), None);
    }

    #[test]
    fn test_condition_evaluation() {
        let scope = scope();
        assert!(Condition::at_least("gold", 10.0).evaluate(&scope));
        assert!(!Condition::at_least("gold", 20.0).evaluate(&scope));
        assert!(Condition::equals("mood", "grumpy").evaluate(&scope));
        assert!(!Condition::truthy("door_open").evaluate(&scope));
        assert!(Condition::truthy("door_open").negate().evaluate(&scope));
        assert!(!Condition::truthy("undefined").evaluate(&scope));
        assert!(Condition::Any {
            conditions: vec![Condition::truthy("door_open"), Condition::truthy("gold")]
        }
        .evaluate(&scope));
        assert!(!Condition::All {
            conditions: vec![Condition::truthy("door_open"), Condition::truthy("gold")]
        }
        .evaluate(&scope));
    }

    #[test]
    fn test_condition_describe() {
        let condition = Condition::All {
            conditions: vec![
                Condition::at_least("gold", 5.0),
                Condition::truthy("alarm").negate(),
            ],
        };
        assert_eq!(condition.describe(), "gold >= 5 and not (alarm)");
    }

    #[test]
    fn test_effects() {
        let mut locals = scope();

        Effect::add(EffectTarget::Node, "gold", 3.0).apply(&mut locals).unwrap();
        assert_eq!(locals["gold"], json!(15));

        Effect::add(EffectTarget::Node, "visits", 1.0).apply(&mut locals).unwrap();
        assert_eq!(locals["visits"], json!(1));

        Effect::add(EffectTarget::Node, "ratio", 0.5).apply(&mut locals).unwrap();
        assert_eq!(locals["ratio"], json!(0.5));

        Effect::add(EffectTarget::Node, "gold", -2.5).apply(&mut locals).unwrap();
        assert_eq!(locals["gold"], json!(12.5));

        Effect::set(EffectTarget::Graph, "door_open", true)
            .apply(&mut locals)
            .unwrap();
        assert_eq!(locals["door_open"], json!(true));

        Effect::remove(EffectTarget::Node, "mood").apply(&mut locals).unwrap();
        assert!(!locals.contains_key("mood"));
    }

    #[test]
    fn test_add_large_integers_exactly() {
        let mut locals = Locals::new();
        let big = (1_i64 << 53) + 1;
        locals.insert("stars".to_string(), json!(big));

        Effect::add_int(EffectTarget::Node, "stars", 2).apply(&mut locals).unwrap();
        assert_eq!(locals["stars"], json!(big + 2));

        Effect::add(EffectTarget::Node, "stars", 0.0).apply(&mut locals).unwrap();
        assert_eq!(locals["stars"], json!(big + 2));

        locals.insert("stars".to_string(), json!(i64::MAX));
        Effect::add_int(EffectTarget::Node, "stars", 1).apply(&mut locals).unwrap();
        assert!(locals["stars"].is_f64());
    }

    #[test]
    fn test_add_to_non_numeric_fails() {
        let mut locals = scope();
        let err = Effect::add(EffectTarget::Node, "shopkeeper", 1.0)
            .apply(&mut locals)
            .unwrap_err();
        assert_eq!(
            err,
            EffectError::NotNumeric {
                key: "shopkeeper".to_string()
            }
        );
    }

    #[test]
    fn test_condition_serialization() {
        let condition = Condition::at_least("gold", 5.0);
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["op"], "at_least");
        let back: Condition = serde_json::from_value(json).unwrap();
        assert_eq!(back, condition);
    }
}
