//! Loose, script-style operator semantics over JSON values.

use serde_json::{Number, Value};
use std::cmp::Ordering;

/// The closed set of binary operators. There is no precedence between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Less,
    Greater,
    And,
    Or,
    LooseEqual,
    StrictEqual,
    StrictNotEqual,
}

impl BinaryOperator {
    /// `None` for any operator run outside the supported set, e.g. `&&!`.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => Self::Add,
            "-" => Self::Subtract,
            "<" => Self::Less,
            ">" => Self::Greater,
            "&&" => Self::And,
            "||" => Self::Or,
            "==" => Self::LooseEqual,
            "===" => Self::StrictEqual,
            "!==" => Self::StrictNotEqual,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Less => "<",
            Self::Greater => ">",
            Self::And => "&&",
            Self::Or => "||",
            Self::LooseEqual => "==",
            Self::StrictEqual => "===",
            Self::StrictNotEqual => "!==",
        }
    }

    /// Applies a non-short-circuiting operator. `And`/`Or` are accepted too and
    /// return the deciding operand.
    pub fn apply(self, left: Value, right: Value) -> Value {
        match self {
            Self::Add => add(left, right),
            Self::Subtract => number_value(to_number(&left) - to_number(&right)),
            Self::Less => Value::Bool(compare(&left, &right) == Some(Ordering::Less)),
            Self::Greater => Value::Bool(compare(&left, &right) == Some(Ordering::Greater)),
            Self::And => {
                if truthy(&left) {
                    right
                } else {
                    left
                }
            }
            Self::Or => {
                if truthy(&left) {
                    left
                } else {
                    right
                }
            }
            Self::LooseEqual => Value::Bool(loose_equal(&left, &right)),
            Self::StrictEqual => Value::Bool(strict_equal(&left, &right)),
            Self::StrictNotEqual => Value::Bool(!strict_equal(&left, &right)),
        }
    }
}

/// Script truthiness: `null`, `false`, `0`, `NaN` and `""` are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text form used by interpolation, class names and style values.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => display_number(number),
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                item => display(item),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

fn display_number(number: &Number) -> String {
    if number.is_f64() {
        match number.as_f64() {
            Some(float) if float == 0.0 => "0".to_string(),
            Some(float) if float.fract() == 0.0 && float.abs() < 1e21 => format!("{float:.0}"),
            Some(float) => float.to_string(),
            None => number.to_string(),
        }
    } else {
        number.to_string()
    }
}

/// Integral results become integers so `1 + 2` displays as `3`, not `3.0`.
/// Non-finite results have no JSON form and collapse to null.
pub fn number_value(number: f64) -> Value {
    if !number.is_finite() {
        return Value::Null;
    }
    if number.fract() == 0.0 && number.abs() < 9.007_199_254_740_992e15 {
        return Value::from(number as i64);
    }
    Number::from_f64(number).map_or(Value::Null, Value::Number)
}

/// Numeric coercion; anything without a numeric reading is `NaN`.
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(flag) => f64::from(u8::from(*flag)),
        Value::Number(number) => number.as_f64().unwrap_or(f64::NAN),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Array(items) => match items.as_slice() {
            [] => 0.0,
            [single] => to_number(single),
            _ => f64::NAN,
        },
        Value::Object(_) => f64::NAN,
    }
}

fn add(left: Value, right: Value) -> Value {
    let concatenates = |value: &Value| matches!(value, Value::String(_) | Value::Array(_) | Value::Object(_));
    if concatenates(&left) || concatenates(&right) {
        Value::String(display(&left) + &display(&right))
    } else {
        number_value(to_number(&left) + to_number(&right))
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        _ => to_number(left).partial_cmp(&to_number(right)),
    }
}

fn loose_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(left), Value::String(right)) => left == right,
        (Value::Array(_) | Value::Object(_), Value::Array(_) | Value::Object(_)) => left == right,
        (Value::Array(_) | Value::Object(_), _) => display(left) == display(right) || numeric_equal(left, right),
        (_, Value::Array(_) | Value::Object(_)) => display(left) == display(right) || numeric_equal(left, right),
        _ => numeric_equal(left, right),
    }
}

fn numeric_equal(left: &Value, right: &Value) -> bool {
    to_number(left) == to_number(right)
}

/// `===` on values: numbers compare by magnitude whatever their JSON
/// representation, compound values compare element by element.
pub fn strict_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => left.as_f64() == right.as_f64(),
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len() && left.iter().zip(right).all(|(left, right)| strict_equal(left, right))
        }
        (Value::Object(left), Value::Object(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .all(|(key, left)| right.get(key).is_some_and(|right| strict_equal(left, right)))
        }
        _ => left == right,
    }
}

/// Article-prefixed kind of a value, for error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_concatenates_when_either_side_is_text() {
        assert_eq!(BinaryOperator::Add.apply(json!(1), json!(2)), json!(3));
        assert_eq!(BinaryOperator::Add.apply(json!("a"), json!(1)), json!("a1"));
        assert_eq!(BinaryOperator::Add.apply(json!(5), json!("px")), json!("5px"));
        assert_eq!(BinaryOperator::Add.apply(json!(true), json!(1)), json!(2));
        assert_eq!(BinaryOperator::Add.apply(json!(0.5), json!(0.25)), json!(0.75));
    }

    #[test]
    fn subtract_coerces_to_numbers() {
        assert_eq!(BinaryOperator::Subtract.apply(json!("10"), json!(4)), json!(6));
        assert_eq!(BinaryOperator::Subtract.apply(json!("x"), json!(1)), Value::Null);
    }

    #[test]
    fn comparisons_are_lexicographic_only_between_strings() {
        assert_eq!(BinaryOperator::Less.apply(json!("10"), json!("9")), json!(true));
        assert_eq!(BinaryOperator::Less.apply(json!(10), json!("9")), json!(false));
        assert_eq!(BinaryOperator::Greater.apply(json!(3), json!(2)), json!(true));
        assert_eq!(BinaryOperator::Greater.apply(json!("x"), json!(2)), json!(false));
    }

    #[test]
    fn logical_operators_return_the_deciding_operand() {
        assert_eq!(BinaryOperator::And.apply(json!(0), json!("b")), json!(0));
        assert_eq!(BinaryOperator::And.apply(json!(1), json!("b")), json!("b"));
        assert_eq!(BinaryOperator::Or.apply(json!(""), json!("c")), json!("c"));
        assert_eq!(BinaryOperator::Or.apply(json!([]), json!("c")), json!([]));
    }

    #[test]
    fn equality_flavours() {
        assert_eq!(BinaryOperator::LooseEqual.apply(json!(1), json!("1")), json!(true));
        assert_eq!(BinaryOperator::LooseEqual.apply(json!(null), json!(0)), json!(false));
        assert_eq!(BinaryOperator::StrictEqual.apply(json!(1), json!("1")), json!(false));
        assert_eq!(BinaryOperator::StrictEqual.apply(json!(1), json!(1.0)), json!(true));
        assert_eq!(BinaryOperator::StrictNotEqual.apply(json!("a"), json!("b")), json!(true));
    }

    #[test]
    fn strict_equality_ignores_number_representation() {
        assert!(strict_equal(&json!(2.0), &json!(2)));
        assert!(strict_equal(&json!({"x": [1.0, "a"]}), &json!({"x": [1, "a"]})));
        assert!(!strict_equal(&json!([1, 2]), &json!([1, 2, 3])));
        assert!(!strict_equal(&json!({"x": 1}), &json!({"y": 1})));
        assert!(!strict_equal(&json!(0), &json!(false)));
    }

    #[test]
    fn display_follows_script_conventions() {
        assert_eq!(display(&json!(null)), "null");
        assert_eq!(display(&json!([1, null, "x"])), "1,,x");
        assert_eq!(display(&json!({"a": 1})), "[object Object]");
        assert_eq!(display(&json!(2.0)), "2");
        assert_eq!(display(&json!(2.5)), "2.5");
    }

    #[test]
    fn truthiness() {
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&Value::Null));
        assert!(truthy(&json!("0")));
        assert!(truthy(&json!({})));
    }
}
