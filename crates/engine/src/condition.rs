//! Rule conditions.
//!
//! A condition is a tree stored as a JSON document:
//!
//! ```json
//! {"and": [
//!     {"field": "merchant_name", "op": "contains", "value": "coffee"},
//!     {"or": [
//!         {"field": "amount", "op": "lt", "value": 10},
//!         {"field": "account", "op": "in", "value": ["Checking", "Visa"]}
//!     ]}
//! ]}
//! ```
//!
//! Leaf values are typed once, when the document is parsed. Evaluation is
//! total: a field/operator/value combination that does not make sense is
//! simply `false`.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{EngineError, ResultEngine};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    /// True iff every child is true. An empty list is true.
    All { and: Vec<Condition> },
    /// True iff at least one child is true. An empty list is false.
    Any { or: Vec<Condition> },
    Leaf(Predicate),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: Field,
    pub op: Operator,
    pub value: ConditionValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    MerchantName,
    Amount,
    /// Display name of the owning account.
    Account,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    Contains,
    Gte,
    Lte,
    Gt,
    Lt,
    In,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
}

/// The part of a transaction a condition can look at.
#[derive(Clone, Copy, Debug)]
pub struct TransactionSnapshot<'a> {
    pub name: &'a str,
    pub merchant_name: Option<&'a str>,
    pub amount: f64,
    pub account_name: &'a str,
}

enum FieldValue<'a> {
    Text(&'a str),
    Number(f64),
}

/// Deepest bracket nesting accepted in a condition document. Each
/// `and`/`or` level costs two (object and array).
pub const MAX_NESTING: usize = 1024;

/// Deserializes a JSON document without serde_json's built-in depth limit
/// of 128, bounded by [`MAX_NESTING`] instead. Deep trees are parsed on a
/// growable stack.
pub fn from_json<T: DeserializeOwned>(document: &str) -> serde_json::Result<T> {
    let depth = nesting_depth(document);
    if depth > MAX_NESTING {
        return Err(serde::de::Error::custom(format!(
            "nesting depth {depth} exceeds {MAX_NESTING}"
        )));
    }
    let mut de = serde_json::Deserializer::from_str(document);
    de.disable_recursion_limit();
    let value = T::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(value)
}

fn nesting_depth(document: &str) -> usize {
    let (mut depth, mut deepest) = (0usize, 0usize);
    let (mut in_string, mut escaped) = (false, false);
    for byte in document.bytes() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    deepest
}

impl Condition {
    /// Parses a stored condition document.
    pub fn parse(document: &str) -> ResultEngine<Self> {
        from_json(document)
            .map_err(|err| EngineError::InvalidCondition(format!("malformed condition: {err}")))
    }

    pub fn to_document(&self) -> ResultEngine<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn evaluate(&self, txn: &TransactionSnapshot<'_>) -> bool {
        match self {
            Self::All { and } => and.iter().all(|child| child.evaluate(txn)),
            Self::Any { or } => or.iter().any(|child| child.evaluate(txn)),
            Self::Leaf(predicate) => predicate.evaluate(txn),
        }
    }
}

impl Predicate {
    pub fn evaluate(&self, txn: &TransactionSnapshot<'_>) -> bool {
        let Some(actual) = self.field.resolve(txn) else {
            return false;
        };

        match (self.op, actual, &self.value) {
            (Operator::Equals, FieldValue::Text(actual), ConditionValue::Text(expected)) => {
                actual.to_lowercase() == expected.to_lowercase()
            }
            (Operator::Equals, FieldValue::Number(actual), ConditionValue::Number(expected)) => {
                actual == *expected
            }
            (Operator::Contains, FieldValue::Text(actual), ConditionValue::Text(needle)) => {
                actual.to_lowercase().contains(&needle.to_lowercase())
            }
            (Operator::Gte, FieldValue::Number(actual), ConditionValue::Number(bound)) => {
                actual >= *bound
            }
            (Operator::Lte, FieldValue::Number(actual), ConditionValue::Number(bound)) => {
                actual <= *bound
            }
            (Operator::Gt, FieldValue::Number(actual), ConditionValue::Number(bound)) => {
                actual > *bound
            }
            (Operator::Lt, FieldValue::Number(actual), ConditionValue::Number(bound)) => {
                actual < *bound
            }
            (Operator::In, FieldValue::Text(actual), ConditionValue::List(options)) => {
                let actual = actual.to_lowercase();
                options.iter().any(|option| option.to_lowercase() == actual)
            }
            _ => false,
        }
    }
}

impl Field {
    fn resolve<'a>(self, txn: &TransactionSnapshot<'a>) -> Option<FieldValue<'a>> {
        match self {
            Self::Name => Some(FieldValue::Text(txn.name)),
            Self::MerchantName => Some(FieldValue::Text(txn.merchant_name.unwrap_or(""))),
            Self::Amount => Some(FieldValue::Number(txn.amount)),
            Self::Account => Some(FieldValue::Text(txn.account_name)),
            Self::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coffee_txn() -> TransactionSnapshot<'static> {
        TransactionSnapshot {
            name: "BLUE BOTTLE #12",
            merchant_name: Some("Blue Bottle Coffee"),
            amount: 6.5,
            account_name: "Everyday Checking",
        }
    }

    fn leaf(doc: &str) -> Condition {
        Condition::parse(doc).unwrap()
    }

    #[test]
    fn contains_is_case_insensitive() {
        let cond = leaf(r#"{"field": "merchant_name", "op": "contains", "value": "coffee"}"#);
        assert!(cond.evaluate(&coffee_txn()));
    }

    #[test]
    fn equals_text_ignores_case() {
        let cond = leaf(r#"{"field": "account", "op": "equals", "value": "everyday CHECKING"}"#);
        assert!(cond.evaluate(&coffee_txn()));
    }

    #[test]
    fn equals_number_is_exact() {
        assert!(leaf(r#"{"field": "amount", "op": "equals", "value": 6.5}"#).evaluate(&coffee_txn()));
        assert!(!leaf(r#"{"field": "amount", "op": "equals", "value": 6}"#).evaluate(&coffee_txn()));
    }

    #[test]
    fn numeric_comparisons() {
        let txn = coffee_txn();
        assert!(leaf(r#"{"field": "amount", "op": "gte", "value": 6.5}"#).evaluate(&txn));
        assert!(leaf(r#"{"field": "amount", "op": "lte", "value": 6.5}"#).evaluate(&txn));
        assert!(leaf(r#"{"field": "amount", "op": "gt", "value": 6}"#).evaluate(&txn));
        assert!(!leaf(r#"{"field": "amount", "op": "lt", "value": 6}"#).evaluate(&txn));
    }

    #[test]
    fn in_matches_any_member_ignoring_case() {
        let cond = leaf(r#"{"field": "name", "op": "in", "value": ["nope", "blue bottle #12"]}"#);
        assert!(cond.evaluate(&coffee_txn()));
        let cond = leaf(r#"{"field": "name", "op": "in", "value": []}"#);
        assert!(!cond.evaluate(&coffee_txn()));
    }

    #[test]
    fn missing_merchant_name_is_empty_string() {
        let txn = TransactionSnapshot {
            merchant_name: None,
            ..coffee_txn()
        };
        assert!(leaf(r#"{"field": "merchant_name", "op": "equals", "value": ""}"#).evaluate(&txn));
        assert!(!leaf(r#"{"field": "merchant_name", "op": "contains", "value": "a"}"#).evaluate(&txn));
    }

    #[test]
    fn type_mismatches_are_false() {
        let txn = coffee_txn();
        for doc in [
            r#"{"field": "amount", "op": "contains", "value": "6"}"#,
            r#"{"field": "amount", "op": "equals", "value": "6.5"}"#,
            r#"{"field": "name", "op": "gt", "value": 1}"#,
            r#"{"field": "name", "op": "equals", "value": 1}"#,
            r#"{"field": "name", "op": "contains", "value": ["blue"]}"#,
            r#"{"field": "amount", "op": "in", "value": ["6.5"]}"#,
        ] {
            assert!(!leaf(doc).evaluate(&txn), "{doc}");
        }
    }

    #[test]
    fn unknown_field_or_operator_is_false() {
        let txn = coffee_txn();
        let unknown_field = leaf(r#"{"field": "memo", "op": "contains", "value": "x"}"#);
        assert!(matches!(
            unknown_field,
            Condition::Leaf(Predicate {
                field: Field::Unknown,
                ..
            })
        ));
        assert!(!unknown_field.evaluate(&txn));
        assert!(!leaf(r#"{"field": "name", "op": "matches", "value": ".*"}"#).evaluate(&txn));
    }

    #[test]
    fn empty_groups() {
        let txn = coffee_txn();
        assert!(leaf(r#"{"and": []}"#).evaluate(&txn));
        assert!(!leaf(r#"{"or": []}"#).evaluate(&txn));
    }

    #[test]
    fn nested_groups() {
        let cond = leaf(
            r#"{"and": [
                {"field": "merchant_name", "op": "contains", "value": "coffee"},
                {"or": [
                    {"field": "amount", "op": "gt", "value": 100},
                    {"field": "account", "op": "in", "value": ["Everyday Checking"]}
                ]}
            ]}"#,
        );
        assert!(cond.evaluate(&coffee_txn()));

        let txn = TransactionSnapshot {
            account_name: "Travel Card",
            ..coffee_txn()
        };
        assert!(!cond.evaluate(&txn));
    }

    #[test]
    fn deep_nesting_terminates() {
        let mut cond = leaf(r#"{"field": "name", "op": "contains", "value": "blue"}"#);
        for depth in 0..200 {
            cond = if depth % 2 == 0 {
                Condition::All { and: vec![cond] }
            } else {
                Condition::Any { or: vec![cond] }
            };
        }
        assert!(cond.evaluate(&coffee_txn()));
    }

    fn nested_document(levels: usize) -> String {
        let leaf = r#"{"field": "name", "op": "contains", "value": "blue"}"#;
        format!(
            "{}{leaf}{}",
            r#"{"and": ["#.repeat(levels),
            "]}".repeat(levels)
        )
    }

    #[test]
    fn deeply_nested_documents_parse() {
        let cond = Condition::parse(&nested_document(200)).unwrap();
        assert!(cond.evaluate(&coffee_txn()));
        let stored = cond.to_document().unwrap();
        assert_eq!(Condition::parse(&stored).unwrap(), cond);
    }

    #[test]
    fn nesting_beyond_the_bound_is_rejected() {
        assert!(matches!(
            Condition::parse(&nested_document(MAX_NESTING / 2 + 1)),
            Err(EngineError::InvalidCondition(_))
        ));
    }

    #[test]
    fn brackets_inside_strings_do_not_count_as_nesting() {
        assert_eq!(nesting_depth(r#"{"value": "[[[{{\"]]"}"#), 1);
    }

    #[test]
    fn malformed_documents_are_rejected() {
        for doc in [
            "",
            "not json",
            r#"{"field": "name", "op": "equals"}"#,
            r#"{"field": "name", "op": "equals", "value": true}"#,
            r#"{"field": "name", "op": "in", "value": ["a", 1]}"#,
            r#"{"and": {"field": "name"}}"#,
        ] {
            assert!(
                matches!(Condition::parse(doc), Err(EngineError::InvalidCondition(_))),
                "{doc}"
            );
        }
    }

    #[test]
    fn document_survives_a_round_trip() {
        let doc = r#"{"or":[{"field":"name","op":"equals","value":"rent"},{"field":"amount","op":"gte","value":1200.0}]}"#;
        let cond = leaf(doc);
        assert_eq!(Condition::parse(&cond.to_document().unwrap()).unwrap(), cond);
    }
}
