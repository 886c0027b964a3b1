//! Label selectors: equality, set-based and existence requirements over a label map.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::RolloutError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Operator {
    Equals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl Operator {
    /// Parse a `matchExpressions` operator.
    pub fn from_expression(op: &str) -> Option<Self> {
        match op {
            "In" => Some(Operator::In),
            "NotIn" => Some(Operator::NotIn),
            "Exists" => Some(Operator::Exists),
            "DoesNotExist" => Some(Operator::DoesNotExist),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub op: Operator,
    /// Sorted, deduplicated values.
    pub values: Vec<String>,
}

impl Requirement {
    pub fn new(key: impl Into<String>, op: Operator, values: impl IntoIterator<Item = String>) -> Result<Self, RolloutError> {
        let key = key.into();
        if key.is_empty() {
            return Err(RolloutError::InvalidSelector("empty label key".into()));
        }
        let mut values: Vec<String> = values.into_iter().collect();
        values.sort();
        values.dedup();
        match op {
            Operator::Equals if values.len() != 1 => {
                return Err(RolloutError::InvalidSelector(format!("{key}: exact match requires one value")));
            }
            Operator::In | Operator::NotIn if values.is_empty() => {
                return Err(RolloutError::InvalidSelector(format!("{key}: values must be non-empty for {op:?}")));
            }
            Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                return Err(RolloutError::InvalidSelector(format!("{key}: values must be empty for {op:?}")));
            }
            _ => {}
        }
        Ok(Self { key, op, values })
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.op {
            Operator::Equals | Operator::In => value.map(|v| self.values.contains(v)).unwrap_or(false),
            Operator::NotIn => value.map(|v| !self.values.contains(v)).unwrap_or(true),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Operator::Equals => write!(f, "{}={}", self.key, self.values[0]),
            Operator::In => write!(f, "{} in ({})", self.key, self.values.join(",")),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, self.values.join(",")),
            Operator::Exists => f.write_str(&self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// Immutable conjunction of requirements. An empty selector matches every label set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Selector {
    requirements: SmallVec<[Requirement; 4]>,
}

impl Selector {
    pub fn everything() -> Self {
        Self::default()
    }

    /// Equality selector built from a plain label map.
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Result<Self, RolloutError> {
        Self::from_parts(labels, std::iter::empty::<(String, String, Vec<String>)>())
    }

    /// Build from `matchLabels` plus `(key, operator, values)` expressions.
    pub fn from_parts<I>(match_labels: &BTreeMap<String, String>, expressions: I) -> Result<Self, RolloutError>
    where
        I: IntoIterator<Item = (String, String, Vec<String>)>,
    {
        let mut requirements: SmallVec<[Requirement; 4]> = SmallVec::new();
        for (k, v) in match_labels {
            requirements.push(Requirement::new(k.clone(), Operator::Equals, [v.clone()])?);
        }
        for (key, op, values) in expressions {
            let op = Operator::from_expression(&op)
                .ok_or_else(|| RolloutError::InvalidSelector(format!("{op:?} is not a valid label selector operator")))?;
            requirements.push(Requirement::new(key, op, values)?);
        }
        requirements.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{r}")?;
        }
        Ok(())
    }
}
