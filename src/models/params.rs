//! Hyperparameter values and tuning placeholders

use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A concrete hyperparameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Str(_) => None,
        }
    }

    /// Integer view; floats must be whole
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Total order: numbers compare numerically and sort before strings
    pub fn total_cmp(&self, other: &ParamValue) -> Ordering {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.as_str().cmp(&other.as_str()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => {
                if (v.abs() >= 1e-3 && v.abs() < 1e4) || *v == 0.0 {
                    write!(f, "{}", v)
                } else {
                    write!(f, "{:.3e}", v)
                }
            }
            ParamValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

/// Either a concrete value or a named placeholder resolved by tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tunable<T> {
    Fixed(T),
    Tune(String),
}

impl<T> Tunable<T> {
    pub fn tune(id: impl Into<String>) -> Self {
        Tunable::Tune(id.into())
    }

    pub fn is_tunable(&self) -> bool {
        matches!(self, Tunable::Tune(_))
    }

    pub fn tune_id(&self) -> Option<&str> {
        match self {
            Tunable::Tune(id) => Some(id),
            Tunable::Fixed(_) => None,
        }
    }

    /// The concrete value, or `UnresolvedParameter` naming the placeholder
    pub fn value(&self) -> Result<&T> {
        match self {
            Tunable::Fixed(v) => Ok(v),
            Tunable::Tune(id) => Err(FlowError::UnresolvedParameter(id.clone())),
        }
    }
}

impl<T: Clone> Tunable<T> {
    /// Substitute the placeholder if `params` binds its id
    pub fn resolve_with(&self, params: &ParamSet, convert: impl Fn(&ParamValue) -> Option<T>) -> Result<Self> {
        match self {
            Tunable::Fixed(v) => Ok(Tunable::Fixed(v.clone())),
            Tunable::Tune(id) => match params.get(id) {
                None => Ok(self.clone()),
                Some(value) => convert(value)
                    .map(Tunable::Fixed)
                    .ok_or_else(|| FlowError::invalid(id, value, "value has the wrong type")),
            },
        }
    }
}

impl<T> From<T> for Tunable<T> {
    fn from(v: T) -> Self {
        Tunable::Fixed(v)
    }
}

impl<T: fmt::Display> fmt::Display for Tunable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tunable::Fixed(v) => write!(f, "{}", v),
            Tunable::Tune(id) => write!(f, "tune(\"{}\")", id),
        }
    }
}

/// One candidate binding of tuning ids to values
pub type ParamSet = BTreeMap<String, ParamValue>;

/// Order candidates from simplest to most complex: compare values key by key
/// in sorted key order; a missing key sorts first.
pub fn compare_param_sets(a: &ParamSet, b: &ParamSet) -> Ordering {
    let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
    keys.sort();
    keys.dedup();
    for key in keys {
        let ord = match (a.get(key), b.get(key)) {
            (Some(x), Some(y)) => x.total_cmp(y),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// `degree=2, penalty=0.01`
pub fn format_params(params: &ParamSet) -> String {
    if params.is_empty() {
        return "-".to_string();
    }
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, ParamValue)]) -> ParamSet {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_value_order() {
        assert_eq!(ParamValue::Int(2).total_cmp(&ParamValue::Float(2.5)), Ordering::Less);
        assert_eq!(ParamValue::Float(1e-3).total_cmp(&ParamValue::Int(0)), Ordering::Greater);
        assert_eq!(ParamValue::from("a").total_cmp(&ParamValue::from("b")), Ordering::Less);
        assert_eq!(ParamValue::Int(9).total_cmp(&ParamValue::from("a")), Ordering::Less);
    }

    #[test]
    fn test_param_set_order() {
        let a = set(&[("degree", 2.into()), ("penalty", 0.5.into())]);
        let b = set(&[("degree", 3.into()), ("penalty", 0.1.into())]);
        assert_eq!(compare_param_sets(&a, &b), Ordering::Less);
        assert_eq!(compare_param_sets(&b, &a), Ordering::Greater);
        assert_eq!(compare_param_sets(&a, &a.clone()), Ordering::Equal);
    }

    #[test]
    fn test_tunable_resolution() {
        let t: Tunable<i64> = Tunable::tune("degree");
        assert!(matches!(t.value(), Err(FlowError::UnresolvedParameter(ref id)) if id == "degree"));

        let params = set(&[("degree", 3.into())]);
        let resolved = t.resolve_with(&params, ParamValue::as_i64).unwrap();
        assert_eq!(resolved, Tunable::Fixed(3));

        let untouched = t.resolve_with(&ParamSet::new(), ParamValue::as_i64).unwrap();
        assert!(untouched.is_tunable());

        let wrong = set(&[("degree", "high".into())]);
        assert!(t.resolve_with(&wrong, ParamValue::as_i64).is_err());
    }

    #[test]
    fn test_serde_shapes() {
        let t: Tunable<ParamValue> = serde_json::from_str(r#"{"tune":"mtry"}"#).unwrap();
        assert_eq!(t.tune_id(), Some("mtry"));
        let f: Tunable<ParamValue> = serde_json::from_str(r#"{"fixed":0.25}"#).unwrap();
        assert_eq!(f, Tunable::Fixed(ParamValue::Float(0.25)));
        let p: ParamSet = serde_json::from_str(r#"{"degree":2}"#).unwrap();
        assert_eq!(p["degree"], ParamValue::Int(2));
    }
}
