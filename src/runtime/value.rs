//! Dynamic values observed by watchers.
//!
//! Arrays and objects live behind `Rc`, so "identity" means pointer
//! equality, the same way a browser compares two object references.
//! Contents behind an `Rc` are never mutated in place; a watcher's cached
//! value is therefore a stable snapshot.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(Rc<Vec<Value>>),
    Object(Rc<BTreeMap<String, Value>>),
    Promise(Promise),
}

/// Hashable stand-in for a value's identity; keys for list reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    Undefined,
    Null,
    Bool(bool),
    Number(u64),
    String(Rc<str>),
    Ref(usize),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::String(Rc::from(s))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(items))
    }

    pub fn object<K, I>(fields: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(Rc::new(
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Strict identity (`===`), except that NaN equals itself.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn identity_key(&self) -> IdentityKey {
        match self {
            Value::Undefined => IdentityKey::Undefined,
            Value::Null => IdentityKey::Null,
            Value::Bool(b) => IdentityKey::Bool(*b),
            Value::Number(n) => {
                let n = if *n == 0.0 {
                    0.0
                } else if n.is_nan() {
                    f64::NAN
                } else {
                    *n
                };
                IdentityKey::Number(n.to_bits())
            }
            Value::String(s) => IdentityKey::String(s.clone()),
            Value::Array(a) => IdentityKey::Ref(Rc::as_ptr(a) as *const () as usize),
            Value::Object(o) => IdentityKey::Ref(Rc::as_ptr(o) as *const () as usize),
            Value::Promise(p) => IdentityKey::Ref(p.addr()),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Property access: object fields, array indexes and `length`.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(fields) => fields.get(key).cloned().unwrap_or_default(),
            Value::Array(items) => {
                if key == "length" {
                    return Value::Number(items.len() as f64);
                }
                key.parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default()
            }
            Value::String(s) if key == "length" => Value::Number(s.chars().count() as f64),
            _ => Value::Undefined,
        }
    }

    /// String conversion as done by template literals.
    pub fn to_text(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_text(*n),
            Value::String(s) => s.to_string(),
            Value::Array(items) => items
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_text() })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Promise(_) => "[object Promise]".to_string(),
        }
    }
}

fn number_to_text(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", number_to_text(*n)),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Array(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Object(fields) => f.debug_map().entries(fields.iter()).finish(),
            Value::Promise(p) => p.fmt(f),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => {
                Value::array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => {
                Value::object(fields.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPARATORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Shallow array comparison; true when changed.
pub fn compare_array(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            x.len() != y.len() || x.iter().zip(y.iter()).any(|(p, q)| !p.same(q))
        }
        (Value::Array(_), _) | (_, Value::Array(_)) => true,
        _ => !a.same(b),
    }
}

/// Structural comparison bounded by `depth`; true when changed.
/// Anything deeper than the bound compares equal.
pub fn compare_deep(a: &Value, b: &Value, depth: i32) -> bool {
    if depth < 0 {
        return false;
    }
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            x.len() != y.len()
                || x.iter().zip(y.iter()).any(|(p, q)| compare_deep(p, q, depth - 1))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.iter().any(|(k, v)| match y.get(k) {
                Some(w) => compare_deep(v, w, depth - 1),
                None => true,
            }) || y.keys().any(|k| !x.contains_key(k))
        }
        (Value::Array(_), Value::Object(_)) | (Value::Object(_), Value::Array(_)) => true,
        _ => !a.same(b),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROMISE
// ═══════════════════════════════════════════════════════════════════════════════

pub type Settled = Result<Value, Value>;

/// Single-threaded promise handle; callbacks run synchronously on settle.
#[derive(Clone, Default)]
pub struct Promise(Rc<RefCell<PromiseState>>);

#[derive(Default)]
struct PromiseState {
    settled: Option<Settled>,
    callbacks: Vec<Box<dyn FnOnce(Settled)>>,
}

impl Promise {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolved(value: Value) -> Self {
        let p = Self::new();
        p.resolve(value);
        p
    }

    pub fn resolve(&self, value: Value) {
        self.settle(Ok(value));
    }

    pub fn reject(&self, error: Value) {
        self.settle(Err(error));
    }

    fn settle(&self, result: Settled) {
        let callbacks = {
            let mut state = self.0.borrow_mut();
            if state.settled.is_some() {
                return;
            }
            state.settled = Some(result.clone());
            std::mem::take(&mut state.callbacks)
        };
        for cb in callbacks {
            cb(result.clone());
        }
    }

    pub fn then(&self, cb: impl FnOnce(Settled) + 'static) {
        let settled = self.0.borrow().settled.clone();
        match settled {
            Some(result) => cb(result),
            None => self.0.borrow_mut().callbacks.push(Box::new(cb)),
        }
    }

    pub fn state(&self) -> Option<Settled> {
        self.0.borrow().settled.clone()
    }

    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("settled", &self.0.borrow().settled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity() {
        let a = Value::array(vec![1.into()]);
        let b = Value::array(vec![1.into()]);
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
        assert!(Value::Number(f64::NAN).same(&Value::Number(f64::NAN)));
        assert!(Value::from("x").same(&Value::from("x".to_string())));
        assert_eq!(Value::Number(0.0).identity_key(), Value::Number(-0.0).identity_key());
    }

    #[test]
    fn test_text_conversion() {
        assert_eq!(Value::from(3).to_text(), "3");
        assert_eq!(Value::from(1.5).to_text(), "1.5");
        assert_eq!(Value::Undefined.to_text(), "undefined");
        assert_eq!(Value::array(vec![1.into(), Value::Null, "a".into()]).to_text(), "1,,a");
        assert!(!Value::from("").truthy());
        assert!(Value::object(Vec::<(String, Value)>::new()).truthy());
    }

    #[test]
    fn test_from_json_and_get() {
        let v = Value::from(json!({"user": {"name": "Ada"}, "tags": ["a", "b"]}));
        assert_eq!(v.get("user").get("name").to_text(), "Ada");
        assert_eq!(v.get("tags").get("length").to_text(), "2");
        assert_eq!(v.get("tags").get("1").to_text(), "b");
        assert!(v.get("missing").is_nullish());
    }

    #[test]
    fn test_compare_array() {
        let x: Value = 1.into();
        let a = Value::array(vec![x.clone()]);
        assert!(!compare_array(&a, &Value::array(vec![x.clone()])));
        assert!(compare_array(&a, &Value::array(vec![x.clone(), x])));
        assert!(compare_array(&a, &Value::Null));
    }

    #[test]
    fn test_compare_deep_bounds() {
        let a = Value::from(json!({"a": {"b": {"c": 1}}}));
        let b = Value::from(json!({"a": {"b": {"c": 2}}}));
        assert!(compare_deep(&a, &b, 10));
        assert!(compare_deep(&a, &b, 3));
        // the change sits three levels down; a bound of two does not reach it
        assert!(!compare_deep(&a, &b, 2));
        assert!(!compare_deep(&a, &Value::from(json!({"a": {"b": {"c": 1}}})), 10));
        assert!(compare_deep(&Value::from(json!([1, 2])), &Value::from(json!([1])), 10));
        assert!(compare_deep(&Value::from(json!({"a": 1})), &Value::from(json!({"a": 1, "b": 2})), 10));
    }

    #[test]
    fn test_promise_callbacks() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let p = Promise::new();
        let s = seen.clone();
        p.then(move |r| s.borrow_mut().push(r));
        assert!(seen.borrow().is_empty());
        p.resolve("done".into());
        p.reject("late".into());
        let s = seen.clone();
        p.then(move |r| s.borrow_mut().push(r));
        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|r| matches!(r, Ok(v) if v.to_text() == "done")));
    }
}
