// ABOUTME: Environment maps for variable bindings with copy-on-write extension

use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

/// Name-to-value bindings. The map is shared behind an `Rc` and never
/// mutated in place: extending an environment clones the map, so closures
/// keep seeing exactly the bindings present at capture time.
#[derive(Debug, Clone, Default)]
pub struct Env {
    bindings: Rc<HashMap<String, Value>>,
}

impl Env {
    pub fn new() -> Self {
        Env::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.bindings.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// A new environment with one extra binding.
    pub fn with(&self, name: impl Into<String>, value: Value) -> Env {
        let mut map = (*self.bindings).clone();
        map.insert(name.into(), value);
        Env {
            bindings: Rc::new(map),
        }
    }

    /// A new environment with a batch of extra bindings.
    pub fn with_many<I>(&self, bindings: I) -> Env
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut map = (*self.bindings).clone();
        for (name, value) in bindings {
            map.insert(name, value);
        }
        Env {
            bindings: Rc::new(map),
        }
    }

    /// Caller environment overlaid with captured bindings; the captured
    /// side wins for names present in both.
    pub fn merge(&self, captured: &Env) -> Env {
        if captured.bindings.is_empty() {
            return self.clone();
        }
        if self.bindings.is_empty() {
            return captured.clone();
        }
        let mut map = (*self.bindings).clone();
        for (name, value) in captured.bindings.iter() {
            map.insert(name.clone(), value.clone());
        }
        Env {
            bindings: Rc::new(map),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::number::Number;

    fn num(v: i64) -> Value {
        Value::Number(Number::from_i64(v))
    }

    #[test]
    fn test_with_and_get() {
        let env = Env::new().with("x", num(42));
        match env.get("x") {
            Some(Value::Number(n)) => assert_eq!(n, Number::from_i64(42)),
            _ => panic!("Expected Number(42)"),
        }
        assert!(env.get("missing").is_none());
    }

    #[test]
    fn test_extension_does_not_disturb_parent() {
        let base = Env::new().with("x", num(1));
        let extended = base.with("x", num(2));

        match base.get("x") {
            Some(Value::Number(n)) => assert_eq!(n, Number::from_i64(1)),
            _ => panic!("Expected Number(1)"),
        }
        match extended.get("x") {
            Some(Value::Number(n)) => assert_eq!(n, Number::from_i64(2)),
            _ => panic!("Expected Number(2)"),
        }
    }

    #[test]
    fn test_merge_captured_wins() {
        let caller = Env::new().with("x", num(1)).with("y", num(2));
        let captured = Env::new().with("x", num(10));
        let merged = caller.merge(&captured);

        match merged.get("x") {
            Some(Value::Number(n)) => assert_eq!(n, Number::from_i64(10)),
            _ => panic!("Expected Number(10)"),
        }
        match merged.get("y") {
            Some(Value::Number(n)) => assert_eq!(n, Number::from_i64(2)),
            _ => panic!("Expected Number(2)"),
        }
    }

    #[test]
    fn test_with_many() {
        let env = Env::new().with_many(vec![("a".to_string(), num(1)), ("b".to_string(), num(2))]);
        assert!(env.contains("a"));
        assert!(env.contains("b"));
    }
}
