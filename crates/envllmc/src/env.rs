//! Single-assignment variable environment.
//!
//! Loop iterators are the one sanctioned exception: they live in an overlay
//! that shadows the outer bindings and is rebound on every iteration, leaving
//! the single-assignment map untouched.

use std::collections::BTreeMap;

use crate::value::Value;

#[derive(Debug, Default)]
pub struct Env {
    vars: BTreeMap<String, Value>,
    iterators: BTreeMap<String, Value>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` exactly once; a second bind is an error.
    pub fn define(&mut self, name: &str, value: Value) -> Result<(), String> {
        if self.vars.contains_key(name) {
            return Err(format!(
                "variable {name:?} already defined (single-assignment enforced)"
            ));
        }
        self.vars.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.iterators.get(name).or_else(|| self.vars.get(name))
    }

    /// Rebinds a loop iterator, shadowing any outer binding of the same name.
    pub fn bind_iterator(&mut self, name: &str, value: Value) {
        self.iterators.insert(name.to_string(), value);
    }

    pub fn unbind_iterator(&mut self, name: &str) {
        self.iterators.remove(name);
    }

    pub fn vars(&self) -> &BTreeMap<String, Value> {
        &self.vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_rejects_rebinding() {
        let mut env = Env::new();
        env.define("x", Value::Int(1)).unwrap();
        assert!(env.define("x", Value::Int(2)).is_err());
        assert_eq!(env.get("x"), Some(&Value::Int(1)));
    }

    #[test]
    fn iterator_overlay_shadows_and_unbinds() {
        let mut env = Env::new();
        env.define("row", Value::Int(1)).unwrap();
        env.bind_iterator("row", Value::Int(2));
        assert_eq!(env.get("row"), Some(&Value::Int(2)));
        env.bind_iterator("row", Value::Int(3));
        assert_eq!(env.get("row"), Some(&Value::Int(3)));
        env.unbind_iterator("row");
        assert_eq!(env.get("row"), Some(&Value::Int(1)));
    }
}
