use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Result, SchemeError};
use crate::value::Value;

struct Frame {
    vars: RefCell<HashMap<Rc<str>, Value>>,
    parent: Option<Env>,
}

/// A chain of variable frames. Cloning shares the frame.
#[derive(Clone)]
pub struct Env(Rc<Frame>);

impl Env {
    pub fn new() -> Self {
        Env(Rc::new(Frame {
            vars: RefCell::new(HashMap::new()),
            parent: None,
        }))
    }

    /// A new empty frame whose parent is `self`
    pub fn extend(&self) -> Self {
        Env(Rc::new(Frame {
            vars: RefCell::new(HashMap::new()),
            parent: Some(self.clone()),
        }))
    }

    /// Bind `name` in this frame, replacing any existing binding
    pub fn define(&self, name: Rc<str>, value: Value) {
        self.0.vars.borrow_mut().insert(name, value);
    }

    /// Update the nearest existing binding of `name`
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        let mut frame = Some(self);
        while let Some(env) = frame {
            if let Some(slot) = env.0.vars.borrow_mut().get_mut(name) {
                *slot = value;
                return Ok(());
            }
            frame = env.0.parent.as_ref();
        }
        Err(SchemeError::Unbound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let mut frame = Some(self);
        while let Some(env) = frame {
            if let Some(value) = env.0.vars.borrow().get(name) {
                return Some(value.clone());
            }
            frame = env.0.parent.as_ref();
        }
        None
    }

    pub fn lookup(&self, name: &str) -> Result<Value> {
        self.get(name)
            .ok_or_else(|| SchemeError::Unbound(name.to_string()))
    }

    /// Drop every binding in this frame. Closures stored in the frame refer
    /// back to it, so this is what lets a global environment be freed.
    pub fn clear(&self) {
        let vars = std::mem::take(&mut *self.0.vars.borrow_mut());
        drop(vars);
    }

    pub fn len(&self) -> usize {
        self.0.vars.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadowing_and_set() {
        let global = Env::new();
        global.define(Rc::from("x"), Value::Int(1));
        let local = global.extend();
        local.define(Rc::from("x"), Value::Int(2));

        assert!(matches!(local.lookup("x").unwrap(), Value::Int(2)));
        assert!(matches!(global.lookup("x").unwrap(), Value::Int(1)));

        global.define(Rc::from("y"), Value::Int(3));
        local.set("y", Value::Int(4)).unwrap();
        assert!(matches!(global.lookup("y").unwrap(), Value::Int(4)));
        assert!(matches!(local.set("z", Value::Nil), Err(SchemeError::Unbound(_))));
    }

    #[test]
    fn test_clear() {
        let global = Env::new();
        global.define(Rc::from("x"), Value::Int(1));
        global.clear();
        assert!(global.is_empty());
        assert!(global.get("x").is_none());
    }
}
