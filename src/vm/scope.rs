use std::collections::HashMap;

use super::value::StackValue;
use super::VmError;

type Scope = HashMap<String, StackValue>;

/// The variable store: a stack of scopes, innermost last.
///
/// The base scope is created with the store and is never popped.
pub struct Scopes {
    scopes: Vec<Scope>,
}

impl Default for Scopes {
    fn default() -> Self {
        Self::new()
    }
}

impl Scopes {
    pub fn new() -> Self {
        Scopes { scopes: vec![Scope::new()] }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn push(&mut self) {
        self.scopes.push(Scope::new());
    }

    /// Pop the innermost scope. Fails on the base scope.
    pub fn pop(&mut self) -> Result<(), VmError> {
        if self.scopes.len() <= 1 {
            return Err(VmError::ScopeUnderflow);
        }
        self.scopes.pop();
        Ok(())
    }

    /// Drop scopes until `depth` remain, never below the base scope.
    pub fn truncate(&mut self, depth: usize) {
        self.scopes.truncate(depth.max(1));
    }

    /// Innermost-to-outermost lookup.
    pub fn get(&self, name: &str) -> Result<&StackValue, VmError> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .ok_or_else(|| VmError::UndefinedVariable { name: name.to_string() })
    }

    /// Bind in the innermost scope only, shadowing any outer binding.
    pub fn set(&mut self, name: &str, value: StackValue) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    /// Overwrite the nearest existing binding; bind innermost when there is none.
    pub fn assign(&mut self, name: &str, value: StackValue) {
        match self.scopes.iter_mut().rev().find(|scope| scope.contains_key(name)) {
            Some(scope) => {
                scope.insert(name.to_string(), value);
            }
            None => self.set(name, value),
        }
    }

    /// Every value bound in every live scope.
    pub fn values(&self) -> impl Iterator<Item = &StackValue> {
        self.scopes.iter().flat_map(|scope| scope.values())
    }
}
