//! Typed, run-scoped key/value store
//!
//! Steps hand artifacts to later steps through a [`Context`]. Keys are
//! `const` [`Key<T>`] tokens that fix the value type, so a lookup can only
//! fail when no earlier step set the key. That is a wiring defect, reported
//! as [`Error::MissingContextKey`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use pgaas_common::{Error, Result};

/// Key of a value of type `T`
pub struct Key<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    /// Declare a key; names must be unique within a pipeline
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _type: PhantomData,
        }
    }

    /// Name used in errors and logs
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.name)
    }
}

/// Values produced during one reconcile
#[derive(Default)]
pub struct Context {
    values: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl Context {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing any previous value
    pub fn set<T: Any + Send + Sync>(&mut self, key: Key<T>, value: T) {
        self.values.insert(key.name, Box::new(value));
    }

    /// Value of `key`; an unset key is a precondition violation
    pub fn get<T: Any + Send + Sync>(&self, key: Key<T>) -> Result<&T> {
        self.try_get(key)
            .ok_or_else(|| Error::missing_context_key(key.name))
    }

    /// Mutable value of `key`; an unset key is a precondition violation
    pub fn get_mut<T: Any + Send + Sync>(&mut self, key: Key<T>) -> Result<&mut T> {
        self.values
            .get_mut(key.name)
            .and_then(|v| v.downcast_mut::<T>())
            .ok_or_else(|| Error::missing_context_key(key.name))
    }

    /// Value of `key`, for callers where absence is meaningful
    pub fn try_get<T: Any + Send + Sync>(&self, key: Key<T>) -> Option<&T> {
        self.values
            .get(key.name)
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Remove and return the value of `key`
    pub fn take<T: Any + Send + Sync>(&mut self, key: Key<T>) -> Option<T> {
        let value = self.values.remove(key.name)?;
        value.downcast::<T>().ok().map(|b| *b)
    }

    /// True if `key` holds a value
    pub fn contains<T: Any + Send + Sync>(&self, key: Key<T>) -> bool {
        self.try_get(key).is_some()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("Context").field("keys", &keys).finish()
    }
}
