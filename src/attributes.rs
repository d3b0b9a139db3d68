//! Per-call execution attributes.
//!
//! An [`ExecutionAttributes`] bag lives for exactly one logical call. The pipeline seeds
//! it with the keys below before any handler runs; generated clients may add their own
//! keys. Keys carry the type of their value, so reads never need an unchecked cast.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// The logical name of the service being called.
pub const SERVICE_NAME: AttributeKey<String> = AttributeKey::new("ServiceName");

/// The name of the operation being executed.
pub const OPERATION_NAME: AttributeKey<String> = AttributeKey::new("OperationName");

/// Retries attempted so far in the current call.
pub const RETRIES_ATTEMPTED: AttributeKey<u32> = AttributeKey::new("RetriesAttempted");

/// A typed key into [`ExecutionAttributes`].
///
/// # Examples
///
/// ```
/// use callcore::attributes::{AttributeKey, ExecutionAttributes};
///
/// const REGION: AttributeKey<String> = AttributeKey::new("Region");
///
/// let mut attributes = ExecutionAttributes::new();
/// attributes.put_attribute(&REGION, "eu-west-1".to_string());
/// assert_eq!(attributes.attribute(&REGION).map(String::as_str), Some("eu-west-1"));
/// ```
pub struct AttributeKey<T> {
    name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _value: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttributeKey<T> {}

impl<T> fmt::Debug for AttributeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AttributeKey").field(&self.name).finish()
    }
}

/// A typed key→value bag scoped to one logical call.
#[derive(Default)]
pub struct ExecutionAttributes {
    values: HashMap<(&'static str, TypeId), Box<dyn Any + Send + Sync>>,
}

impl ExecutionAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put_attribute<T>(&mut self, key: &AttributeKey<T>, value: T) -> &mut Self
    where
        T: Any + Send + Sync,
    {
        self.values
            .insert((key.name, TypeId::of::<T>()), Box::new(value));
        self
    }

    /// Returns the value stored under `key`.
    pub fn attribute<T: Any>(&self, key: &AttributeKey<T>) -> Option<&T> {
        self.values
            .get(&(key.name, TypeId::of::<T>()))?
            .downcast_ref::<T>()
    }

    /// Removes and returns the value stored under `key`.
    pub fn remove_attribute<T: Any>(&mut self, key: &AttributeKey<T>) -> Option<T> {
        let value = self.values.remove(&(key.name, TypeId::of::<T>()))?;
        value.downcast::<T>().ok().map(|boxed| *boxed)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for ExecutionAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.values.keys().map(|(name, _)| *name).collect();
        names.sort_unstable();
        f.debug_struct("ExecutionAttributes")
            .field("keys", &names)
            .finish()
    }
}
