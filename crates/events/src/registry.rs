//! Event type registry: explicit, bidirectional `name <-> type` mapping.
//!
//! Populated while configuring a store. Names are what gets persisted; types
//! are what application code works with. Both directions must be unique.

use std::any::TypeId;
use std::collections::HashMap;

use thiserror::Error;

use crate::codec::CodecError;
use crate::event::Event;

/// Registration failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("event name '{0}' is already registered")]
    DuplicateName(String),

    #[error("event type {type_name} is already registered as '{name}'")]
    DuplicateType { type_name: &'static str, name: String },

    #[error("event name must not be empty")]
    EmptyName,
}

/// Describes a registered event type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EventDescriptor {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl EventDescriptor {
    pub fn of<E: Event>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventRegistry {
    by_name: HashMap<String, EventDescriptor>,
    by_type: HashMap<TypeId, String>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `E` under `name`.
    pub fn register<E: Event>(&mut self, name: impl Into<String>) -> Result<(), RegistryError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let descriptor = EventDescriptor::of::<E>();
        if let Some(existing) = self.by_type.get(&descriptor.type_id) {
            return Err(RegistryError::DuplicateType {
                type_name: descriptor.type_name,
                name: existing.clone(),
            });
        }
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }

        self.by_type.insert(descriptor.type_id, name.clone());
        self.by_name.insert(name, descriptor);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<E: Event>(mut self, name: impl Into<String>) -> Result<Self, RegistryError> {
        self.register::<E>(name)?;
        Ok(self)
    }

    pub fn name_for_type(&self, type_id: TypeId) -> Option<&str> {
        self.by_type.get(&type_id).map(String::as_str)
    }

    pub fn descriptor(&self, name: &str) -> Option<&EventDescriptor> {
        self.by_name.get(name)
    }

    /// Registered name of `E`.
    pub fn name_of<E: Event>(&self) -> Result<&str, CodecError> {
        self.name_for_type(TypeId::of::<E>())
            .ok_or_else(|| CodecError::UnregisteredType(std::any::type_name::<E>()))
    }

    /// Ensure records named `name` decode into `E`.
    pub fn ensure_type<E: Event>(&self, name: &str) -> Result<(), CodecError> {
        let descriptor = self
            .descriptor(name)
            .ok_or_else(|| CodecError::UnknownEventName(name.to_string()))?;
        if descriptor.type_id != TypeId::of::<E>() {
            return Err(CodecError::TypeMismatch {
                name: name.to_string(),
                registered: descriptor.type_name,
                requested: std::any::type_name::<E>(),
            });
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Opened;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Closed;

    #[test]
    fn mapping_is_bidirectional() {
        let registry = EventRegistry::new()
            .with::<Opened>("account.opened")
            .unwrap()
            .with::<Closed>("account.closed")
            .unwrap();

        assert_eq!(registry.name_of::<Opened>().unwrap(), "account.opened");
        assert_eq!(
            registry.descriptor("account.closed").unwrap().type_id,
            TypeId::of::<Closed>()
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_name_or_type_is_rejected() {
        let mut registry = EventRegistry::new();
        registry.register::<Opened>("account.opened").unwrap();

        assert_eq!(
            registry.register::<Closed>("account.opened"),
            Err(RegistryError::DuplicateName("account.opened".into()))
        );
        assert!(matches!(
            registry.register::<Opened>("other"),
            Err(RegistryError::DuplicateType { .. })
        ));
    }

    #[test]
    fn ensure_type_detects_mismatch() {
        let registry = EventRegistry::new().with::<Opened>("account.opened").unwrap();

        assert!(registry.ensure_type::<Opened>("account.opened").is_ok());
        assert!(matches!(
            registry.ensure_type::<Closed>("account.opened"),
            Err(CodecError::TypeMismatch { .. })
        ));
        assert!(matches!(
            registry.ensure_type::<Opened>("nope"),
            Err(CodecError::UnknownEventName(_))
        ));
        assert!(matches!(registry.name_of::<Closed>(), Err(CodecError::UnregisteredType(_))));
    }
}
