// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution context carried by a fiber from step to step.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// The mutable state a fiber threads through its step chain.
///
/// A packet pairs the shared context `C` (for the operator, the domain's
/// presence state) with a property bag that adjacent steps use to hand
/// values to each other. Properties are keyed by static names and stored
/// type-erased; reads must name the type they expect.
pub struct Packet<C> {
    context: C,
    properties: HashMap<&'static str, Box<dyn Any + Send>>,
}

impl<C> Packet<C> {
    /// Create a packet with an empty property bag.
    pub fn new(context: C) -> Self {
        Self {
            context,
            properties: HashMap::new(),
        }
    }

    /// The shared context.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Mutable access to the shared context.
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Consume the packet, returning its context.
    pub fn into_context(self) -> C {
        self.context
    }

    /// Store a property, returning `true` if it replaced an existing value.
    pub fn insert<T: Any + Send>(&mut self, key: &'static str, value: T) -> bool {
        self.properties.insert(key, Box::new(value)).is_some()
    }

    /// Borrow a property if present and of type `T`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.properties.get(key)?.downcast_ref::<T>()
    }

    /// Mutably borrow a property if present and of type `T`.
    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.properties.get_mut(key)?.downcast_mut::<T>()
    }

    /// Remove a property and return it if it was of type `T`.
    ///
    /// A value of a different type is left in place.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.properties.get(key)?.is::<T>() {
            return None;
        }
        let boxed = self.properties.remove(key)?;
        boxed.downcast::<T>().ok().map(|value| *value)
    }

    /// Whether a property with this key exists, regardless of type.
    pub fn contains(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }
}

impl<C: Clone> Packet<C> {
    /// A new packet sharing this packet's context but with an empty bag.
    ///
    /// Used when spawning child fibers.
    pub fn fork(&self) -> Self {
        Self::new(self.context.clone())
    }
}

impl<C: fmt::Debug> fmt::Debug for Packet<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.properties.keys().collect();
        keys.sort();
        f.debug_struct("Packet")
            .field("context", &self.context)
            .field("properties", &keys)
            .finish()
    }
}
