//! Script classes and the modules that provide them.

use crate::calls::InternalCalls;
use crate::error::{ResolutionError, ScriptError};
use crate::marshal::WIRE_LAYOUT_VERSION;
use std::collections::HashMap;

/// Lifecycle hooks a script class implements.
///
/// Hooks run on the frame-loop thread and must not block.
pub trait ScriptBehaviour {
    fn on_create(&mut self, calls: &InternalCalls) -> Result<(), ScriptError>;

    fn on_update(&mut self, calls: &InternalCalls, delta_time: f32) -> Result<(), ScriptError>;

    fn on_destroy(&mut self, _calls: &InternalCalls) -> Result<(), ScriptError> {
        Ok(())
    }
}

/// A loadable unit of script classes (an assembly, a JS source file, ...).
pub trait ScriptModule {
    fn name(&self) -> &str;

    /// Wire layout of the structs this module passes by value. The host
    /// refuses modules built against a different layout.
    fn wire_layout_version(&self) -> u32 {
        WIRE_LAYOUT_VERSION
    }

    /// Expose the sealed call table and run any top-level code.
    ///
    /// Called exactly once by the host, before any class is instantiated.
    fn link(&mut self, calls: &InternalCalls) -> Result<(), ScriptError>;

    fn has_class(&self, class: &str) -> bool;

    fn instantiate(&mut self, class: &str) -> Result<Box<dyn ScriptBehaviour>, ScriptError>;
}

pub type BehaviourFactory = Box<dyn Fn() -> Box<dyn ScriptBehaviour>>;

/// Module whose classes are Rust types registered by name.
pub struct NativeModule {
    name: String,
    classes: HashMap<String, BehaviourFactory>,
}

impl NativeModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classes: HashMap::new(),
        }
    }

    /// Register `T::default()` as the constructor for `class`.
    pub fn with_class<T>(mut self, class: &str) -> Self
    where
        T: ScriptBehaviour + Default + 'static,
    {
        self.register_class(class, || Box::new(T::default()));
        self
    }

    /// Later registrations under the same name replace earlier ones.
    pub fn register_class<F>(&mut self, class: &str, factory: F)
    where
        F: Fn() -> Box<dyn ScriptBehaviour> + 'static,
    {
        self.classes.insert(class.to_string(), Box::new(factory));
    }
}

impl ScriptModule for NativeModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn link(&mut self, _calls: &InternalCalls) -> Result<(), ScriptError> {
        tracing::debug!(module = %self.name, classes = self.classes.len(), "linked native module");
        Ok(())
    }

    fn has_class(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    fn instantiate(&mut self, class: &str) -> Result<Box<dyn ScriptBehaviour>, ScriptError> {
        let factory = self
            .classes
            .get(class)
            .ok_or_else(|| ResolutionError::UnknownClass {
                class: class.to_string(),
            })?;
        Ok(factory())
    }
}
