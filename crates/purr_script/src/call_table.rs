//! Internal-call registry.
//!
//! Built once at startup through [`CallTableBuilder`], then sealed into an
//! immutable [`CallTable`]. Only a sealed table can resolve names, so no
//! script can observe a half-built table.

use crate::error::{
    InvalidHandleError, MarshalError, RegistrationError, ResolutionError, ScriptError,
};
use crate::marshal::{
    lift_return, CallFrame, NativeArgs, NativeReturn, ScriptValue, Signature, TypeTag,
};
use purr_core::ecs::{Entity, EntityData, World};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Engine state a native function may touch during one call.
pub struct NativeContext<'w> {
    world: &'w mut World,
    caller: Option<Entity>,
}

impl<'w> NativeContext<'w> {
    pub fn new(world: &'w mut World, caller: Option<Entity>) -> Self {
        Self { world, caller }
    }

    /// Entity bound to the script instance making the call, if any.
    pub fn caller(&self) -> Option<Entity> {
        self.caller
    }

    pub fn world(&self) -> &World {
        &*self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut *self.world
    }

    pub fn entity(&self, handle: Entity) -> Result<&EntityData, InvalidHandleError> {
        Ok(self.world.entity(handle)?)
    }

    pub fn entity_mut(&mut self, handle: Entity) -> Result<&mut EntityData, InvalidHandleError> {
        Ok(self.world.entity_mut(handle)?)
    }
}

/// A natively implemented function that scripts can call by name.
pub trait NativeCallable: Send + Sync {
    fn call(
        &self,
        ctx: &mut NativeContext<'_>,
        args: &NativeArgs<'_>,
    ) -> Result<NativeReturn, ScriptError>;
}

impl<F> NativeCallable for F
where
    F: Fn(&mut NativeContext<'_>, &NativeArgs<'_>) -> Result<NativeReturn, ScriptError>
        + Send
        + Sync,
{
    fn call(
        &self,
        ctx: &mut NativeContext<'_>,
        args: &NativeArgs<'_>,
    ) -> Result<NativeReturn, ScriptError> {
        self(ctx, args)
    }
}

/// Name, signature and implementation of one internal call.
#[derive(Clone)]
pub struct NativeFunctionDescriptor {
    name: String,
    signature: Signature,
    callable: Arc<dyn NativeCallable>,
}

impl NativeFunctionDescriptor {
    pub fn new(
        name: impl Into<String>,
        signature: Signature,
        callable: Arc<dyn NativeCallable>,
    ) -> Self {
        Self {
            name: name.into(),
            signature,
            callable,
        }
    }

    pub fn from_fn<F>(name: impl Into<String>, signature: Signature, f: F) -> Self
    where
        F: Fn(&mut NativeContext<'_>, &NativeArgs<'_>) -> Result<NativeReturn, ScriptError>
            + Send
            + Sync
            + 'static,
    {
        Self::new(name, signature, Arc::new(f))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// True when both descriptors share the same implementation.
    pub fn same_callable(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.callable), Arc::as_ptr(&other.callable))
    }

    /// Names must be identifiers, since script stubs are generated from them.
    fn validate(&self) -> Result<(), RegistrationError> {
        let malformed = |reason: String| RegistrationError::Malformed {
            name: self.name.clone(),
            reason,
        };

        let mut chars = self.name.chars();
        match chars.next() {
            None => return Err(malformed("name is empty".to_string())),
            Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
                return Err(malformed(format!("name cannot start with '{c}'")))
            }
            _ => {}
        }
        if let Some(c) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
            return Err(malformed(format!("name contains '{c}'")));
        }

        if let Some(index) = self.signature.params().iter().position(|t| !t.is_valid_param()) {
            return Err(malformed(format!(
                "parameter {index} has type {}",
                self.signature.params()[index]
            )));
        }
        if !self.signature.ret().is_valid_return() {
            return Err(malformed(format!(
                "return type {} cannot cross the boundary",
                self.signature.ret()
            )));
        }
        Ok(())
    }

    /// Marshal script arguments, run the native function, lift the result.
    pub fn invoke(
        &self,
        ctx: &mut NativeContext<'_>,
        args: &[ScriptValue],
    ) -> Result<ScriptValue, ScriptError> {
        let frame = CallFrame::prepare(&self.name, &self.signature, args)?;
        let ret = self.callable.call(ctx, &frame.args())?;
        drop(frame);
        Ok(lift_return(&self.name, ret, self.signature.ret())?)
    }

    /// Call with arguments that are already in native layout.
    pub fn invoke_native(
        &self,
        ctx: &mut NativeContext<'_>,
        args: &NativeArgs<'_>,
    ) -> Result<NativeReturn, ScriptError> {
        args.check(&self.signature)?;
        let ret = self.callable.call(ctx, args)?;
        if ret.tag() != self.signature.ret() {
            return Err(MarshalError::ReturnMismatch {
                function: self.name.clone(),
                expected: self.signature.ret(),
                actual: ret.tag(),
            }
            .into());
        }
        Ok(ret)
    }
}

impl PartialEq for NativeFunctionDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.signature == other.signature && self.same_callable(other)
    }
}

impl fmt::Debug for NativeFunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunctionDescriptor")
            .field("name", &self.name)
            .field("signature", &format_args!("{}", self.signature))
            .finish_non_exhaustive()
    }
}

/// Mutable registration phase. Single-threaded by construction (`&mut self`).
#[derive(Default)]
pub struct CallTableBuilder {
    entries: Vec<NativeFunctionDescriptor>,
    name_lookup: HashMap<String, usize>,
}

impl CallTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Duplicates are rejected and the first
    /// registration stays in place.
    pub fn register(&mut self, descriptor: NativeFunctionDescriptor) -> Result<(), RegistrationError> {
        descriptor.validate()?;

        if self.name_lookup.contains_key(descriptor.name()) {
            return Err(RegistrationError::Duplicate {
                name: descriptor.name().to_string(),
            });
        }

        tracing::debug!(
            name = descriptor.name(),
            signature = %descriptor.signature(),
            "registered internal call"
        );
        self.name_lookup
            .insert(descriptor.name().to_string(), self.entries.len());
        self.entries.push(descriptor);
        Ok(())
    }

    /// Shorthand for [`NativeFunctionDescriptor::from_fn`] + [`Self::register`].
    pub fn register_fn<F>(
        &mut self,
        name: &str,
        params: &[TypeTag],
        ret: TypeTag,
        f: F,
    ) -> Result<(), RegistrationError>
    where
        F: Fn(&mut NativeContext<'_>, &NativeArgs<'_>) -> Result<NativeReturn, ScriptError>
            + Send
            + Sync
            + 'static,
    {
        self.register(NativeFunctionDescriptor::from_fn(
            name,
            Signature::new(params.to_vec(), ret),
            f,
        ))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name_lookup.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze the table. Resolution is only available after this point.
    pub fn seal(self) -> CallTable {
        tracing::info!(count = self.entries.len(), "sealed call table");
        CallTable {
            entries: self.entries,
            name_lookup: self.name_lookup,
        }
    }
}

/// Sealed, read-only table. `Send + Sync`; share it with `Arc` and resolve
/// from any thread without locking.
pub struct CallTable {
    entries: Vec<NativeFunctionDescriptor>,
    name_lookup: HashMap<String, usize>,
}

impl CallTable {
    pub fn builder() -> CallTableBuilder {
        CallTableBuilder::new()
    }

    pub fn resolve(&self, name: &str) -> Result<&NativeFunctionDescriptor, ResolutionError> {
        self.name_lookup
            .get(name)
            .map(|&index| &self.entries[index])
            .ok_or_else(|| ResolutionError::UnknownFunction {
                name: name.to_string(),
            })
    }

    /// Resolve, marshal and dispatch in one step.
    pub fn invoke(
        &self,
        name: &str,
        ctx: &mut NativeContext<'_>,
        args: &[ScriptValue],
    ) -> Result<ScriptValue, ScriptError> {
        self.resolve(name)?.invoke(ctx, args)
    }

    /// Descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &NativeFunctionDescriptor> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(NativeFunctionDescriptor::name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for CallTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}
