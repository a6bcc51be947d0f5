//! Script-visible internal-call stubs.
//!
//! [`InternalCalls`] is the only way script code reaches native functions.
//! Every stub is a thin forwarder: resolve by name, marshal, dispatch. No
//! engine logic lives here.

use crate::binding::BindingState;
use crate::call_table::{CallTable, NativeContext};
use crate::error::{InvalidHandleError, MarshalError, ScriptError};
use crate::marshal::{ScriptValue, TypeTag};
use crate::natives::names;
use purr_core::ecs::{Entity, World};
use purr_core::math::Vector3;
use serde_json::Value as Json;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

#[derive(Clone)]
struct BindingRef {
    entity: Entity,
    state: Rc<Cell<BindingState>>,
}

/// Call gateway handed to script code.
///
/// A gateway created for a bound instance carries that instance's handle
/// and shares its lifecycle state, so every clone stops working the moment
/// the instance is destroyed.
#[derive(Clone)]
pub struct InternalCalls {
    table: Arc<CallTable>,
    world: Rc<RefCell<World>>,
    binding: Option<BindingRef>,
}

impl InternalCalls {
    /// Gateway for code that is not attached to an entity (module top level).
    pub fn new(table: Arc<CallTable>, world: Rc<RefCell<World>>) -> Self {
        Self {
            table,
            world,
            binding: None,
        }
    }

    pub(crate) fn for_binding(&self, entity: Entity, state: Rc<Cell<BindingState>>) -> Self {
        Self {
            table: Arc::clone(&self.table),
            world: Rc::clone(&self.world),
            binding: Some(BindingRef { entity, state }),
        }
    }

    pub fn table(&self) -> &Arc<CallTable> {
        &self.table
    }

    /// The entity this gateway acts for.
    pub fn handle(&self) -> Result<Entity, InvalidHandleError> {
        self.caller()?.ok_or(InvalidHandleError::Unbound)
    }

    fn caller(&self) -> Result<Option<Entity>, InvalidHandleError> {
        let Some(binding) = &self.binding else {
            return Ok(None);
        };
        match binding.state.get() {
            BindingState::Bound => Ok(Some(binding.entity)),
            BindingState::Destroyed => Err(InvalidHandleError::Destroyed {
                entity: binding.entity,
            }),
            BindingState::Unbound => Err(InvalidHandleError::Unbound),
        }
    }

    /// Invoke an internal call by name.
    pub fn call(&self, name: &str, args: &[ScriptValue]) -> Result<ScriptValue, ScriptError> {
        let caller = self.caller()?;
        let descriptor = self.table.resolve(name)?;
        let mut world = self
            .world
            .try_borrow_mut()
            .map_err(|_| ScriptError::Reentrant)?;
        let mut ctx = NativeContext::new(&mut world, caller);
        tracing::trace!(name, caller = ?caller, "internal call");
        descriptor.invoke(&mut ctx, args)
    }

    /// Invoke with a JSON array of arguments, decoded against the declared
    /// parameter tags.
    pub fn call_json(&self, name: &str, payload: &str) -> Result<ScriptValue, ScriptError> {
        self.caller()?;
        let descriptor = self.table.resolve(name)?;
        let params = descriptor.signature().params();

        let json: Json = serde_json::from_str(payload).map_err(|e| MarshalError::Payload {
            reason: e.to_string(),
        })?;
        let Json::Array(items) = json else {
            return Err(MarshalError::Payload {
                reason: "arguments must be a JSON array".to_string(),
            }
            .into());
        };
        if items.len() != params.len() {
            return Err(MarshalError::ArityMismatch {
                function: name.to_string(),
                expected: params.len(),
                actual: items.len(),
            }
            .into());
        }

        let mut args = Vec::with_capacity(items.len());
        for (index, (item, &tag)) in items.iter().zip(params).enumerate() {
            let value = ScriptValue::from_json(item, tag)?.ok_or_else(|| {
                match ScriptValue::infer_json_tag(item) {
                    Some(actual) => MarshalError::TypeMismatch {
                        function: name.to_string(),
                        index,
                        expected: tag,
                        actual,
                    },
                    None => MarshalError::Payload {
                        reason: format!("argument {index} of '{name}' is not a {tag}: {item}"),
                    },
                }
            })?;
            args.push(value);
        }

        self.call(name, &args)
    }

    /// Invoke and convert the result to a Rust type.
    pub fn call_as<T: FromScriptValue>(
        &self,
        name: &str,
        args: &[ScriptValue],
    ) -> Result<T, ScriptError> {
        let value = self.call(name, args)?;
        T::from_script_value(value).map_err(|actual| {
            MarshalError::ReturnMismatch {
                function: name.to_string(),
                expected: T::TAG,
                actual,
            }
            .into()
        })
    }

    // Typed stubs for the built-ins.

    pub fn sum(&self, values: &[i32]) -> Result<i32, ScriptError> {
        self.call_as(names::MATH_SUM, &[ScriptValue::array(values)])
    }

    pub fn vector3_add(&self, a: Vector3, b: Vector3) -> Result<Vector3, ScriptError> {
        self.call_as(names::VECTOR3_ADD, &[a.into(), b.into()])
    }

    pub fn vector3_dot(&self, a: Vector3, b: Vector3) -> Result<f32, ScriptError> {
        self.call_as(names::VECTOR3_DOT, &[a.into(), b.into()])
    }

    pub fn vector3_length(&self, v: Vector3) -> Result<f32, ScriptError> {
        self.call_as(names::VECTOR3_LENGTH, &[v.into()])
    }

    pub fn log(&self, message: &str) -> Result<(), ScriptError> {
        self.call_as(names::DEBUG_LOG, &[message.into()])
    }

    pub fn is_alive(&self, entity: Entity) -> Result<bool, ScriptError> {
        self.call_as(names::ENTITY_IS_ALIVE, &[entity.into()])
    }

    pub fn name_of(&self, entity: Entity) -> Result<String, ScriptError> {
        self.call_as(names::ENTITY_GET_NAME, &[entity.into()])
    }

    pub fn position_of(&self, entity: Entity) -> Result<Vector3, ScriptError> {
        self.call_as(names::ENTITY_GET_POSITION, &[entity.into()])
    }

    /// Name of the calling instance's own entity.
    pub fn name(&self) -> Result<String, ScriptError> {
        self.name_of(self.handle()?)
    }

    pub fn position(&self) -> Result<Vector3, ScriptError> {
        self.position_of(self.handle()?)
    }

    pub fn set_position(&self, position: Vector3) -> Result<(), ScriptError> {
        self.call_as(
            names::ENTITY_SET_POSITION,
            &[self.handle()?.into(), position.into()],
        )
    }

    pub fn translate(&self, delta: Vector3) -> Result<Vector3, ScriptError> {
        self.call_as(names::ENTITY_TRANSLATE, &[self.handle()?.into(), delta.into()])
    }
}

/// Conversion from a lifted return value. The error carries the tag that
/// actually arrived.
pub trait FromScriptValue: Sized {
    const TAG: TypeTag;

    fn from_script_value(value: ScriptValue) -> Result<Self, TypeTag>;
}

macro_rules! impl_from_script_value {
    ($ty:ty, $tag:ident, $pat:pat => $out:expr) => {
        impl FromScriptValue for $ty {
            const TAG: TypeTag = TypeTag::$tag;

            fn from_script_value(value: ScriptValue) -> Result<Self, TypeTag> {
                match value {
                    $pat => Ok($out),
                    other => Err(other.tag()),
                }
            }
        }
    };
}

impl_from_script_value!((), Void, ScriptValue::Void => ());
impl_from_script_value!(i32, Int32, ScriptValue::Int32(n) => n);
impl_from_script_value!(f32, Float32, ScriptValue::Float32(n) => n);
impl_from_script_value!(bool, Bool, ScriptValue::Bool(b) => b);
impl_from_script_value!(String, String, ScriptValue::String(s) => s.to_string_lossy());
impl_from_script_value!(Vector3, Vector3, ScriptValue::Vector3(v) => v);
impl_from_script_value!(Entity, Handle, ScriptValue::Handle(e) => e);
