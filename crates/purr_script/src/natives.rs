//! Built-in internal calls backed by the native engine.
//!
//! Names and signatures here are the binary contract scripts compile
//! against; change them only together with the script side.

use crate::call_table::{CallTableBuilder, NativeContext};
use crate::error::{RegistrationError, ScriptError};
use crate::marshal::{NativeArgs, NativeReturn, TypeTag};

pub mod names {
    pub const MATH_SUM: &str = "Math_Sum";
    pub const VECTOR3_ADD: &str = "Vector3_Add";
    pub const VECTOR3_DOT: &str = "Vector3_Dot";
    pub const VECTOR3_LENGTH: &str = "Vector3_Length";
    pub const DEBUG_LOG: &str = "Debug_Log";
    pub const ENTITY_IS_ALIVE: &str = "Entity_IsAlive";
    pub const ENTITY_GET_NAME: &str = "Entity_GetName";
    pub const ENTITY_GET_POSITION: &str = "Entity_GetPosition";
    pub const ENTITY_SET_POSITION: &str = "Entity_SetPosition";
    pub const ENTITY_TRANSLATE: &str = "Entity_Translate";
}

use TypeTag::{Bool, Float32, Handle, Int32, Int32Array, String as Str, Vector3, Void};

/// Register every built-in on `builder`.
pub fn register_builtins(builder: &mut CallTableBuilder) -> Result<(), RegistrationError> {
    builder.register_fn(names::MATH_SUM, &[Int32Array], Int32, math_sum)?;
    builder.register_fn(names::VECTOR3_ADD, &[Vector3, Vector3], Vector3, vector3_add)?;
    builder.register_fn(names::VECTOR3_DOT, &[Vector3, Vector3], Float32, vector3_dot)?;
    builder.register_fn(names::VECTOR3_LENGTH, &[Vector3], Float32, vector3_length)?;
    builder.register_fn(names::DEBUG_LOG, &[Str], Void, debug_log)?;
    builder.register_fn(names::ENTITY_IS_ALIVE, &[Handle], Bool, entity_is_alive)?;
    builder.register_fn(names::ENTITY_GET_NAME, &[Handle], Str, entity_get_name)?;
    builder.register_fn(names::ENTITY_GET_POSITION, &[Handle], Vector3, entity_get_position)?;
    builder.register_fn(names::ENTITY_SET_POSITION, &[Handle, Vector3], Void, entity_set_position)?;
    builder.register_fn(names::ENTITY_TRANSLATE, &[Handle, Vector3], Vector3, entity_translate)?;
    Ok(())
}

type NativeResult = Result<NativeReturn, ScriptError>;

/// Wrapping sum, so hostile input cannot panic the engine.
fn math_sum(_ctx: &mut NativeContext<'_>, args: &NativeArgs<'_>) -> NativeResult {
    let total = args.array(0)?.iter().fold(0i32, |acc, n| acc.wrapping_add(*n));
    Ok(total.into())
}

fn vector3_add(_ctx: &mut NativeContext<'_>, args: &NativeArgs<'_>) -> NativeResult {
    Ok(args.vector3(0)?.add(args.vector3(1)?).into())
}

fn vector3_dot(_ctx: &mut NativeContext<'_>, args: &NativeArgs<'_>) -> NativeResult {
    Ok(args.vector3(0)?.dot(args.vector3(1)?).into())
}

fn vector3_length(_ctx: &mut NativeContext<'_>, args: &NativeArgs<'_>) -> NativeResult {
    Ok(args.vector3(0)?.length().into())
}

fn debug_log(ctx: &mut NativeContext<'_>, args: &NativeArgs<'_>) -> NativeResult {
    let message = args.str(0)?;
    match ctx.caller() {
        Some(entity) => tracing::info!(target: "script", %entity, "{message}"),
        None => tracing::info!(target: "script", "{message}"),
    }
    Ok(NativeReturn::Void)
}

fn entity_is_alive(ctx: &mut NativeContext<'_>, args: &NativeArgs<'_>) -> NativeResult {
    let handle = args.handle(0)?;
    Ok(ctx.world().is_alive(handle).into())
}

fn entity_get_name(ctx: &mut NativeContext<'_>, args: &NativeArgs<'_>) -> NativeResult {
    let entity = ctx.entity(args.handle(0)?)?;
    Ok(NativeReturn::string(&entity.name)?)
}

fn entity_get_position(ctx: &mut NativeContext<'_>, args: &NativeArgs<'_>) -> NativeResult {
    Ok(ctx.entity(args.handle(0)?)?.position.into())
}

fn entity_set_position(ctx: &mut NativeContext<'_>, args: &NativeArgs<'_>) -> NativeResult {
    let position = args.vector3(1)?;
    if !position.is_finite() {
        return Err(ScriptError::native(
            args.function(),
            format!("position {position:?} is not finite"),
        ));
    }
    ctx.entity_mut(args.handle(0)?)?.position = position;
    Ok(NativeReturn::Void)
}

fn entity_translate(ctx: &mut NativeContext<'_>, args: &NativeArgs<'_>) -> NativeResult {
    let delta = args.vector3(1)?;
    let entity = ctx.entity_mut(args.handle(0)?)?;
    entity.position = entity.position + delta;
    Ok(entity.position.into())
}
