//! Marshal codec: script values on one side, native layouts on the other.
//!
//! - [`ScriptValue`] is what scripts hold (UTF-16 strings, owned arrays).
//! - [`CallFrame`] stages one call's arguments into native form; transient
//!   buffers live exactly as long as the frame.
//! - [`NativeArgs`] is what a native function reads.
//! - [`NativeReturn`] is what it hands back, lifted by [`lift_return`].

mod codec;
mod layout;
mod types;
mod value;

pub use codec::{
    encode_string, lift_return, CallFrame, MarshaledArray, NativeArgs, NativeReturn, NativeValue,
};
pub use layout::{
    decode_vector3, encode_vector3, FieldLayout, StructLayout, VECTOR3_LAYOUT, VECTOR3_WIRE_SIZE,
    WIRE_LAYOUT_VERSION,
};
pub use types::{Signature, TypeTag};
pub use value::{ScriptString, ScriptValue};
