//! Native-side argument frames.
//!
//! A [`CallFrame`] stages every argument of one call in the native
//! representation and owns whatever it had to allocate (C strings), so
//! nothing a native function borrows outlives the call.

use super::layout::{decode_vector3, encode_vector3, VECTOR3_WIRE_SIZE};
use super::{ScriptString, ScriptValue, Signature, TypeTag};
use crate::error::MarshalError;
use purr_core::ecs::Entity;
use purr_core::math::Vector3;
use std::ffi::{CStr, CString};
use std::marker::PhantomData;

/// Borrowed (pointer, length) view over an `i32` buffer.
///
/// The lifetime ties the view to the call that lent it; native code cannot
/// keep it past the return.
#[derive(Debug, Clone, Copy)]
pub struct MarshaledArray<'a> {
    ptr: *const i32,
    len: usize,
    _marker: PhantomData<&'a [i32]>,
}

impl<'a> MarshaledArray<'a> {
    pub fn from_slice(items: &'a [i32]) -> Self {
        Self {
            ptr: items.as_ptr(),
            len: items.len(),
            _marker: PhantomData,
        }
    }

    /// A null reference with length zero.
    pub fn null() -> Self {
        Self {
            ptr: std::ptr::null(),
            len: 0,
            _marker: PhantomData,
        }
    }

    /// Wrap a raw pair received from foreign code.
    ///
    /// # Safety
    /// When `ptr` is non-null it must point to `len` initialized `i32`s that
    /// stay valid and unmodified for `'a`.
    pub unsafe fn from_raw_parts(ptr: *const i32, len: usize) -> Self {
        Self {
            ptr,
            len,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Null with zero length is an empty array; null with any other length
    /// is rejected.
    pub fn as_slice(&self) -> Result<&'a [i32], MarshalError> {
        if self.ptr.is_null() {
            if self.len == 0 {
                return Ok(&[]);
            }
            return Err(MarshalError::NullArray { len: self.len });
        }
        // SAFETY: non-null pointers only come from `from_slice` or from the
        // caller of `from_raw_parts`, both of which guarantee `len` valid
        // elements for `'a`.
        Ok(unsafe { std::slice::from_raw_parts(self.ptr, self.len) })
    }
}

/// A single argument in native layout.
#[derive(Debug, Clone, Copy)]
pub enum NativeValue<'a> {
    Int32(i32),
    Float32(f32),
    Bool(bool),
    Str(&'a CStr),
    Vector3([u8; VECTOR3_WIRE_SIZE]),
    Int32Array(MarshaledArray<'a>),
    Handle(Entity),
}

impl NativeValue<'_> {
    pub fn tag(&self) -> TypeTag {
        match self {
            NativeValue::Int32(_) => TypeTag::Int32,
            NativeValue::Float32(_) => TypeTag::Float32,
            NativeValue::Bool(_) => TypeTag::Bool,
            NativeValue::Str(_) => TypeTag::String,
            NativeValue::Vector3(_) => TypeTag::Vector3,
            NativeValue::Int32Array(_) => TypeTag::Int32Array,
            NativeValue::Handle(_) => TypeTag::Handle,
        }
    }
}

/// Arguments as a native function sees them.
///
/// Accessors fail with a mismatch error instead of reinterpreting, so a
/// native implementation that disagrees with its own descriptor is caught
/// at call time.
#[derive(Debug)]
pub struct NativeArgs<'a> {
    function: &'a str,
    values: Vec<NativeValue<'a>>,
}

impl<'a> NativeArgs<'a> {
    pub fn new(function: &'a str, values: Vec<NativeValue<'a>>) -> Self {
        Self { function, values }
    }

    pub fn function(&self) -> &'a str {
        self.function
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NativeValue<'a>> {
        self.values.get(index)
    }

    pub fn tags(&self) -> impl Iterator<Item = TypeTag> + '_ {
        self.values.iter().map(NativeValue::tag)
    }

    pub fn int32(&self, index: usize) -> Result<i32, MarshalError> {
        match self.value(index)? {
            NativeValue::Int32(n) => Ok(n),
            other => Err(self.mismatch(index, TypeTag::Int32, other.tag())),
        }
    }

    pub fn float32(&self, index: usize) -> Result<f32, MarshalError> {
        match self.value(index)? {
            NativeValue::Float32(n) => Ok(n),
            other => Err(self.mismatch(index, TypeTag::Float32, other.tag())),
        }
    }

    pub fn bool(&self, index: usize) -> Result<bool, MarshalError> {
        match self.value(index)? {
            NativeValue::Bool(b) => Ok(b),
            other => Err(self.mismatch(index, TypeTag::Bool, other.tag())),
        }
    }

    pub fn str(&self, index: usize) -> Result<&'a str, MarshalError> {
        match self.value(index)? {
            NativeValue::Str(s) => s.to_str().map_err(|e| MarshalError::Encoding {
                reason: e.to_string(),
            }),
            other => Err(self.mismatch(index, TypeTag::String, other.tag())),
        }
    }

    pub fn vector3(&self, index: usize) -> Result<Vector3, MarshalError> {
        match self.value(index)? {
            NativeValue::Vector3(bytes) => decode_vector3(&bytes),
            other => Err(self.mismatch(index, TypeTag::Vector3, other.tag())),
        }
    }

    pub fn array(&self, index: usize) -> Result<&'a [i32], MarshalError> {
        match self.value(index)? {
            NativeValue::Int32Array(array) => array.as_slice(),
            other => Err(self.mismatch(index, TypeTag::Int32Array, other.tag())),
        }
    }

    pub fn handle(&self, index: usize) -> Result<Entity, MarshalError> {
        match self.value(index)? {
            NativeValue::Handle(entity) => Ok(entity),
            other => Err(self.mismatch(index, TypeTag::Handle, other.tag())),
        }
    }

    /// Check every argument against a declared signature.
    pub fn check(&self, signature: &Signature) -> Result<(), MarshalError> {
        if self.values.len() != signature.arity() {
            return Err(MarshalError::ArityMismatch {
                function: self.function.to_string(),
                expected: signature.arity(),
                actual: self.values.len(),
            });
        }
        for (index, (value, &expected)) in self.values.iter().zip(signature.params()).enumerate() {
            if value.tag() != expected {
                return Err(self.mismatch(index, expected, value.tag()));
            }
        }
        Ok(())
    }

    fn value(&self, index: usize) -> Result<NativeValue<'a>, MarshalError> {
        self.values
            .get(index)
            .copied()
            .ok_or_else(|| MarshalError::ArityMismatch {
                function: self.function.to_string(),
                expected: index + 1,
                actual: self.values.len(),
            })
    }

    fn mismatch(&self, index: usize, expected: TypeTag, actual: TypeTag) -> MarshalError {
        MarshalError::TypeMismatch {
            function: self.function.to_string(),
            index,
            expected,
            actual,
        }
    }
}

/// Value handed back by a native function.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeReturn {
    Void,
    Int32(i32),
    Float32(f32),
    Bool(bool),
    String(CString),
    Vector3([u8; VECTOR3_WIRE_SIZE]),
    Handle(Entity),
}

impl NativeReturn {
    pub fn vector3(v: Vector3) -> Self {
        NativeReturn::Vector3(encode_vector3(v))
    }

    pub fn string(s: &str) -> Result<Self, MarshalError> {
        CString::new(s)
            .map(NativeReturn::String)
            .map_err(|e| MarshalError::InteriorNul {
                position: e.nul_position(),
            })
    }

    pub fn tag(&self) -> TypeTag {
        match self {
            NativeReturn::Void => TypeTag::Void,
            NativeReturn::Int32(_) => TypeTag::Int32,
            NativeReturn::Float32(_) => TypeTag::Float32,
            NativeReturn::Bool(_) => TypeTag::Bool,
            NativeReturn::String(_) => TypeTag::String,
            NativeReturn::Vector3(_) => TypeTag::Vector3,
            NativeReturn::Handle(_) => TypeTag::Handle,
        }
    }
}

impl From<()> for NativeReturn {
    fn from(_: ()) -> Self {
        NativeReturn::Void
    }
}

impl From<i32> for NativeReturn {
    fn from(n: i32) -> Self {
        NativeReturn::Int32(n)
    }
}

impl From<f32> for NativeReturn {
    fn from(n: f32) -> Self {
        NativeReturn::Float32(n)
    }
}

impl From<bool> for NativeReturn {
    fn from(b: bool) -> Self {
        NativeReturn::Bool(b)
    }
}

impl From<Vector3> for NativeReturn {
    fn from(v: Vector3) -> Self {
        NativeReturn::vector3(v)
    }
}

impl From<Entity> for NativeReturn {
    fn from(e: Entity) -> Self {
        NativeReturn::Handle(e)
    }
}

/// Encode a managed string into a NUL-terminated UTF-8 buffer.
pub fn encode_string(s: &ScriptString) -> Result<CString, MarshalError> {
    let utf8 = String::from_utf16(s.as_utf16()).map_err(|e| MarshalError::Encoding {
        reason: e.to_string(),
    })?;
    CString::new(utf8).map_err(|e| MarshalError::InteriorNul {
        position: e.nul_position(),
    })
}

enum Staged<'a> {
    Int32(i32),
    Float32(f32),
    Bool(bool),
    Str(CString),
    Vector3([u8; VECTOR3_WIRE_SIZE]),
    Int32Array(Option<&'a [i32]>),
    Handle(Entity),
}

/// Arguments of one call, staged in native layout.
///
/// Owns the transient string buffers; dropping the frame at the end of the
/// call releases them.
pub struct CallFrame<'a> {
    function: &'a str,
    staged: Vec<Staged<'a>>,
}

impl<'a> CallFrame<'a> {
    /// Check `args` against `signature` and convert them.
    pub fn prepare(
        function: &'a str,
        signature: &Signature,
        args: &'a [ScriptValue],
    ) -> Result<Self, MarshalError> {
        if args.len() != signature.arity() {
            return Err(MarshalError::ArityMismatch {
                function: function.to_string(),
                expected: signature.arity(),
                actual: args.len(),
            });
        }

        let mut staged = Vec::with_capacity(args.len());
        for (index, (arg, &expected)) in args.iter().zip(signature.params()).enumerate() {
            if arg.tag() != expected {
                return Err(MarshalError::TypeMismatch {
                    function: function.to_string(),
                    index,
                    expected,
                    actual: arg.tag(),
                });
            }
            staged.push(match arg {
                ScriptValue::Int32(n) => Staged::Int32(*n),
                ScriptValue::Float32(n) => Staged::Float32(*n),
                ScriptValue::Bool(b) => Staged::Bool(*b),
                ScriptValue::String(s) => Staged::Str(encode_string(s)?),
                ScriptValue::Vector3(v) => Staged::Vector3(encode_vector3(*v)),
                ScriptValue::Int32Array(items) => Staged::Int32Array(items.as_deref()),
                ScriptValue::Handle(e) => Staged::Handle(*e),
                ScriptValue::Void => {
                    return Err(MarshalError::TypeMismatch {
                        function: function.to_string(),
                        index,
                        expected,
                        actual: TypeTag::Void,
                    })
                }
            });
        }

        Ok(Self { function, staged })
    }

    /// Native view of the staged arguments, valid while the frame lives.
    pub fn args(&self) -> NativeArgs<'_> {
        let values = self
            .staged
            .iter()
            .map(|staged| match staged {
                Staged::Int32(n) => NativeValue::Int32(*n),
                Staged::Float32(n) => NativeValue::Float32(*n),
                Staged::Bool(b) => NativeValue::Bool(*b),
                Staged::Str(s) => NativeValue::Str(s.as_c_str()),
                Staged::Vector3(bytes) => NativeValue::Vector3(*bytes),
                Staged::Int32Array(Some(items)) => {
                    NativeValue::Int32Array(MarshaledArray::from_slice(items))
                }
                Staged::Int32Array(None) => NativeValue::Int32Array(MarshaledArray::null()),
                Staged::Handle(e) => NativeValue::Handle(*e),
            })
            .collect();
        NativeArgs::new(self.function, values)
    }
}

/// Convert a native return value back to its script representation.
pub fn lift_return(
    function: &str,
    ret: NativeReturn,
    expected: TypeTag,
) -> Result<ScriptValue, MarshalError> {
    if ret.tag() != expected {
        return Err(MarshalError::ReturnMismatch {
            function: function.to_string(),
            expected,
            actual: ret.tag(),
        });
    }

    Ok(match ret {
        NativeReturn::Void => ScriptValue::Void,
        NativeReturn::Int32(n) => ScriptValue::Int32(n),
        NativeReturn::Float32(n) => ScriptValue::Float32(n),
        NativeReturn::Bool(b) => ScriptValue::Bool(b),
        NativeReturn::String(s) => {
            let utf8 = s.into_string().map_err(|e| MarshalError::Encoding {
                reason: e.utf8_error().to_string(),
            })?;
            ScriptValue::String(ScriptString::from(utf8))
        }
        NativeReturn::Vector3(bytes) => ScriptValue::Vector3(decode_vector3(&bytes)?),
        NativeReturn::Handle(e) => ScriptValue::Handle(e),
    })
}
