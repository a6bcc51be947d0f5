//! Type tags and call signatures.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of a value crossing the script boundary.
///
/// Tag names are part of the binary contract between script and native
/// builds. Renaming one is a breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    Void,
    Int32,
    Float32,
    Bool,
    String,
    Vector3,
    #[serde(rename = "int32[]")]
    Int32Array,
    Handle,
}

impl TypeTag {
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Void => "void",
            TypeTag::Int32 => "int32",
            TypeTag::Float32 => "float32",
            TypeTag::Bool => "bool",
            TypeTag::String => "string",
            TypeTag::Vector3 => "vector3",
            TypeTag::Int32Array => "int32[]",
            TypeTag::Handle => "handle",
        }
    }

    /// `void` never appears in a parameter list.
    pub fn is_valid_param(self) -> bool {
        self != TypeTag::Void
    }

    /// Arrays are only lent to native code for the duration of a call, so
    /// nothing can hand one back.
    pub fn is_valid_return(self) -> bool {
        self != TypeTag::Int32Array
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered parameter tags plus the return tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    params: Vec<TypeTag>,
    ret: TypeTag,
}

impl Signature {
    pub fn new(params: impl Into<Vec<TypeTag>>, ret: TypeTag) -> Self {
        Self {
            params: params.into(),
            ret,
        }
    }

    #[inline]
    pub fn params(&self) -> &[TypeTag] {
        &self.params
    }

    #[inline]
    pub fn ret(&self) -> TypeTag {
        self.ret
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_display() {
        let sig = Signature::new([TypeTag::Int32Array, TypeTag::Vector3], TypeTag::Float32);
        assert_eq!(sig.to_string(), "(int32[], vector3) -> float32");
        assert_eq!(Signature::new(Vec::new(), TypeTag::Void).to_string(), "() -> void");
    }

    #[test]
    fn tag_serde_names_match_display() {
        for tag in [
            TypeTag::Void,
            TypeTag::Int32,
            TypeTag::Float32,
            TypeTag::Bool,
            TypeTag::String,
            TypeTag::Vector3,
            TypeTag::Int32Array,
            TypeTag::Handle,
        ] {
            let json = serde_json::to_value(tag).unwrap();
            assert_eq!(json, serde_json::Value::String(tag.name().to_string()));
        }
    }

    #[test]
    fn void_and_array_placement() {
        assert!(!TypeTag::Void.is_valid_param());
        assert!(TypeTag::Void.is_valid_return());
        assert!(TypeTag::Int32Array.is_valid_param());
        assert!(!TypeTag::Int32Array.is_valid_return());
    }
}
