//! Script-side values and their JSON carriage.
//!
//! JSON never carries NaN or infinities, and script numbers are doubles,
//! so every float that crosses is range-checked against `f32` instead of
//! being narrowed silently.

use super::TypeTag;
use crate::error::MarshalError;
use purr_core::ecs::Entity;
use purr_core::math::Vector3;
use serde_json::{json, Value as Json};
use std::fmt;

/// A managed string: UTF-16 code units, possibly ill-formed.
///
/// Scripts can build strings containing unpaired surrogates; those fail to
/// marshal instead of being silently replaced.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct ScriptString(Vec<u16>);

impl ScriptString {
    pub fn from_utf16(units: Vec<u16>) -> Self {
        Self(units)
    }

    pub fn as_utf16(&self) -> &[u16] {
        &self.0
    }

    pub fn len_utf16(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.0)
    }
}

impl From<&str> for ScriptString {
    fn from(s: &str) -> Self {
        Self(s.encode_utf16().collect())
    }
}

impl From<String> for ScriptString {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl fmt::Display for ScriptString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

/// Script-side representation of every value that can cross the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Void,
    Int32(i32),
    Float32(f32),
    Bool(bool),
    String(ScriptString),
    Vector3(Vector3),
    /// `None` is a null array reference.
    Int32Array(Option<Vec<i32>>),
    Handle(Entity),
}

impl ScriptValue {
    pub fn tag(&self) -> TypeTag {
        match self {
            ScriptValue::Void => TypeTag::Void,
            ScriptValue::Int32(_) => TypeTag::Int32,
            ScriptValue::Float32(_) => TypeTag::Float32,
            ScriptValue::Bool(_) => TypeTag::Bool,
            ScriptValue::String(_) => TypeTag::String,
            ScriptValue::Vector3(_) => TypeTag::Vector3,
            ScriptValue::Int32Array(_) => TypeTag::Int32Array,
            ScriptValue::Handle(_) => TypeTag::Handle,
        }
    }

    pub fn string(s: &str) -> Self {
        ScriptValue::String(ScriptString::from(s))
    }

    pub fn array(values: impl Into<Vec<i32>>) -> Self {
        ScriptValue::Int32Array(Some(values.into()))
    }

    /// Decode a JSON argument as the declared tag.
    ///
    /// JavaScript has a single number type, so integral JSON numbers are
    /// accepted for `float32` and `int32` only accepts integers in range.
    /// Strings arrive either as JSON strings or, when the script string is
    /// not well-formed, as `{"utf16": [units]}`.
    ///
    /// Returns `Ok(None)` when the JSON does not have the declared shape and
    /// an error when it does but the value cannot be represented.
    pub fn from_json(json: &Json, tag: TypeTag) -> Result<Option<Self>, MarshalError> {
        let value = match tag {
            TypeTag::Void => json.is_null().then_some(ScriptValue::Void),
            TypeTag::Int32 => json_i32(json).map(ScriptValue::Int32),
            TypeTag::Float32 => json_f32(json)?.map(ScriptValue::Float32),
            TypeTag::Bool => json.as_bool().map(ScriptValue::Bool),
            TypeTag::String => match json {
                Json::String(s) => Some(ScriptValue::string(s)),
                Json::Object(map) => map
                    .get("utf16")
                    .and_then(Json::as_array)
                    .and_then(|units| {
                        units
                            .iter()
                            .map(|unit| unit.as_u64().and_then(|n| u16::try_from(n).ok()))
                            .collect::<Option<Vec<_>>>()
                    })
                    .map(|units| ScriptValue::String(ScriptString::from_utf16(units))),
                _ => None,
            },
            TypeTag::Vector3 => {
                let Json::Object(map) = json else {
                    return Ok(None);
                };
                let mut components = [0.0f32; 3];
                for (slot, key) in components.iter_mut().zip(["x", "y", "z"]) {
                    match map.get(key).map(json_f32).transpose()?.flatten() {
                        Some(n) => *slot = n,
                        None => return Ok(None),
                    }
                }
                let [x, y, z] = components;
                Some(ScriptValue::Vector3(Vector3::new(x, y, z)))
            }
            TypeTag::Int32Array => match json {
                Json::Null => Some(ScriptValue::Int32Array(None)),
                Json::Array(items) => items
                    .iter()
                    .map(json_i32)
                    .collect::<Option<Vec<_>>>()
                    .map(ScriptValue::array),
                _ => None,
            },
            TypeTag::Handle => serde_json::from_value::<Entity>(json.clone())
                .ok()
                .map(ScriptValue::Handle),
        };
        Ok(value)
    }

    /// Best guess at the tag a JSON value was meant to carry, for error
    /// messages.
    pub fn infer_json_tag(json: &Json) -> Option<TypeTag> {
        match json {
            Json::Null => Some(TypeTag::Void),
            Json::Bool(_) => Some(TypeTag::Bool),
            Json::Number(_) if json_i32(json).is_some() => Some(TypeTag::Int32),
            Json::Number(_) => Some(TypeTag::Float32),
            Json::String(_) => Some(TypeTag::String),
            Json::Array(_) => Some(TypeTag::Int32Array),
            Json::Object(map) if map.contains_key("generation") => Some(TypeTag::Handle),
            Json::Object(map) if map.contains_key("utf16") => Some(TypeTag::String),
            Json::Object(map) if map.contains_key("x") => Some(TypeTag::Vector3),
            Json::Object(_) => None,
        }
    }

    /// Encode a return value for the script.
    ///
    /// Fails on NaN and infinities, which JSON would otherwise turn into
    /// `null`.
    pub fn to_json(&self) -> Result<Json, MarshalError> {
        let json = match self {
            ScriptValue::Void => Json::Null,
            ScriptValue::Int32(n) => json!(n),
            ScriptValue::Float32(n) => Json::from(finite(*n)?),
            ScriptValue::Bool(b) => json!(b),
            ScriptValue::String(s) => json!(s.to_string_lossy()),
            ScriptValue::Vector3(v) => {
                let (x, y, z) = (finite(v.x)?, finite(v.y)?, finite(v.z)?);
                json!({ "x": x, "y": y, "z": z })
            }
            ScriptValue::Int32Array(Some(items)) => json!(items),
            ScriptValue::Int32Array(None) => Json::Null,
            ScriptValue::Handle(e) => json!({ "index": e.index(), "generation": e.generation() }),
        };
        Ok(json)
    }
}

fn json_i32(json: &Json) -> Option<i32> {
    json.as_i64().and_then(|n| i32::try_from(n).ok())
}

fn json_f32(json: &Json) -> Result<Option<f32>, MarshalError> {
    let Some(n) = json.as_f64() else {
        return Ok(None);
    };
    let narrowed = n as f32;
    if narrowed.is_finite() {
        Ok(Some(narrowed))
    } else {
        Err(MarshalError::FloatRange {
            value: n.to_string(),
        })
    }
}

fn finite(n: f32) -> Result<f32, MarshalError> {
    if n.is_finite() {
        Ok(n)
    } else {
        Err(MarshalError::FloatRange {
            value: n.to_string(),
        })
    }
}

impl From<i32> for ScriptValue {
    fn from(n: i32) -> Self {
        ScriptValue::Int32(n)
    }
}

impl From<f32> for ScriptValue {
    fn from(n: f32) -> Self {
        ScriptValue::Float32(n)
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        ScriptValue::Bool(b)
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        ScriptValue::string(s)
    }
}

impl From<Vector3> for ScriptValue {
    fn from(v: Vector3) -> Self {
        ScriptValue::Vector3(v)
    }
}

impl From<Entity> for ScriptValue {
    fn from(e: Entity) -> Self {
        ScriptValue::Handle(e)
    }
}

impl From<Vec<i32>> for ScriptValue {
    fn from(items: Vec<i32>) -> Self {
        ScriptValue::array(items)
    }
}
