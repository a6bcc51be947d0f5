//! Wire layouts for structs passed by value.
//!
//! Every field is little-endian with an explicit offset. The layout table is
//! versioned; the host refuses modules that report a different
//! `WIRE_LAYOUT_VERSION`.

use super::TypeTag;
use crate::error::MarshalError;
use purr_core::math::Vector3;
use std::mem::{offset_of, size_of};

pub const WIRE_LAYOUT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: &'static str,
    pub offset: usize,
    pub tag: TypeTag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructLayout {
    pub name: &'static str,
    pub size: usize,
    pub fields: &'static [FieldLayout],
}

pub const VECTOR3_WIRE_SIZE: usize = 12;

pub const VECTOR3_LAYOUT: StructLayout = StructLayout {
    name: "Vector3",
    size: VECTOR3_WIRE_SIZE,
    fields: &[
        FieldLayout { name: "x", offset: 0, tag: TypeTag::Float32 },
        FieldLayout { name: "y", offset: 4, tag: TypeTag::Float32 },
        FieldLayout { name: "z", offset: 8, tag: TypeTag::Float32 },
    ],
};

// The wire layout and the in-memory `repr(C)` layout must not drift apart.
const _: () = assert!(VECTOR3_LAYOUT.size == size_of::<Vector3>());
const _: () = assert!(VECTOR3_LAYOUT.fields[0].offset == offset_of!(Vector3, x));
const _: () = assert!(VECTOR3_LAYOUT.fields[1].offset == offset_of!(Vector3, y));
const _: () = assert!(VECTOR3_LAYOUT.fields[2].offset == offset_of!(Vector3, z));

pub fn encode_vector3(v: Vector3) -> [u8; VECTOR3_WIRE_SIZE] {
    let mut out = [0u8; VECTOR3_WIRE_SIZE];
    let fields = VECTOR3_LAYOUT.fields;
    for (field, value) in fields.iter().zip([v.x, v.y, v.z]) {
        out[field.offset..field.offset + 4].copy_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_vector3(bytes: &[u8]) -> Result<Vector3, MarshalError> {
    if bytes.len() != VECTOR3_WIRE_SIZE {
        return Err(MarshalError::StructSize {
            layout: VECTOR3_LAYOUT.name,
            expected: VECTOR3_WIRE_SIZE,
            actual: bytes.len(),
        });
    }

    let read = |offset: usize| {
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[offset..offset + 4]);
        f32::from_le_bytes(word)
    };
    let fields = VECTOR3_LAYOUT.fields;
    Ok(Vector3::new(
        read(fields[0].offset),
        read(fields[1].offset),
        read(fields[2].offset),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_exact() {
        let samples = [
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(-0.0, f32::MIN_POSITIVE, f32::MAX),
            Vector3::new(f32::MIN, 1e-30, -123.456),
        ];
        for v in samples {
            let decoded = decode_vector3(&encode_vector3(v)).unwrap();
            assert_eq!(decoded.x.to_bits(), v.x.to_bits());
            assert_eq!(decoded.y.to_bits(), v.y.to_bits());
            assert_eq!(decoded.z.to_bits(), v.z.to_bits());
        }
    }

    #[test]
    fn fields_are_little_endian_in_declared_order() {
        let bytes = encode_vector3(Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..8], &2.0f32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3.0f32.to_le_bytes());
    }

    #[cfg(target_endian = "little")]
    #[test]
    fn wire_matches_memory_layout_on_little_endian() {
        let v = Vector3::new(4.5, -1.25, 8.0);
        assert_eq!(&encode_vector3(v)[..], bytemuck::bytes_of(&v));
    }

    #[test]
    fn wrong_size_is_rejected() {
        let err = decode_vector3(&[0u8; 8]).unwrap_err();
        assert_eq!(
            err,
            MarshalError::StructSize {
                layout: "Vector3",
                expected: 12,
                actual: 8
            }
        );
    }
}
