//! Entity handle with generational index
//!
//! Entities are lightweight handles (8 bytes) that reference slots in the World.
//! The generation counter turns use-after-despawn into a detectable error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity handle (generation-indexed for safety)
///
/// - Index: Position in the world's slot array
/// - Generation: Incremented on despawn, so old handles stop matching
///
/// Example:
/// ```ignore
/// let entity = world.spawn("Player", Vector3::ZERO);
/// world.despawn(entity);
/// assert!(!world.is_alive(entity)); // generation mismatch
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}
