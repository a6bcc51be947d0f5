//! Entity storage owned by the native engine.
//!
//! Scripts never own entities. They hold copies of [`Entity`] handles and
//! the [`World`] decides whether a handle still refers to a live slot.

mod entity;
mod world;

pub use entity::Entity;
pub use world::{EntityData, World, WorldError};
