//! Purr Engine Core
//!
//! Native side of the script bridge:
//! - Generational entity handles and the world that owns them
//! - `Vector3`, the fixed-layout value type shared with scripts
//! - Fixed-rate simulation time

pub mod ecs;
pub mod math;
pub mod time;

pub use glam;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
