//! Script classes implemented in Rust.

use purr_core::math::Vector3;
use purr_script::{InternalCalls, NativeModule, ScriptBehaviour, ScriptError};

pub fn module() -> NativeModule {
    NativeModule::new("builtin").with_class::<Bobber>("Bobber")
}

/// Bobs its entity up and down around the height it was spawned at.
#[derive(Debug, Default)]
pub struct Bobber {
    origin: Vector3,
    phase: f32,
}

impl Bobber {
    const AMPLITUDE: f32 = 0.5;
    const FREQUENCY: f32 = 0.5;
}

impl ScriptBehaviour for Bobber {
    fn on_create(&mut self, calls: &InternalCalls) -> Result<(), ScriptError> {
        self.origin = calls.position()?;
        calls.log(&format!("{} bobbing from {:?}", calls.name()?, self.origin))
    }

    fn on_update(&mut self, calls: &InternalCalls, delta_time: f32) -> Result<(), ScriptError> {
        self.phase = (self.phase + delta_time * Self::FREQUENCY * std::f32::consts::TAU)
            % std::f32::consts::TAU;
        let offset = Vector3::new(0.0, self.phase.sin() * Self::AMPLITUDE, 0.0);
        calls.set_position(calls.vector3_add(self.origin, offset)?)
    }
}
