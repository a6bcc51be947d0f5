//! Lifecycle binding between a script instance and a native entity.
//!
//! ```text
//! Unbound --bind--> Bound --destroy--> Destroyed
//!    \________________destroy_______________/
//! ```
//!
//! The state lives in a shared cell that every [`InternalCalls`] clone
//! handed to the instance also reads, so a script that kept a gateway
//! around still gets `InvalidHandleError` after destruction.

use crate::calls::InternalCalls;
use crate::error::{InvalidHandleError, LifecycleError, ScriptError};
use crate::module::ScriptBehaviour;
use purr_core::ecs::Entity;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    Bound,
    Destroyed,
}

impl BindingState {
    pub fn name(self) -> &'static str {
        match self {
            BindingState::Unbound => "unbound",
            BindingState::Bound => "bound",
            BindingState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for BindingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct EntityBinding {
    class: String,
    instance: Box<dyn ScriptBehaviour>,
    state: Rc<Cell<BindingState>>,
    entity: Option<Entity>,
    calls: Option<InternalCalls>,
    created: bool,
}

impl EntityBinding {
    pub fn new(class: impl Into<String>, instance: Box<dyn ScriptBehaviour>) -> Self {
        Self {
            class: class.into(),
            instance,
            state: Rc::new(Cell::new(BindingState::Unbound)),
            entity: None,
            calls: None,
            created: false,
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn state(&self) -> BindingState {
        self.state.get()
    }

    /// Bound entity; `None` before binding and after destruction.
    pub fn entity(&self) -> Option<Entity> {
        self.entity.filter(|_| self.state.get() == BindingState::Bound)
    }

    /// Entity this binding was bound to, kept after destruction for
    /// diagnostics.
    pub fn last_entity(&self) -> Option<Entity> {
        self.entity
    }

    /// True once `on_create` has completed successfully.
    pub fn is_created(&self) -> bool {
        self.created
    }

    /// The instance's call gateway.
    pub fn calls(&self) -> Result<&InternalCalls, InvalidHandleError> {
        match (self.state.get(), self.entity, &self.calls) {
            (BindingState::Bound, _, Some(calls)) => Ok(calls),
            (BindingState::Destroyed, Some(entity), _) => Err(InvalidHandleError::Destroyed { entity }),
            _ => Err(InvalidHandleError::Unbound),
        }
    }

    /// Inject the native handle. The creation hook runs separately via
    /// [`EntityBinding::create`].
    pub fn bind(&mut self, entity: Entity, base: &InternalCalls) -> Result<(), LifecycleError> {
        self.expect(BindingState::Unbound, "bind")?;
        self.entity = Some(entity);
        self.calls = Some(base.for_binding(entity, Rc::clone(&self.state)));
        self.state.set(BindingState::Bound);
        Ok(())
    }

    /// Run `on_create`. A failed hook can be retried; updates stay blocked
    /// until one succeeds.
    pub fn create(&mut self) -> Result<(), ScriptError> {
        self.expect(BindingState::Bound, "create")?;
        if self.created {
            return Err(LifecycleError::OutOfOrder {
                operation: "create",
                state: "already created",
            }
            .into());
        }
        let calls = self.calls.as_ref().ok_or(InvalidHandleError::Unbound)?;
        self.instance.on_create(calls)?;
        self.created = true;
        Ok(())
    }

    /// Deliver one frame's update.
    pub fn tick(&mut self, delta_time: f32) -> Result<(), ScriptError> {
        self.expect(BindingState::Bound, "update")?;
        if !self.created {
            return Err(LifecycleError::OutOfOrder {
                operation: "update",
                state: "creation pending",
            }
            .into());
        }
        let calls = self.calls.as_ref().ok_or(InvalidHandleError::Unbound)?;
        self.instance.on_update(calls, delta_time)
    }

    /// Deliver `on_destroy` while the handle is still usable, then
    /// invalidate it. The transition happens even if the hook fails; the
    /// hook's error is returned afterwards.
    pub fn destroy(&mut self) -> Result<(), ScriptError> {
        let hook = match self.state.get() {
            BindingState::Destroyed => {
                return Err(LifecycleError::OutOfOrder {
                    operation: "destroy",
                    state: BindingState::Destroyed.name(),
                }
                .into())
            }
            BindingState::Unbound => Ok(()),
            BindingState::Bound if self.created => match &self.calls {
                Some(calls) => self.instance.on_destroy(calls),
                None => Ok(()),
            },
            BindingState::Bound => Ok(()),
        };
        self.release();
        hook
    }

    /// Mark destroyed without running hooks, for entities the engine tore
    /// down behind the host's back.
    pub fn invalidate(&mut self) {
        if self.state.get() != BindingState::Destroyed {
            self.release();
        }
    }

    fn release(&mut self) {
        self.state.set(BindingState::Destroyed);
        self.calls = None;
    }

    fn expect(&self, state: BindingState, operation: &'static str) -> Result<(), LifecycleError> {
        let current = self.state.get();
        if current != state {
            return Err(LifecycleError::OutOfOrder {
                operation,
                state: current.name(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for EntityBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityBinding")
            .field("class", &self.class)
            .field("state", &self.state.get())
            .field("entity", &self.entity)
            .field("created", &self.created)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_table::CallTable;
    use crate::natives::register_builtins;
    use purr_core::ecs::World;
    use purr_core::math::Vector3;
    use std::cell::RefCell;
    use std::sync::Arc;

    type Journal = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        journal: Journal,
        kept: Rc<RefCell<Option<InternalCalls>>>,
        fail_create: bool,
    }

    impl ScriptBehaviour for Recorder {
        fn on_create(&mut self, calls: &InternalCalls) -> Result<(), ScriptError> {
            if self.fail_create {
                self.fail_create = false;
                return Err(ScriptError::script("test", "create failed"));
            }
            *self.kept.borrow_mut() = Some(calls.clone());
            self.journal.borrow_mut().push(format!("create {}", calls.name()?));
            Ok(())
        }

        fn on_update(&mut self, calls: &InternalCalls, delta_time: f32) -> Result<(), ScriptError> {
            calls.translate(Vector3::new(delta_time, 0.0, 0.0))?;
            self.journal.borrow_mut().push(format!("update {delta_time}"));
            Ok(())
        }

        fn on_destroy(&mut self, calls: &InternalCalls) -> Result<(), ScriptError> {
            // The handle must still work inside the destruction hook.
            let position = calls.position()?;
            self.journal.borrow_mut().push(format!("destroy at {}", position.x));
            Ok(())
        }
    }

    struct Fixture {
        base: InternalCalls,
        world: Rc<RefCell<World>>,
        journal: Journal,
        kept: Rc<RefCell<Option<InternalCalls>>>,
    }

    fn fixture() -> Fixture {
        let mut builder = CallTable::builder();
        register_builtins(&mut builder).unwrap();
        let world = Rc::new(RefCell::new(World::new()));
        Fixture {
            base: InternalCalls::new(Arc::new(builder.seal()), Rc::clone(&world)),
            world,
            journal: Rc::default(),
            kept: Rc::default(),
        }
    }

    fn recorder(f: &Fixture, fail_create: bool) -> EntityBinding {
        EntityBinding::new(
            "Player",
            Box::new(Recorder {
                journal: Rc::clone(&f.journal),
                kept: Rc::clone(&f.kept),
                fail_create,
            }),
        )
    }

    #[test]
    fn full_lifecycle_in_order() {
        let f = fixture();
        let player = f.world.borrow_mut().spawn("Player", Vector3::ZERO);
        let mut binding = recorder(&f, false);

        assert_eq!(binding.state(), BindingState::Unbound);
        binding.bind(player, &f.base).unwrap();
        assert_eq!(binding.state(), BindingState::Bound);
        binding.create().unwrap();
        binding.tick(0.5).unwrap();
        binding.tick(0.25).unwrap();
        binding.destroy().unwrap();

        assert_eq!(binding.state(), BindingState::Destroyed);
        assert_eq!(binding.entity(), None);
        assert_eq!(
            *f.journal.borrow(),
            vec!["create Player", "update 0.5", "update 0.25", "destroy at 0.75"]
        );
    }

    #[test]
    fn update_before_create_is_rejected() {
        let f = fixture();
        let player = f.world.borrow_mut().spawn("Player", Vector3::ZERO);
        let mut binding = recorder(&f, false);

        assert!(matches!(
            binding.tick(0.1),
            Err(ScriptError::Lifecycle(LifecycleError::OutOfOrder { state: "unbound", .. }))
        ));
        binding.bind(player, &f.base).unwrap();
        assert!(matches!(
            binding.tick(0.1),
            Err(ScriptError::Lifecycle(LifecycleError::OutOfOrder { .. }))
        ));
        assert!(f.journal.borrow().is_empty());
    }

    #[test]
    fn failed_create_blocks_updates_until_retried() {
        let f = fixture();
        let player = f.world.borrow_mut().spawn("Player", Vector3::ZERO);
        let mut binding = recorder(&f, true);
        binding.bind(player, &f.base).unwrap();

        assert!(binding.create().is_err());
        assert!(!binding.is_created());
        assert!(binding.tick(0.1).is_err());

        binding.create().unwrap();
        binding.tick(0.1).unwrap();
        assert!(binding.create().is_err(), "second create must be rejected");
    }

    #[test]
    fn calls_after_destroy_fail_with_invalid_handle() {
        let f = fixture();
        let player = f.world.borrow_mut().spawn("Player", Vector3::ZERO);
        let mut binding = recorder(&f, false);
        binding.bind(player, &f.base).unwrap();
        binding.create().unwrap();
        binding.destroy().unwrap();

        let kept = f.kept.borrow().clone().unwrap();
        assert!(matches!(
            kept.sum(&[1, 2]),
            Err(ScriptError::InvalidHandle(InvalidHandleError::Destroyed { entity })) if entity == player
        ));
        assert!(binding.calls().is_err());
        assert!(matches!(binding.tick(0.1), Err(ScriptError::Lifecycle(_))));
        assert!(matches!(binding.destroy(), Err(ScriptError::Lifecycle(_))));
    }

    #[test]
    fn bind_twice_is_rejected() {
        let f = fixture();
        let player = f.world.borrow_mut().spawn("Player", Vector3::ZERO);
        let mut binding = recorder(&f, false);
        binding.bind(player, &f.base).unwrap();
        assert!(binding.bind(player, &f.base).is_err());
    }

    #[test]
    fn invalidate_skips_hooks() {
        let f = fixture();
        let player = f.world.borrow_mut().spawn("Player", Vector3::ZERO);
        let mut binding = recorder(&f, false);
        binding.bind(player, &f.base).unwrap();
        binding.create().unwrap();

        binding.invalidate();
        assert_eq!(binding.state(), BindingState::Destroyed);
        assert_eq!(*f.journal.borrow(), vec!["create Player"]);
    }
}
