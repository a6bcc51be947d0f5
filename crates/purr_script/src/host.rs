//! Script host: owns modules and bindings and drives them from the frame
//! loop.

use crate::binding::{BindingState, EntityBinding};
use crate::call_table::CallTable;
use crate::calls::InternalCalls;
use crate::error::{InvalidHandleError, LifecycleError, ResolutionError, ScriptError};
use crate::marshal::WIRE_LAYOUT_VERSION;
use crate::module::ScriptModule;
use purr_core::ecs::{Entity, World};
use purr_core::math::Vector3;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;
use std::sync::Arc;

/// Counters for one [`ScriptHost::update`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    pub created: usize,
    pub updated: usize,
    pub invalidated: usize,
    pub failures: usize,
}

pub struct ScriptHost {
    world: Rc<RefCell<World>>,
    calls: InternalCalls,
    modules: Vec<Box<dyn ScriptModule>>,
    bindings: Vec<EntityBinding>,
    frame: u64,
}

impl ScriptHost {
    /// Taking a [`CallTable`] rather than a builder means no script can run
    /// before registration is finished.
    pub fn new(table: CallTable, world: World) -> Self {
        let world = Rc::new(RefCell::new(world));
        let calls = InternalCalls::new(Arc::new(table), Rc::clone(&world));
        tracing::info!(functions = calls.table().len(), "script host ready");
        Self {
            world,
            calls,
            modules: Vec::new(),
            bindings: Vec::new(),
            frame: 0,
        }
    }

    pub fn world(&self) -> Ref<'_, World> {
        self.world.borrow()
    }

    pub fn world_mut(&self) -> RefMut<'_, World> {
        self.world.borrow_mut()
    }

    pub fn spawn(&self, name: impl Into<String>, position: Vector3) -> Entity {
        self.world.borrow_mut().spawn(name, position)
    }

    /// Unbound gateway, for engine-side code that wants to go through the
    /// same call path as scripts.
    pub fn calls(&self) -> &InternalCalls {
        &self.calls
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(|m| m.name())
    }

    pub fn bindings(&self) -> impl Iterator<Item = &EntityBinding> {
        self.bindings.iter()
    }

    /// Link a module and make its classes available to [`ScriptHost::attach`].
    /// Classes from earlier modules shadow later ones.
    pub fn load_module(&mut self, mut module: Box<dyn ScriptModule>) -> Result<(), ScriptError> {
        let actual = module.wire_layout_version();
        if actual != WIRE_LAYOUT_VERSION {
            return Err(ResolutionError::LayoutVersion {
                module: module.name().to_string(),
                expected: WIRE_LAYOUT_VERSION,
                actual,
            }
            .into());
        }
        module.link(&self.calls)?;
        tracing::info!(module = module.name(), "loaded script module");
        self.modules.push(module);
        Ok(())
    }

    /// Instantiate `class` for `entity`. Its creation hook runs at the start
    /// of the next [`ScriptHost::update`].
    pub fn attach(&mut self, entity: Entity, class: &str) -> Result<(), ScriptError> {
        if !self.world.borrow().is_alive(entity) {
            return Err(InvalidHandleError::Stale { entity }.into());
        }
        if self.position_of(entity, class).is_some() {
            return Err(LifecycleError::OutOfOrder {
                operation: "attach",
                state: "already attached",
            }
            .into());
        }
        let module = self
            .modules
            .iter_mut()
            .find(|m| m.has_class(class))
            .ok_or_else(|| ResolutionError::UnknownClass {
                class: class.to_string(),
            })?;

        let mut binding = EntityBinding::new(class, module.instantiate(class)?);
        binding.bind(entity, &self.calls)?;
        tracing::debug!(%entity, class, "attached script");
        self.bindings.push(binding);
        Ok(())
    }

    /// Deliver the destruction hook and drop the instance.
    pub fn detach(&mut self, entity: Entity, class: &str) -> Result<(), ScriptError> {
        let index = self
            .position_of(entity, class)
            .ok_or(LifecycleError::OutOfOrder {
                operation: "detach",
                state: "not attached",
            })?;
        let mut binding = self.bindings.remove(index);
        binding.destroy()
    }

    /// Run one frame: pending creation hooks first, then update hooks, both
    /// in attach order. A failing hook is logged and skipped.
    pub fn update(&mut self, delta_time: f32) -> FrameReport {
        self.frame += 1;
        let mut report = FrameReport {
            frame: self.frame,
            ..FrameReport::default()
        };

        {
            let world = self.world.borrow();
            for binding in &mut self.bindings {
                if let Some(entity) = binding.entity() {
                    if !world.is_alive(entity) {
                        tracing::warn!(%entity, class = binding.class(), "entity vanished without teardown");
                        binding.invalidate();
                        report.invalidated += 1;
                    }
                }
            }
        }

        for binding in &mut self.bindings {
            if binding.state() != BindingState::Bound || binding.is_created() {
                continue;
            }
            match binding.create() {
                Ok(()) => report.created += 1,
                Err(err) => {
                    report.failures += 1;
                    log_hook_failure("onCreate", binding, &err);
                }
            }
        }

        for binding in &mut self.bindings {
            if binding.state() != BindingState::Bound || !binding.is_created() {
                continue;
            }
            match binding.tick(delta_time) {
                Ok(()) => report.updated += 1,
                Err(err) => {
                    report.failures += 1;
                    log_hook_failure("onUpdate", binding, &err);
                }
            }
        }

        self.bindings.retain(|b| b.state() != BindingState::Destroyed);
        report
    }

    /// Tear down every script on `entity`, then remove it from the world.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        let (doomed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.bindings)
            .into_iter()
            .partition(|b| b.entity() == Some(entity));
        self.bindings = kept;

        for mut binding in doomed {
            if let Err(err) = binding.destroy() {
                log_hook_failure("onDestroy", &binding, &err);
            }
        }
        let despawned = self.world.borrow_mut().despawn(entity);
        tracing::debug!(%entity, despawned, "despawned scripted entity");
        despawned
    }

    /// Destroy all bindings in attach order. Returns how many were torn down.
    pub fn shutdown(&mut self) -> usize {
        let count = self.bindings.len();
        for mut binding in self.bindings.drain(..) {
            if let Err(err) = binding.destroy() {
                log_hook_failure("onDestroy", &binding, &err);
            }
        }
        tracing::info!(bindings = count, frames = self.frame, "script host shut down");
        count
    }

    fn position_of(&self, entity: Entity, class: &str) -> Option<usize> {
        self.bindings
            .iter()
            .position(|b| b.entity() == Some(entity) && b.class() == class)
    }
}

fn log_hook_failure(hook: &str, binding: &EntityBinding, err: &ScriptError) {
    match binding.last_entity() {
        Some(entity) => {
            tracing::warn!(hook, %entity, class = binding.class(), error = %err, "script hook failed")
        }
        None => tracing::warn!(hook, class = binding.class(), error = %err, "script hook failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{NativeModule, ScriptBehaviour};
    use crate::natives::register_builtins;

    type Journal = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        journal: Journal,
        kept: Rc<RefCell<Vec<InternalCalls>>>,
        fail_update: bool,
    }

    impl ScriptBehaviour for Recorder {
        fn on_create(&mut self, calls: &InternalCalls) -> Result<(), ScriptError> {
            self.kept.borrow_mut().push(calls.clone());
            self.journal.borrow_mut().push(format!("create {}", calls.name()?));
            Ok(())
        }

        fn on_update(&mut self, calls: &InternalCalls, _dt: f32) -> Result<(), ScriptError> {
            if self.fail_update {
                return Err(ScriptError::script("recorder", "update failed"));
            }
            self.journal.borrow_mut().push(format!("update {}", calls.name()?));
            Ok(())
        }

        fn on_destroy(&mut self, calls: &InternalCalls) -> Result<(), ScriptError> {
            self.journal.borrow_mut().push(format!("destroy {}", calls.name()?));
            Ok(())
        }
    }

    struct Fixture {
        host: ScriptHost,
        journal: Journal,
        kept: Rc<RefCell<Vec<InternalCalls>>>,
    }

    fn fixture() -> Fixture {
        let mut builder = CallTable::builder();
        register_builtins(&mut builder).unwrap();
        let mut host = ScriptHost::new(builder.seal(), World::new());

        let journal: Journal = Rc::default();
        let kept: Rc<RefCell<Vec<InternalCalls>>> = Rc::default();
        let mut module = NativeModule::new("Recorders");
        for (class, fail_update) in [("Recorder", false), ("Broken", true)] {
            let journal = Rc::clone(&journal);
            let kept = Rc::clone(&kept);
            module.register_class(class, move || {
                Box::new(Recorder {
                    journal: Rc::clone(&journal),
                    kept: Rc::clone(&kept),
                    fail_update,
                })
            });
        }
        host.load_module(Box::new(module)).unwrap();
        Fixture { host, journal, kept }
    }

    fn take(journal: &Journal) -> Vec<String> {
        std::mem::take(&mut *journal.borrow_mut())
    }

    #[test]
    fn creation_runs_before_updates_in_attach_order() {
        let mut f = fixture();
        let a = f.host.spawn("A", Vector3::ZERO);
        let b = f.host.spawn("B", Vector3::ZERO);
        f.host.attach(a, "Recorder").unwrap();
        f.host.attach(b, "Recorder").unwrap();

        let report = f.host.update(0.016);
        assert_eq!(report.created, 2);
        assert_eq!(report.updated, 2);
        assert_eq!(take(&f.journal), vec!["create A", "create B", "update A", "update B"]);

        let c = f.host.spawn("C", Vector3::ZERO);
        f.host.attach(c, "Recorder").unwrap();
        f.host.update(0.016);
        assert_eq!(take(&f.journal), vec!["create C", "update A", "update B", "update C"]);
    }

    #[test]
    fn attach_rejects_unknown_classes_and_dead_entities() {
        let mut f = fixture();
        let a = f.host.spawn("A", Vector3::ZERO);

        assert!(matches!(
            f.host.attach(a, "Enemy"),
            Err(ScriptError::Resolution(ResolutionError::UnknownClass { .. }))
        ));

        f.host.attach(a, "Recorder").unwrap();
        assert!(matches!(f.host.attach(a, "Recorder"), Err(ScriptError::Lifecycle(_))));

        f.host.world_mut().despawn(a);
        assert!(matches!(
            f.host.attach(a, "Recorder"),
            Err(ScriptError::InvalidHandle(InvalidHandleError::Stale { .. }))
        ));
    }

    #[test]
    fn despawn_delivers_destroy_then_invalidates() {
        let mut f = fixture();
        let a = f.host.spawn("A", Vector3::ZERO);
        f.host.attach(a, "Recorder").unwrap();
        f.host.update(0.016);
        take(&f.journal);

        assert!(f.host.despawn(a));
        assert_eq!(take(&f.journal), vec!["destroy A"]);
        assert!(!f.host.world().is_alive(a));
        assert_eq!(f.host.bindings().count(), 0);

        let kept = f.kept.borrow()[0].clone();
        assert!(matches!(
            kept.position(),
            Err(ScriptError::InvalidHandle(InvalidHandleError::Destroyed { .. }))
        ));
    }

    #[test]
    fn vanished_entities_are_dropped_without_hooks() {
        let mut f = fixture();
        let a = f.host.spawn("A", Vector3::ZERO);
        f.host.attach(a, "Recorder").unwrap();
        f.host.update(0.016);
        take(&f.journal);

        f.host.world_mut().despawn(a);
        let report = f.host.update(0.016);
        assert_eq!(report.invalidated, 1);
        assert_eq!(report.updated, 0);
        assert!(take(&f.journal).is_empty());
        assert_eq!(f.host.bindings().count(), 0);
    }

    #[test]
    fn failing_hook_skips_only_itself() {
        let mut f = fixture();
        let a = f.host.spawn("A", Vector3::ZERO);
        let b = f.host.spawn("B", Vector3::ZERO);
        f.host.attach(a, "Broken").unwrap();
        f.host.attach(b, "Recorder").unwrap();

        let report = f.host.update(0.016);
        assert_eq!(report.failures, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(take(&f.journal), vec!["create A", "create B", "update B"]);
    }

    #[test]
    fn detach_and_shutdown_destroy_in_order() {
        let mut f = fixture();
        let a = f.host.spawn("A", Vector3::ZERO);
        let b = f.host.spawn("B", Vector3::ZERO);
        let c = f.host.spawn("C", Vector3::ZERO);
        for entity in [a, b, c] {
            f.host.attach(entity, "Recorder").unwrap();
        }
        f.host.update(0.016);
        take(&f.journal);

        f.host.detach(b, "Recorder").unwrap();
        assert!(matches!(f.host.detach(b, "Recorder"), Err(ScriptError::Lifecycle(_))));
        assert!(f.host.world().is_alive(b));

        assert_eq!(f.host.shutdown(), 2);
        assert_eq!(take(&f.journal), vec!["destroy B", "destroy A", "destroy C"]);
    }

    #[test]
    fn uncreated_binding_is_destroyed_without_hook() {
        let mut f = fixture();
        let a = f.host.spawn("A", Vector3::ZERO);
        f.host.attach(a, "Recorder").unwrap();

        f.host.detach(a, "Recorder").unwrap();
        assert!(take(&f.journal).is_empty());
    }

    struct NextLayout(NativeModule);

    impl ScriptModule for NextLayout {
        fn name(&self) -> &str {
            self.0.name()
        }

        fn wire_layout_version(&self) -> u32 {
            WIRE_LAYOUT_VERSION + 1
        }

        fn link(&mut self, calls: &InternalCalls) -> Result<(), ScriptError> {
            self.0.link(calls)
        }

        fn has_class(&self, class: &str) -> bool {
            self.0.has_class(class)
        }

        fn instantiate(&mut self, class: &str) -> Result<Box<dyn ScriptBehaviour>, ScriptError> {
            self.0.instantiate(class)
        }
    }

    #[test]
    fn modules_built_for_another_layout_are_refused() {
        let mut f = fixture();
        let module = NativeModule::new("next").with_class::<Idle>("Idle");

        let err = f.host.load_module(Box::new(NextLayout(module))).unwrap_err();
        assert!(matches!(
            err,
            ScriptError::Resolution(ResolutionError::LayoutVersion { expected, actual, .. })
                if expected == WIRE_LAYOUT_VERSION && actual == WIRE_LAYOUT_VERSION + 1
        ));
        assert_eq!(f.host.module_names().collect::<Vec<_>>(), vec!["Recorders"]);

        let a = f.host.spawn("A", Vector3::ZERO);
        assert!(f.host.attach(a, "Idle").is_err());
    }

    #[derive(Default)]
    struct Idle;

    impl ScriptBehaviour for Idle {
        fn on_create(&mut self, _calls: &InternalCalls) -> Result<(), ScriptError> {
            Ok(())
        }

        fn on_update(&mut self, _calls: &InternalCalls, _dt: f32) -> Result<(), ScriptError> {
            Ok(())
        }
    }
}
