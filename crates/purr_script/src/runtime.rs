//! QuickJS script modules.
//!
//! Scripts declare plain classes with `onCreate()`, `onUpdate(deltaTime)`
//! and optionally `onDestroy()`. Every registered internal call is exposed
//! as `Internal.<name>(...)`; arguments and results cross the boundary as
//! JSON and are checked against the descriptor's signature on the Rust side.
//! Each instance sees its entity as `this.entity`.
//!
//! A class is any global constructor whose prototype has `onUpdate`.
//! Strings containing surrogates travel as raw UTF-16 code units so that
//! unpaired ones fail in the string encoder rather than in the JSON parser.

use crate::calls::InternalCalls;
use crate::error::{LifecycleError, ResolutionError, ScriptError};
use crate::module::{ScriptBehaviour, ScriptModule};
use rquickjs::{CaughtError, Context, Ctx, Function, Runtime};
use serde_json::json;
use std::cell::RefCell;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

const PRELUDE: &str = r#"
globalThis.Internal = {};
globalThis.__purr_instances = new Map();
globalThis.__purr_lookup = function (className) {
    try {
        return new Function("return " + className)();
    } catch (e) {
        return undefined;
    }
};
globalThis.__purr_has_class = function (className) {
    if (className.startsWith("__purr")) {
        return false;
    }
    const Class = __purr_lookup(className);
    return typeof Class === "function"
        && typeof Class.prototype === "object"
        && Class.prototype !== null
        && typeof Class.prototype.onUpdate === "function";
};
globalThis.__purr_marshal_arg = function (value) {
    if (typeof value !== "string" || !/[\uD800-\uDFFF]/.test(value)) {
        return value;
    }
    const units = [];
    for (let i = 0; i < value.length; i++) {
        units.push(value.charCodeAt(i));
    }
    return { utf16: units };
};
globalThis.__purr_define_internal = function (name) {
    Internal[name] = function (...args) {
        const payload = JSON.stringify(args.map(__purr_marshal_arg));
        const reply = JSON.parse(__purr_native_call(name, payload));
        if (!reply.ok) {
            throw new Error(reply.error);
        }
        return reply.value;
    };
};
globalThis.__purr_create = function (id, className, index, generation) {
    const Class = __purr_lookup(className);
    const instance = new Class();
    instance.entity = { index: index, generation: generation };
    __purr_instances.set(id, instance);
};
globalThis.__purr_dispatch = function (id, hook, deltaTime) {
    const instance = __purr_instances.get(id);
    if (instance === undefined) {
        throw new Error("no script instance " + id);
    }
    if (typeof instance[hook] === "function") {
        instance[hook](deltaTime);
    }
};
globalThis.__purr_release = function (id) {
    __purr_instances.delete(id);
};
"#;

/// QuickJS runtime plus its single context.
pub struct ScriptRuntime {
    runtime: Runtime,
    pub context: Context,
}

impl ScriptRuntime {
    pub fn new() -> Result<Self, rquickjs::Error> {
        let runtime = Runtime::new()?;
        let context = Context::full(&runtime)?;

        Ok(Self { runtime, context })
    }

    /// Cap the JS heap. Allocations past the limit raise a script exception.
    pub fn set_memory_limit(&self, bytes: usize) {
        self.runtime.set_memory_limit(bytes);
    }

    /// Evaluate `source` at global scope, returning the exception message on
    /// failure.
    pub fn execute(&self, source: &str) -> Result<(), String> {
        self.context
            .with(|ctx| ctx.eval::<(), _>(source).map_err(|err| describe(&ctx, err)))
    }
}

/// Pull a readable message out of a failed evaluation.
fn describe<'js>(ctx: &Ctx<'js>, err: rquickjs::Error) -> String {
    match CaughtError::from_error(ctx, err) {
        CaughtError::Exception(exception) => exception
            .message()
            .unwrap_or_else(|| "exception without message".to_string()),
        CaughtError::Value(value) => value
            .as_string()
            .and_then(|s| s.to_string().ok())
            .unwrap_or_else(|| format!("{value:?}")),
        CaughtError::Error(err) => err.to_string(),
    }
}

/// Routes `Internal.*` calls from JS to whichever gateway is active.
///
/// While a hook runs, the active gateway is the instance's bound one; at
/// module top level it is the unbound base gateway.
#[derive(Default)]
struct Gateway {
    base: RefCell<Option<InternalCalls>>,
    active: RefCell<Option<InternalCalls>>,
    last_error: RefCell<Option<ScriptError>>,
}

impl Gateway {
    fn dispatch(&self, name: &str, payload: &str) -> String {
        let calls = match self.active.borrow().clone() {
            Some(calls) => Some(calls),
            None => self.base.borrow().clone(),
        };
        let result = match calls {
            Some(calls) => calls.call_json(name, payload),
            None => Err(LifecycleError::OutOfOrder {
                operation: "call",
                state: "module not linked",
            }
            .into()),
        };
        let encoded = result.and_then(|value| value.to_json().map_err(ScriptError::from));
        let reply = match encoded {
            Ok(value) => json!({ "ok": true, "value": value }),
            Err(err) => {
                tracing::debug!(name, error = %err, "internal call failed in script");
                let reply = json!({ "ok": false, "error": err.to_string() });
                *self.last_error.borrow_mut() = Some(err);
                reply
            }
        };
        reply.to_string()
    }
}

struct JsShared {
    module: String,
    runtime: ScriptRuntime,
    gateway: Rc<Gateway>,
}

impl JsShared {
    /// Run `f` inside the context with `calls` as the active gateway.
    ///
    /// If the script let an internal-call error escape unchanged, the
    /// original typed error is returned instead of a generic script error.
    fn run<T>(
        &self,
        calls: &InternalCalls,
        f: impl for<'js> FnOnce(&Ctx<'js>) -> rquickjs::Result<T>,
    ) -> Result<T, ScriptError> {
        let previous = self.gateway.active.replace(Some(calls.clone()));
        self.gateway.last_error.replace(None);

        let result = self
            .runtime
            .context
            .with(|ctx| f(&ctx).map_err(|err| describe(&ctx, err)));

        self.gateway.active.replace(previous);
        let last_error = self.gateway.last_error.take();

        result.map_err(|message| match last_error {
            Some(err) if err.to_string() == message => err,
            _ => ScriptError::script(&self.module, message),
        })
    }
}

/// A JavaScript source file evaluated in its own QuickJS context.
pub struct JsModule {
    shared: Rc<JsShared>,
    source: String,
    linked: bool,
    next_id: u32,
}

impl JsModule {
    pub fn from_source(name: impl Into<String>, source: impl Into<String>) -> Result<Self, ScriptError> {
        let name = name.into();
        let runtime =
            ScriptRuntime::new().map_err(|err| ScriptError::script(&name, err.to_string()))?;
        Ok(Self {
            shared: Rc::new(JsShared {
                module: name,
                runtime,
                gateway: Rc::default(),
            }),
            source: source.into(),
            linked: false,
            next_id: 0,
        })
    }

    /// Module name is the file stem.
    pub fn from_file(path: &Path) -> Result<Self, ScriptError> {
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let source = std::fs::read_to_string(path).map_err(|err| {
            ScriptError::script(&name, format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_source(name, source)
    }

    pub fn runtime(&self) -> &ScriptRuntime {
        &self.shared.runtime
    }

    pub fn with_memory_limit(self, bytes: usize) -> Self {
        self.shared.runtime.set_memory_limit(bytes);
        self
    }
}

impl fmt::Debug for JsModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsModule")
            .field("name", &self.shared.module)
            .field("linked", &self.linked)
            .finish_non_exhaustive()
    }
}

impl ScriptModule for JsModule {
    fn name(&self) -> &str {
        &self.shared.module
    }

    fn link(&mut self, calls: &InternalCalls) -> Result<(), ScriptError> {
        if self.linked {
            return Err(LifecycleError::OutOfOrder {
                operation: "link",
                state: "already linked",
            }
            .into());
        }
        self.shared.gateway.base.replace(Some(calls.clone()));

        let gateway = Rc::clone(&self.shared.gateway);
        let names: Vec<String> = calls.table().names().map(str::to_string).collect();
        let source = self.source.as_str();
        self.shared.run(calls, move |ctx| {
            let native = Function::new(ctx.clone(), move |name: String, payload: String| {
                gateway.dispatch(&name, &payload)
            })?;
            ctx.globals().set("__purr_native_call", native)?;
            ctx.eval::<(), _>(PRELUDE)?;

            let define: Function = ctx.globals().get("__purr_define_internal")?;
            for name in names {
                define.call::<_, ()>((name,))?;
            }
            ctx.eval::<(), _>(source)
        })?;

        self.linked = true;
        tracing::debug!(module = %self.shared.module, "linked js module");
        Ok(())
    }

    fn has_class(&self, class: &str) -> bool {
        if !self.linked || !is_identifier(class) {
            return false;
        }
        self.shared.runtime.context.with(|ctx| {
            ctx.globals()
                .get::<_, Function>("__purr_has_class")
                .and_then(|f| f.call::<_, bool>((class.to_string(),)))
                .unwrap_or(false)
        })
    }

    fn instantiate(&mut self, class: &str) -> Result<Box<dyn ScriptBehaviour>, ScriptError> {
        if !self.has_class(class) {
            return Err(ResolutionError::UnknownClass {
                class: class.to_string(),
            }
            .into());
        }
        let id = self.next_id;
        self.next_id = id.wrapping_add(1);
        Ok(Box::new(JsBehaviour {
            id,
            class: class.to_string(),
            shared: Rc::clone(&self.shared),
            spawned: false,
        }))
    }
}

/// Class names reach `new Function`, so only plain identifiers are allowed.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

struct JsBehaviour {
    id: u32,
    class: String,
    shared: Rc<JsShared>,
    spawned: bool,
}

impl JsBehaviour {
    fn dispatch(&self, calls: &InternalCalls, hook: &str, delta_time: f32) -> Result<(), ScriptError> {
        let id = self.id;
        self.shared.run(calls, |ctx| {
            let dispatch: Function = ctx.globals().get("__purr_dispatch")?;
            dispatch.call::<_, ()>((id, hook.to_string(), f64::from(delta_time)))
        })
    }
}

impl ScriptBehaviour for JsBehaviour {
    fn on_create(&mut self, calls: &InternalCalls) -> Result<(), ScriptError> {
        if !self.spawned {
            let entity = calls.handle()?;
            let (id, class) = (self.id, self.class.clone());
            self.shared.run(calls, |ctx| {
                let create: Function = ctx.globals().get("__purr_create")?;
                create.call::<_, ()>((id, class, entity.index(), entity.generation()))
            })?;
            self.spawned = true;
        }
        self.dispatch(calls, "onCreate", 0.0)
    }

    fn on_update(&mut self, calls: &InternalCalls, delta_time: f32) -> Result<(), ScriptError> {
        self.dispatch(calls, "onUpdate", delta_time)
    }

    fn on_destroy(&mut self, calls: &InternalCalls) -> Result<(), ScriptError> {
        self.dispatch(calls, "onDestroy", 0.0)
    }
}

impl Drop for JsBehaviour {
    fn drop(&mut self) {
        if !self.spawned {
            return;
        }
        let id = self.id;
        let released = self.shared.runtime.context.with(|ctx| {
            ctx.globals()
                .get::<_, Function>("__purr_release")
                .and_then(|f| f.call::<_, ()>((id,)))
        });
        if let Err(err) = released {
            tracing::debug!(id, error = %err, "failed to release js instance");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::EntityBinding;
    use crate::call_table::CallTable;
    use crate::error::{InvalidHandleError, MarshalError, ResolutionError};
    use crate::host::ScriptHost;
    use crate::natives::register_builtins;
    use purr_core::ecs::World;
    use purr_core::math::Vector3;
    use std::sync::Arc;

    const PLAYER: &str = r#"
        class Player {
            onCreate() {
                this.name = Internal.Entity_GetName(this.entity);
                globalThis.lastSum = Internal.Math_Sum([1, 2, 3, 4, 5]);
                Internal.Debug_Log("created " + this.name);
            }
            onUpdate(deltaTime) {
                Internal.Entity_Translate(this.entity, { x: deltaTime, y: 0, z: 0 });
            }
            onDestroy() {
                globalThis.destroyed = this.name;
            }
        }

        class Faulty {
            onCreate() {}
            onUpdate(deltaTime) {
                if (deltaTime > 1) {
                    throw new Error("boom");
                }
                Internal.Math_Sum("not an array");
            }
        }

        class Stranger {
            onCreate() {}
            onUpdate(deltaTime) {
                Internal.Entity_GetName({ index: 99, generation: 0 });
            }
        }

        class Overflow {
            onCreate() {}
            onUpdate(deltaTime) {
                const huge = { x: 1e30, y: 1e30, z: 1e30 };
                globalThis.overflowDot = Internal.Vector3_Dot(huge, huge);
            }
        }

        class Widened {
            onCreate() {}
            onUpdate(deltaTime) {
                globalThis.widenedLength = Internal.Vector3_Length({ x: 1e39, y: 0, z: 0 });
            }
        }

        class Garbled {
            onCreate() {
                Internal.Debug_Log("paired \uD83D\uDE3A is fine");
            }
            onUpdate(deltaTime) {
                Internal.Debug_Log("a\uD800b");
            }
        }

        class Helper {
            static twice(n) {
                return n * 2;
            }
        }

        globalThis.loadedLength = Internal.Vector3_Length({ x: 0, y: 3, z: 4 });
    "#;

    fn base() -> (InternalCalls, Rc<RefCell<World>>) {
        let mut builder = CallTable::builder();
        register_builtins(&mut builder).unwrap();
        let world = Rc::new(RefCell::new(World::new()));
        (InternalCalls::new(Arc::new(builder.seal()), Rc::clone(&world)), world)
    }

    fn eval<T>(module: &JsModule, source: &str) -> T
    where
        T: for<'js> rquickjs::FromJs<'js>,
    {
        module
            .runtime()
            .context
            .with(|ctx| ctx.eval::<T, _>(source).unwrap())
    }

    #[test]
    fn link_exposes_internal_calls_to_top_level_code() {
        let (calls, _world) = base();
        let mut module = JsModule::from_source("player", PLAYER).unwrap();
        module.link(&calls).unwrap();

        assert_eq!(eval::<f64>(&module, "loadedLength"), 5.0);
        assert!(eval::<bool>(&module, "typeof Internal.Entity_Translate === 'function'"));
        assert!(module.has_class("Player"));
        assert!(!module.has_class("Enemy"));
        assert!(!module.has_class("Player; globalThis.pwned = 1"));
        assert!(!module.has_class("Helper"));
        assert!(!module.has_class("Object"));
        assert!(!module.has_class("Math"));
        assert!(!module.has_class("__purr_create"));
        assert!(module.link(&calls).is_err());
    }

    #[test]
    fn player_moves_through_the_host() {
        let mut builder = CallTable::builder();
        register_builtins(&mut builder).unwrap();
        let mut host = ScriptHost::new(builder.seal(), World::new());
        host.load_module(Box::new(JsModule::from_source("player", PLAYER).unwrap()))
            .unwrap();

        let cat = host.spawn("Cat", Vector3::ZERO);
        host.attach(cat, "Player").unwrap();
        assert!(matches!(
            host.attach(cat, "Enemy"),
            Err(ScriptError::Resolution(ResolutionError::UnknownClass { .. }))
        ));

        for _ in 0..2 {
            let report = host.update(0.5);
            assert_eq!(report.failures, 0);
        }
        assert_eq!(host.world().get(cat).unwrap().position, Vector3::new(1.0, 0.0, 0.0));
        assert!(host.despawn(cat));
    }

    #[test]
    fn hooks_run_in_order_and_see_their_entity() {
        let (calls, world) = base();
        let cat = world.borrow_mut().spawn("Cat", Vector3::ZERO);
        let mut module = JsModule::from_source("player", PLAYER).unwrap();
        module.link(&calls).unwrap();

        let mut binding = EntityBinding::new("Player", module.instantiate("Player").unwrap());
        binding.bind(cat, &calls).unwrap();
        binding.create().unwrap();
        assert_eq!(eval::<i32>(&module, "lastSum"), 15);

        binding.tick(0.25).unwrap();
        assert_eq!(world.borrow().get(cat).unwrap().position.x, 0.25);

        binding.destroy().unwrap();
        assert_eq!(eval::<String>(&module, "destroyed"), "Cat");
    }

    #[test]
    fn internal_call_errors_keep_their_category() {
        let (calls, world) = base();
        let cat = world.borrow_mut().spawn("Cat", Vector3::ZERO);
        let mut module = JsModule::from_source("player", PLAYER).unwrap();
        module.link(&calls).unwrap();

        let mut faulty = EntityBinding::new("Faulty", module.instantiate("Faulty").unwrap());
        faulty.bind(cat, &calls).unwrap();
        faulty.create().unwrap();
        assert!(matches!(
            faulty.tick(0.1),
            Err(ScriptError::Marshal(MarshalError::TypeMismatch { .. }))
        ));
        match faulty.tick(2.0) {
            Err(ScriptError::Script { module, message }) => {
                assert_eq!(module, "player");
                assert!(message.contains("boom"), "{message}");
            }
            other => panic!("expected script error, got {other:?}"),
        }

        let mut stranger = EntityBinding::new("Stranger", module.instantiate("Stranger").unwrap());
        stranger.bind(cat, &calls).unwrap();
        stranger.create().unwrap();
        assert!(matches!(
            stranger.tick(0.1),
            Err(ScriptError::InvalidHandle(InvalidHandleError::Stale { .. }))
        ));
    }

    #[test]
    fn floats_outside_float32_raise_instead_of_becoming_null() {
        let (calls, world) = base();
        let cat = world.borrow_mut().spawn("Cat", Vector3::ZERO);
        let mut module = JsModule::from_source("player", PLAYER).unwrap();
        module.link(&calls).unwrap();

        for class in ["Overflow", "Widened"] {
            let mut binding = EntityBinding::new(class, module.instantiate(class).unwrap());
            binding.bind(cat, &calls).unwrap();
            binding.create().unwrap();
            let result = binding.tick(0.1);
            assert!(
                matches!(result, Err(ScriptError::Marshal(MarshalError::FloatRange { .. }))),
                "{class}: {result:?}"
            );
        }
        assert!(eval::<bool>(&module, "globalThis.overflowDot === undefined"));
        assert!(eval::<bool>(&module, "globalThis.widenedLength === undefined"));
    }

    #[test]
    fn unpaired_surrogates_are_encoding_errors() {
        let (calls, world) = base();
        let cat = world.borrow_mut().spawn("Cat", Vector3::ZERO);
        let mut module = JsModule::from_source("player", PLAYER).unwrap();
        module.link(&calls).unwrap();

        let mut garbled = EntityBinding::new("Garbled", module.instantiate("Garbled").unwrap());
        garbled.bind(cat, &calls).unwrap();
        garbled.create().unwrap();
        let result = garbled.tick(0.1);
        assert!(
            matches!(result, Err(ScriptError::Marshal(MarshalError::Encoding { .. }))),
            "{result:?}"
        );
    }

    #[test]
    fn syntax_errors_fail_the_link() {
        let (calls, _world) = base();
        let mut module = JsModule::from_source("broken", "class {").unwrap();
        assert!(matches!(module.link(&calls), Err(ScriptError::Script { .. })));
        assert!(!module.has_class("Player"));
    }

    #[test]
    fn execute_reports_exception_messages() {
        let runtime = ScriptRuntime::new().unwrap();
        runtime.execute("globalThis.answer = 42;").unwrap();
        let message = runtime.execute("throw new Error('nope')").unwrap_err();
        assert_eq!(message, "nope");
    }

    #[test]
    fn missing_file_is_a_script_error() {
        let err = JsModule::from_file(Path::new("does/not/exist.js")).unwrap_err();
        assert!(matches!(err, ScriptError::Script { module, .. } if module == "exist"));
    }

    #[test]
    fn class_names_must_be_identifiers() {
        assert!(is_identifier("Player"));
        assert!(is_identifier("_private$1"));
        assert!(!is_identifier("1Player"));
        assert!(!is_identifier("a.b"));
        assert!(!is_identifier(""));
    }
}
