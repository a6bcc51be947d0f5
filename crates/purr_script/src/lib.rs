//! Purr Scripting Bridge
//!
//! Lets script code call into the native engine and lets the engine drive
//! script lifecycles.
//!
//! ## Architecture
//!
//! - **Marshal codec:** converts arguments and returns between script and
//!   native representations (primitives, `Vector3`, `int32[]`, strings)
//! - **Call table:** name → native function, built once and sealed before
//!   any script runs
//! - **Entity binding:** `Unbound → Bound → Destroyed` per script instance
//! - **Script host:** loads modules (native or QuickJS) and forwards
//!   `onCreate` / `onUpdate` / `onDestroy` from the frame loop
//!
//! ```text
//! frame loop → ScriptHost → EntityBinding → script hook
//!   → InternalCalls → CallTable → marshal → native fn
//! ```

pub mod binding;
pub mod call_table;
pub mod calls;
pub mod error;
pub mod host;
pub mod marshal;
pub mod module;
pub mod natives;
pub mod runtime;

pub use binding::{BindingState, EntityBinding};
pub use call_table::{CallTable, CallTableBuilder, NativeCallable, NativeContext, NativeFunctionDescriptor};
pub use calls::{FromScriptValue, InternalCalls};
pub use error::{
    InvalidHandleError, LifecycleError, MarshalError, RegistrationError, ResolutionError, ScriptError,
};
pub use host::{FrameReport, ScriptHost};
pub use marshal::{ScriptValue, Signature, TypeTag};
pub use module::{NativeModule, ScriptBehaviour, ScriptModule};
pub use natives::register_builtins;
pub use runtime::{JsModule, ScriptRuntime};

pub use rquickjs;
