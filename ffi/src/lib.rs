//! C ABI for `toggle_engine`.
//!
//! Engines are referred to by an opaque [`EngineHandle`] created with [`new_engine`] and released
//! with [`free_engine`]. String results are JSON envelopes of the form
//! `{"statusCode": "Ok" | "NotFound" | "Error", "value": ..., "errorMessage": ..., "errorKind": ...}`
//! and must be released with [`free_response`].
//!
//! Engines created here do not record metrics on their own. Hosts report evaluations with
//! [`count_toggle`] and [`count_variant`] and collect them with [`get_metrics`].
#![allow(clippy::missing_safety_doc)]

mod registry;
mod response;

use std::{
    ffi::{c_char, CString},
    sync::{Arc, Once, OnceLock},
};

use serde::Serialize;
use toggle_engine::{Context, Engine};

pub use registry::EngineHandle;
pub use response::FfiError;

use response::{context_arg, into_raw, str_arg};

fn respond<T: Serialize>(call: impl FnOnce() -> Result<Option<T>, FfiError>) -> *mut c_char {
    into_raw(call())
}

/// Resolve the common `(handle, toggle name, context)` argument triple.
unsafe fn evaluate<'a>(
    handle: EngineHandle,
    toggle_name_ptr: *const c_char,
    context_ptr: *const c_char,
) -> Result<(Arc<Engine>, &'a str, Context), FfiError> {
    let engine = registry::lookup(handle)?;
    let toggle_name = str_arg(toggle_name_ptr, "toggle_name")?;
    let context = context_arg(context_ptr)?;
    Ok((engine, toggle_name, context))
}

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::new().default_filter_or("toggle_engine=warn"),
        )
        .try_init();
    });
}

/// Create an engine with no toggles.
#[no_mangle]
pub extern "C" fn new_engine() -> EngineHandle {
    init_logging();
    registry::register()
}

/// Release an engine. Unknown handles are ignored.
#[no_mangle]
pub extern "C" fn free_engine(handle: EngineHandle) {
    if !registry::release(handle) {
        log::debug!(target: "toggle_engine", handle; "free_engine called with an unknown handle");
    }
}

/// Load a state payload. On error the previous state stays active.
#[no_mangle]
pub unsafe extern "C" fn take_state(handle: EngineHandle, json_ptr: *const c_char) -> *mut c_char {
    respond(|| {
        let engine = registry::lookup(handle)?;
        let json = str_arg(json_ptr, "json")?;
        engine.load_state(json)?;
        Ok(Some(()))
    })
}

/// `value` is the enabled state. `NotFound` for an unknown toggle.
#[no_mangle]
pub unsafe extern "C" fn check_enabled(
    handle: EngineHandle,
    toggle_name_ptr: *const c_char,
    context_ptr: *const c_char,
) -> *mut c_char {
    respond(|| {
        let (engine, toggle_name, context) = evaluate(handle, toggle_name_ptr, context_ptr)?;
        Ok(engine
            .resolve(toggle_name, &context)
            .map(|resolved| resolved.enabled))
    })
}

/// Native boolean variant of [`check_enabled`]. Any error, or an unknown toggle, is `false`.
#[no_mangle]
pub unsafe extern "C" fn is_enabled(
    handle: EngineHandle,
    toggle_name_ptr: *const c_char,
    context_ptr: *const c_char,
) -> bool {
    let result = evaluate(handle, toggle_name_ptr, context_ptr)
        .map(|(engine, toggle_name, context)| engine.is_enabled(toggle_name, &context));
    result.unwrap_or_else(|err| {
        log::warn!(target: "toggle_engine", kind = err.kind(); "is_enabled failed: {err}");
        false
    })
}

/// `value` is the variant result. `NotFound` for an unknown toggle.
#[no_mangle]
pub unsafe extern "C" fn check_variant(
    handle: EngineHandle,
    toggle_name_ptr: *const c_char,
    context_ptr: *const c_char,
) -> *mut c_char {
    respond(|| {
        let (engine, toggle_name, context) = evaluate(handle, toggle_name_ptr, context_ptr)?;
        Ok(engine
            .resolve(toggle_name, &context)
            .map(|resolved| resolved.variant))
    })
}

/// `value` is `{enabled, impressionData, project, variant}`. `NotFound` for an unknown toggle.
#[no_mangle]
pub unsafe extern "C" fn resolve(
    handle: EngineHandle,
    toggle_name_ptr: *const c_char,
    context_ptr: *const c_char,
) -> *mut c_char {
    respond(|| {
        let (engine, toggle_name, context) = evaluate(handle, toggle_name_ptr, context_ptr)?;
        Ok(engine.resolve(toggle_name, &context))
    })
}

/// `value` maps every toggle name to its resolved state.
#[no_mangle]
pub unsafe extern "C" fn resolve_all(
    handle: EngineHandle,
    context_ptr: *const c_char,
) -> *mut c_char {
    respond(|| {
        let engine = registry::lookup(handle)?;
        let context = context_arg(context_ptr)?;
        Ok(Some(engine.resolve_all(&context)))
    })
}

/// Count one evaluation of a toggle. Any non-zero `enabled` counts as enabled.
#[no_mangle]
pub unsafe extern "C" fn count_toggle(
    handle: EngineHandle,
    toggle_name_ptr: *const c_char,
    enabled: u8,
) -> *mut c_char {
    respond(|| {
        let engine = registry::lookup(handle)?;
        let toggle_name = str_arg(toggle_name_ptr, "toggle_name")?;
        engine.count_toggle(toggle_name, enabled != 0);
        Ok(Some(()))
    })
}

/// Count one variant selection.
#[no_mangle]
pub unsafe extern "C" fn count_variant(
    handle: EngineHandle,
    toggle_name_ptr: *const c_char,
    variant_name_ptr: *const c_char,
) -> *mut c_char {
    respond(|| {
        let engine = registry::lookup(handle)?;
        let toggle_name = str_arg(toggle_name_ptr, "toggle_name")?;
        let variant_name = str_arg(variant_name_ptr, "variant_name")?;
        engine.count_variant(toggle_name, variant_name);
        Ok(Some(()))
    })
}

/// Drain the metrics counted since the last call. Returns null when nothing was counted.
#[no_mangle]
pub extern "C" fn get_metrics(handle: EngineHandle) -> *mut c_char {
    match registry::lookup(handle) {
        Ok(engine) => match engine.drain_metrics() {
            Some(bucket) => into_raw(Ok(Some(bucket))),
            None => std::ptr::null_mut(),
        },
        Err(err) => into_raw::<()>(Err(err)),
    }
}

/// `value` is the toggle's `impressionData` flag, `false` for unknown toggles.
#[no_mangle]
pub unsafe extern "C" fn should_emit_impression_event(
    handle: EngineHandle,
    toggle_name_ptr: *const c_char,
) -> *mut c_char {
    respond(|| {
        let engine = registry::lookup(handle)?;
        let toggle_name = str_arg(toggle_name_ptr, "toggle_name")?;
        Ok(Some(engine.should_emit_impression_event(toggle_name)))
    })
}

/// `value` is an array of `{name, type, project, enabled}`.
#[no_mangle]
pub extern "C" fn list_known_toggles(handle: EngineHandle) -> *mut c_char {
    into_raw(registry::lookup(handle).map(|engine| Some(engine.list_known_toggles())))
}

/// `value` is the list of strategy names evaluated natively.
#[no_mangle]
pub extern "C" fn built_in_strategies() -> *mut c_char {
    into_raw::<&[&str]>(Ok(Some(toggle_engine::built_in_strategies())))
}

/// Version of the engine. The returned string is static and must not be freed.
#[no_mangle]
pub extern "C" fn get_core_version() -> *const c_char {
    static VERSION: OnceLock<CString> = OnceLock::new();
    VERSION
        .get_or_init(|| CString::new(toggle_engine::core_version()).unwrap_or_default())
        .as_ptr()
}

/// Release a string returned by this library. Null is a no-op.
#[no_mangle]
pub unsafe extern "C" fn free_response(response_ptr: *mut c_char) {
    if response_ptr.is_null() {
        return;
    }
    drop(CString::from_raw(response_ptr));
}
