//! C-compatible API consumed by the host application.
//!
//! Status-returning functions answer with a `BoxCode`; on failure the
//! message is kept as the instance's last error. Returned strings belong to
//! the caller and must be handed back to `singbox_free_string`.

use std::ffi::{c_void, CStr};
use std::os::raw::{c_char, c_int};
use std::sync::Arc;

use crate::common::error::{BoxCode, BoxError, BoxResult};
use crate::common::ids::InstanceId;
use crate::instance::{self, Instance};

use super::strings;

static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

fn handle_of(id: InstanceId) -> *mut c_void {
    match usize::try_from(id.raw()) {
        Ok(raw) => raw as *mut c_void,
        Err(_) => std::ptr::null_mut(),
    }
}

fn lookup(handle: *mut c_void) -> BoxResult<Arc<Instance>> {
    if handle.is_null() {
        return Err(BoxError::InvalidHandle);
    }
    instance::get(InstanceId::new(handle as usize as u64))
}

/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn read_text<'a>(ptr: *const c_char, what: &str) -> BoxResult<&'a str> {
    if ptr.is_null() {
        return Err(BoxError::invalid(format!("{what} is null")));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|e| BoxError::invalid(format!("{what} is not valid UTF-8: {e}")))
}

fn status(instance: &Instance, result: BoxResult<()>) -> c_int {
    match result {
        Ok(()) => BoxCode::Ok.raw(),
        Err(err) => {
            instance.record_error(&err);
            err.code().raw()
        }
    }
}

/// Shared shape of every `int f(handle, const char*)` entry point.
unsafe fn with_text(
    handle: *mut c_void,
    text: *const c_char,
    what: &str,
    op: impl FnOnce(&Instance, &str) -> BoxResult<()>,
) -> c_int {
    let instance = match lookup(handle) {
        Ok(instance) => instance,
        Err(err) => return err.code().raw(),
    };
    let result = read_text(text, what).and_then(|text| op(&instance, text));
    status(&instance, result)
}

fn json_or_null(handle: *mut c_void, op: impl FnOnce(&Instance) -> BoxResult<String>) -> *const c_char {
    let Ok(instance) = lookup(handle) else {
        return std::ptr::null();
    };
    match op(&instance) {
        Ok(json) => strings::into_raw(json),
        Err(err) => {
            instance.record_error(&err);
            std::ptr::null()
        }
    }
}

/// Allocate an idle instance. Returns null if no handle can be issued.
#[no_mangle]
pub extern "C" fn singbox_create_instance() -> *mut c_void {
    match instance::create() {
        Ok(id) => handle_of(id),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Parse `config`, bind its inbounds and start serving.
///
/// # Safety
/// `config` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn singbox_start_with_config(handle: *mut c_void, config: *const c_char) -> c_int {
    with_text(handle, config, "config", |instance, text| instance.start(text))
}

#[no_mangle]
pub extern "C" fn singbox_stop(handle: *mut c_void) -> c_int {
    match lookup(handle) {
        Ok(instance) => status(&instance, instance.stop()),
        Err(err) => err.code().raw(),
    }
}

/// Stop (if running) and forget the instance. The handle is dead afterwards.
#[no_mangle]
pub extern "C" fn singbox_destroy_instance(handle: *mut c_void) {
    if handle.is_null() {
        return;
    }
    let _ = instance::destroy(InstanceId::new(handle as usize as u64));
}

#[no_mangle]
pub extern "C" fn singbox_is_running(handle: *mut c_void) -> c_int {
    match lookup(handle) {
        Ok(instance) => c_int::from(instance.is_running()),
        Err(_) => 0,
    }
}

/// Static version string. Must not be freed.
#[no_mangle]
pub extern "C" fn singbox_get_version() -> *const c_char {
    VERSION.as_ptr() as *const c_char
}

/// Copy of the most recent error message, or null.
#[no_mangle]
pub extern "C" fn singbox_get_last_error(handle: *mut c_void) -> *const c_char {
    match lookup(handle).map(|instance| instance.last_error()) {
        Ok(Some(message)) => strings::into_raw(message),
        _ => std::ptr::null(),
    }
}

#[no_mangle]
pub extern "C" fn singbox_get_stats(handle: *mut c_void) -> *const c_char {
    json_or_null(handle, Instance::stats_json)
}

#[no_mangle]
pub extern "C" fn singbox_get_connection_info(handle: *mut c_void) -> *const c_char {
    json_or_null(handle, Instance::connections_json)
}

/// Validate and apply `config`. A running instance keeps its old inbounds
/// if the new ones cannot be bound.
///
/// # Safety
/// `config` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn singbox_update_config(handle: *mut c_void, config: *const c_char) -> c_int {
    with_text(handle, config, "config", |instance, text| instance.update(text))
}

/// # Safety
/// `level` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn singbox_set_log_level(handle: *mut c_void, level: *const c_char) -> c_int {
    with_text(handle, level, "log level", |instance, name| instance.set_log_level(name))
}

/// Release a string returned by this library. Unknown pointers are ignored.
///
/// # Safety
/// `ptr` must not be used after this call.
#[no_mangle]
pub unsafe extern "C" fn singbox_free_string(ptr: *const c_char) {
    strings::release(ptr);
}
