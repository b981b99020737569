//! Callback-side policy: Initialize and Shutdown, the module-load
//! observer, and the JIT fallback observer.

use core::ffi::c_void;

use log::{debug, info, warn};

use crate::com::{
    COR_PRF_DISABLE_ALL_NGEN_IMAGES, COR_PRF_MONITOR_JIT_COMPILATION, COR_PRF_MONITOR_MODULE_LOADS,
    E_FAIL, FunctionId, Hresult, ModuleId, S_OK,
};
use crate::com::info::ProfilerInfo;
use crate::il::rewriter;
use crate::metadata::{selector, surgeon};
use crate::session::SESSION;
use crate::{logger, paths};

/// Name fragment identifying the corelib module, tracked as a negative
/// filter: the foundational library re-enters itself during assembly
/// loading, so injecting there is a dead end.
pub const CORELIB_NAME: &str = "System.Private.CoreLib";

/// How many module-load events are logged before throttling.
const MODULE_LOG_LIMIT: u32 = 20;
/// How many JIT events are logged before throttling.
const JIT_LOG_LIMIT: u32 = 10;

/// The Initialize callback: identity guard, host-info acquisition, event
/// mask. A failing return detaches the plug-in for good.
pub fn initialize(info_unknown: *mut c_void) -> Hresult {
    logger::init();
    info!("=== profiler initialize (pid {}) ===", std::process::id());

    if !paths::process_is_target() {
        warn!("process is not {}, detaching", paths::TARGET_PROCESS);
        return E_FAIL;
    }

    let Some(raw) = ProfilerInfo::query_from(info_unknown) else {
        warn!("host info capability unavailable, detaching");
        return E_FAIL;
    };
    if !SESSION.begin(raw) {
        warn!("initialize out of phase, detaching");
        return E_FAIL;
    }
    let Some(host) = SESSION.info() else {
        return E_FAIL;
    };

    // Disabling precompiled images forces every method through the JIT,
    // which is what makes the body rewrite observable.
    let mask = COR_PRF_MONITOR_MODULE_LOADS
        | COR_PRF_MONITOR_JIT_COMPILATION
        | COR_PRF_DISABLE_ALL_NGEN_IMAGES;
    if let Err(err) = host.set_event_mask(mask) {
        warn!("{err}, detaching");
        return E_FAIL;
    }
    info!("event mask {mask:#010x} set");
    S_OK
}

/// The Shutdown callback: flush and close the log; the session is done.
pub fn shutdown() -> Hresult {
    info!("profiler shutdown");
    SESSION.end();
    logger::close();
    S_OK
}

/// The module-load observer. Tracks corelib, filters platform assemblies,
/// and hands the first eligible module to the metadata surgeon; when the
/// surgeon succeeds the method selector attempts a synchronous rewrite,
/// with the JIT observer as fallback.
pub fn module_load_finished(module: ModuleId, _status: Hresult) -> Hresult {
    let Some(host) = SESSION.info() else {
        return S_OK;
    };
    let ordinal = SESSION.next_module_ordinal();
    let Ok((name, _assembly)) = host.module_info(module) else {
        return S_OK;
    };
    if ordinal <= MODULE_LOG_LIMIT {
        debug!("module #{ordinal}: {name} (id={module:#x})");
    }

    if name.contains(CORELIB_NAME) && SESSION.note_corelib(module) {
        info!("corelib module id {module:#x}");
    }

    if SESSION.is_armed() {
        return S_OK;
    }
    if module == SESSION.corelib_module() || is_platform_assembly(&name) {
        return S_OK;
    }

    debug!("trying injection target: {name}");
    match surgeon::prepare_target_module(&host, module) {
        Ok(tokens) => {
            if !SESSION.try_arm(module, tokens) {
                return S_OK;
            }
            info!("*** target module: {name} ***");
            match selector::select_and_inject(&host, module, tokens) {
                Ok(method) => info!("injected at module load into {method}"),
                Err(err) => debug!("synchronous injection deferred: {err}"),
            }
        }
        Err(err) => debug!("{name} rejected: {err}"),
    }
    S_OK
}

/// The JIT fallback observer: once per-module injection is armed but
/// still pending, the first method of the target module reaching the
/// compiler is claimed and rewritten.
pub fn jit_compilation_started(function: FunctionId, _is_safe_to_block: i32) -> Hresult {
    let Some(host) = SESSION.info() else {
        return S_OK;
    };
    let ordinal = SESSION.next_jit_ordinal();
    if SESSION.is_injected() {
        return S_OK;
    }
    let Ok((module, method)) = host.function_info(function) else {
        return S_OK;
    };
    let Some(tokens) = SESSION.target(module) else {
        if ordinal <= JIT_LOG_LIMIT {
            debug!("jit #{ordinal}: module={module:#x} method={method}");
        }
        return S_OK;
    };
    debug!("jit #{ordinal}: module={module:#x} method={method} [target]");

    if !SESSION.claim_rewrite() {
        return S_OK;
    }
    info!("injecting into target module method {method} (jit #{ordinal})");
    match rewriter::inject(&host, module, method, tokens) {
        Ok(()) => {
            SESSION.mark_injected();
            info!("injection complete; payload loads when the method first runs");
        }
        Err(err) => {
            SESSION.release_rewrite();
            debug!("injection failed, next method in target module may do: {err}");
        }
    }
    S_OK
}

/// Platform assemblies are never injection targets. The check applies to
/// the basename so module names reported as full paths filter the same
/// way as bare names.
fn is_platform_assembly(name: &str) -> bool {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);
    base.starts_with("System.") || base.starts_with("Microsoft.")
}

#[cfg(test)]
mod tests {
    use super::is_platform_assembly;

    #[test]
    fn platform_assemblies_are_filtered_by_basename() {
        assert!(is_platform_assembly("System.Console.dll"));
        assert!(is_platform_assembly("/usr/share/dotnet/Microsoft.Win32.Primitives.dll"));
        assert!(is_platform_assembly("C:\\app\\System.Text.Json.dll"));
        assert!(!is_platform_assembly("/opt/root/Sentry.dll"));
        assert!(!is_platform_assembly("RootApp.Core.dll"));
        // Containment alone does not disqualify.
        assert!(!is_platform_assembly("/home/u/System.d/app.dll"));
    }
}
