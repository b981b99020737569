//! The host-facing profiler callback object.
//!
//! The host dispatches through a positional table of at least 128 slots:
//! the identity triple at 0..3, Initialize at 3, Shutdown at 4,
//! ModuleLoadFinished at 14 and JITCompilationStarted at 23. Every other
//! slot answers with a successful no-op. The object and its table are
//! never-deallocated process statics; the refcount exists only to honour
//! the host's contract and never drives destruction.

use core::ffi::c_void;
use core::ptr;
use core::sync::atomic::{AtomicI32, Ordering};

use log::debug;

use crate::profiler;

use super::{
    E_NOINTERFACE, E_POINTER, FunctionId, Guid, Hresult, IID_ICOR_PROFILER_CALLBACK, IID_IUNKNOWN,
    ModuleId, S_OK,
};

/// Total positional slots exposed to the host.
pub const VTABLE_SLOTS: usize = 128;

type Stub = unsafe extern "system" fn() -> Hresult;

/// Success no-op filling every unimplemented slot.
unsafe extern "system" fn stub_ok() -> Hresult {
    S_OK
}

/// The exposed callback table. Stub blocks are positional filler between
/// the implemented slots; their grouping mirrors the capability's layout.
#[repr(C)]
pub struct CallbackVtbl {
    pub query_interface:
        unsafe extern "system" fn(*mut Profiler, *const Guid, *mut *mut c_void) -> Hresult,
    pub add_ref: unsafe extern "system" fn(*mut Profiler) -> u32,
    pub release: unsafe extern "system" fn(*mut Profiler) -> u32,
    pub initialize: unsafe extern "system" fn(*mut Profiler, *mut c_void) -> Hresult,
    pub shutdown: unsafe extern "system" fn(*mut Profiler) -> Hresult,
    /// Slots 5..14: appdomain, assembly and module-start notifications.
    pub lifecycle_stubs: [Stub; 9],
    pub module_load_finished:
        unsafe extern "system" fn(*mut Profiler, ModuleId, Hresult) -> Hresult,
    /// Slots 15..23: module, class and function-unload notifications.
    pub class_stubs: [Stub; 8],
    pub jit_compilation_started:
        unsafe extern "system" fn(*mut Profiler, FunctionId, i32) -> Hresult,
    /// Slots 24..: every later notification, through callback version 11.
    pub tail_stubs: [Stub; VTABLE_SLOTS - 24],
}

/// The boundary object: a single pointer-sized field, the table.
#[repr(C)]
pub struct Profiler {
    vtbl: *const CallbackVtbl,
}

// Immutable process static; the host only ever reads the table pointer.
unsafe impl Sync for Profiler {}

static VTBL: CallbackVtbl = CallbackVtbl {
    query_interface,
    add_ref,
    release,
    initialize,
    shutdown,
    lifecycle_stubs: [stub_ok; 9],
    module_load_finished,
    class_stubs: [stub_ok; 8],
    jit_compilation_started,
    tail_stubs: [stub_ok; VTABLE_SLOTS - 24],
};

static PROFILER: Profiler = Profiler { vtbl: &VTBL };
static REF_COUNT: AtomicI32 = AtomicI32::new(1);

/// The process-wide callback instance; never deallocated.
pub fn instance() -> *mut Profiler {
    &PROFILER as *const Profiler as *mut Profiler
}

/// Answers identity queries for IUnknown and every callback version with
/// the same object pointer; anything else is refused.
pub fn query(riid: *const Guid, ppv: *mut *mut c_void) -> Hresult {
    if ppv.is_null() {
        return E_POINTER;
    }
    let Some(iid) = (unsafe { riid.as_ref() }) else {
        unsafe { *ppv = ptr::null_mut() };
        return E_NOINTERFACE;
    };
    if *iid == IID_IUNKNOWN || IID_ICOR_PROFILER_CALLBACK.contains(iid) {
        unsafe { *ppv = instance() as *mut c_void };
        REF_COUNT.fetch_add(1, Ordering::AcqRel);
        return S_OK;
    }
    debug!("identity query rejected: {iid}");
    unsafe { *ppv = ptr::null_mut() };
    E_NOINTERFACE
}

unsafe extern "system" fn query_interface(
    _this: *mut Profiler,
    riid: *const Guid,
    ppv: *mut *mut c_void,
) -> Hresult {
    query(riid, ppv)
}

unsafe extern "system" fn add_ref(_this: *mut Profiler) -> u32 {
    (REF_COUNT.fetch_add(1, Ordering::AcqRel) + 1) as u32
}

unsafe extern "system" fn release(_this: *mut Profiler) -> u32 {
    (REF_COUNT.fetch_sub(1, Ordering::AcqRel) - 1) as u32
}

unsafe extern "system" fn initialize(_this: *mut Profiler, info_unknown: *mut c_void) -> Hresult {
    profiler::initialize(info_unknown)
}

unsafe extern "system" fn shutdown(_this: *mut Profiler) -> Hresult {
    profiler::shutdown()
}

unsafe extern "system" fn module_load_finished(
    _this: *mut Profiler,
    module: ModuleId,
    status: Hresult,
) -> Hresult {
    profiler::module_load_finished(module, status)
}

unsafe extern "system" fn jit_compilation_started(
    _this: *mut Profiler,
    function: FunctionId,
    is_safe_to_block: i32,
) -> Hresult {
    profiler::jit_compilation_started(function, is_safe_to_block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_exactly_128_pointer_slots() {
        let word = core::mem::size_of::<usize>();
        assert_eq!(core::mem::size_of::<CallbackVtbl>(), VTABLE_SLOTS * word);
    }

    #[test]
    fn implemented_slots_sit_at_their_positions() {
        let word = core::mem::size_of::<usize>();
        assert_eq!(core::mem::offset_of!(CallbackVtbl, initialize), 3 * word);
        assert_eq!(core::mem::offset_of!(CallbackVtbl, shutdown), 4 * word);
        assert_eq!(
            core::mem::offset_of!(CallbackVtbl, module_load_finished),
            14 * word
        );
        assert_eq!(
            core::mem::offset_of!(CallbackVtbl, jit_compilation_started),
            23 * word
        );
    }

    #[test]
    fn every_callback_identity_resolves_to_the_same_object() {
        let mut first = ptr::null_mut();
        assert_eq!(query(&IID_IUNKNOWN, &mut first), S_OK);
        assert_eq!(first, instance() as *mut c_void);
        for iid in &IID_ICOR_PROFILER_CALLBACK {
            let mut out = ptr::null_mut();
            assert_eq!(query(iid, &mut out), S_OK);
            assert_eq!(out, first);
        }
    }

    #[test]
    fn unknown_identities_are_refused() {
        let foreign = Guid::new(0xDEAD_BEEF, 0, 0, [0; 8]);
        let mut out = instance() as *mut c_void;
        assert_eq!(query(&foreign, &mut out), E_NOINTERFACE);
        assert!(out.is_null());
        assert_eq!(query(&super::super::IID_ICLASS_FACTORY, &mut out), E_NOINTERFACE);
    }

    #[test]
    fn refcount_never_reaches_destruction() {
        // The count starts at 1 and the object is a process static, so
        // balanced add/release pairs always leave it positive.
        let held = unsafe { add_ref(instance()) };
        assert!(held >= 2);
        let left = unsafe { release(instance()) };
        assert!(left >= 1);
    }
}
