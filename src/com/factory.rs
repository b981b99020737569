//! The class-factory boundary object and the exported entry points the
//! host resolves by name.

use core::ffi::c_void;
use core::ptr;

use log::debug;

use crate::logger;

use super::callback;
use super::{
    CLASS_E_CLASSNOTAVAILABLE, CLASS_E_NOAGGREGATION, CLSID_UPROOTED_PROFILER, E_NOINTERFACE,
    E_POINTER, Guid, Hresult, IID_ICLASS_FACTORY, IID_IUNKNOWN, S_FALSE, S_OK,
};

/// The factory table: the identity triple, CreateInstance, LockServer.
#[repr(C)]
pub struct ClassFactoryVtbl {
    pub query_interface:
        unsafe extern "system" fn(*mut ClassFactory, *const Guid, *mut *mut c_void) -> Hresult,
    pub add_ref: unsafe extern "system" fn(*mut ClassFactory) -> u32,
    pub release: unsafe extern "system" fn(*mut ClassFactory) -> u32,
    pub create_instance: unsafe extern "system" fn(
        *mut ClassFactory,
        *mut c_void,
        *const Guid,
        *mut *mut c_void,
    ) -> Hresult,
    pub lock_server: unsafe extern "system" fn(*mut ClassFactory, i32) -> Hresult,
}

/// The factory object: a single pointer-sized field, the table.
#[repr(C)]
pub struct ClassFactory {
    vtbl: *const ClassFactoryVtbl,
}

// Immutable process static; the host only ever reads the table pointer.
unsafe impl Sync for ClassFactory {}

static VTBL: ClassFactoryVtbl = ClassFactoryVtbl {
    query_interface,
    add_ref,
    release,
    create_instance,
    lock_server,
};

static FACTORY: ClassFactory = ClassFactory { vtbl: &VTBL };

fn factory_instance() -> *mut ClassFactory {
    &FACTORY as *const ClassFactory as *mut ClassFactory
}

unsafe extern "system" fn query_interface(
    _this: *mut ClassFactory,
    riid: *const Guid,
    ppv: *mut *mut c_void,
) -> Hresult {
    if ppv.is_null() {
        return E_POINTER;
    }
    let known = unsafe { riid.as_ref() }
        .is_some_and(|iid| *iid == IID_IUNKNOWN || *iid == IID_ICLASS_FACTORY);
    if known {
        unsafe { *ppv = factory_instance() as *mut c_void };
        S_OK
    } else {
        unsafe { *ppv = ptr::null_mut() };
        E_NOINTERFACE
    }
}

// The factory is a process static; its counts are fixtures of the
// contract, not real ownership.
unsafe extern "system" fn add_ref(_this: *mut ClassFactory) -> u32 {
    2
}

unsafe extern "system" fn release(_this: *mut ClassFactory) -> u32 {
    1
}

unsafe extern "system" fn create_instance(
    _this: *mut ClassFactory,
    outer: *mut c_void,
    riid: *const Guid,
    ppv: *mut *mut c_void,
) -> Hresult {
    debug!("ClassFactory::CreateInstance");
    if !outer.is_null() {
        return CLASS_E_NOAGGREGATION;
    }
    let hr = callback::query(riid, ppv);
    debug!("  CreateInstance result {hr:#010x}");
    hr
}

unsafe extern "system" fn lock_server(_this: *mut ClassFactory, _lock: i32) -> Hresult {
    S_OK
}

/// Hands out the class factory when asked for the plug-in's class
/// identity.
#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub unsafe extern "system" fn DllGetClassObject(
    rclsid: *const Guid,
    _riid: *const Guid,
    ppv: *mut *mut c_void,
) -> Hresult {
    logger::init();
    debug!("DllGetClassObject");
    if ppv.is_null() {
        return E_POINTER;
    }
    if unsafe { rclsid.as_ref() } == Some(&CLSID_UPROOTED_PROFILER) {
        unsafe { *ppv = factory_instance() as *mut c_void };
        S_OK
    } else {
        unsafe { *ppv = ptr::null_mut() };
        CLASS_E_CLASSNOTAVAILABLE
    }
}

/// The host never unloads the library.
#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub unsafe extern "system" fn DllCanUnloadNow() -> Hresult {
    S_FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_object_requires_the_configured_clsid() {
        let mut out = ptr::null_mut();
        let hr = unsafe { DllGetClassObject(&CLSID_UPROOTED_PROFILER, &IID_ICLASS_FACTORY, &mut out) };
        assert_eq!(hr, S_OK);
        assert_eq!(out, factory_instance() as *mut c_void);

        let mut out = ptr::null_mut();
        let other = Guid::new(0x0BAD_C0DE, 0, 0, [0; 8]);
        let hr = unsafe { DllGetClassObject(&other, &IID_ICLASS_FACTORY, &mut out) };
        assert_eq!(hr, CLASS_E_CLASSNOTAVAILABLE);
        assert!(out.is_null());
    }

    #[test]
    fn factory_identity_queries() {
        let mut out = ptr::null_mut();
        let hr = unsafe { query_interface(factory_instance(), &IID_ICLASS_FACTORY, &mut out) };
        assert_eq!(hr, S_OK);
        assert_eq!(out, factory_instance() as *mut c_void);

        let mut out = ptr::null_mut();
        let hr = unsafe {
            query_interface(
                factory_instance(),
                &super::super::IID_ICOR_PROFILER_CALLBACK[0],
                &mut out,
            )
        };
        assert_eq!(hr, E_NOINTERFACE);
        assert!(out.is_null());
    }

    #[test]
    fn aggregation_is_refused() {
        let mut out = ptr::null_mut();
        let hr = unsafe {
            create_instance(
                factory_instance(),
                factory_instance() as *mut c_void,
                &IID_IUNKNOWN,
                &mut out,
            )
        };
        assert_eq!(hr, CLASS_E_NOAGGREGATION);
    }

    #[test]
    fn create_instance_answers_through_the_profiler() {
        let mut out = ptr::null_mut();
        let hr = unsafe {
            create_instance(
                factory_instance(),
                ptr::null_mut(),
                &super::super::IID_ICOR_PROFILER_CALLBACK[10],
                &mut out,
            )
        };
        assert_eq!(hr, S_OK);
        assert_eq!(out, callback::instance() as *mut c_void);
    }

    #[test]
    fn the_library_reports_itself_in_use() {
        assert_eq!(unsafe { DllCanUnloadNow() }, S_FALSE);
    }
}
