//! The consumed `ICorProfilerInfo` surface.
//!
//! Slots the plug-in never calls are declared untyped; the offsets are the
//! contract and must match the host's table exactly.

use core::ffi::c_void;
use core::ptr;

use crate::error::{self, Error};
use crate::metadata::Token;
use crate::wstr;

use super::metadata_api::{MetaDataEmit, MetaDataImport, MethodAlloc};
use super::{
    FunctionId, Guid, Hresult, IID_IMETADATA_EMIT, IID_IMETADATA_IMPORT, MdToken, ModuleId,
    OF_READ, OF_WRITE, UnusedSlot, check, succeeded,
};

/// Positional function table of `ICorProfilerInfo`.
#[repr(C)]
pub struct ICorProfilerInfoVtbl {
    pub query_interface:
        unsafe extern "system" fn(*mut c_void, *const Guid, *mut *mut c_void) -> Hresult,
    pub add_ref: unsafe extern "system" fn(*mut c_void) -> u32,
    pub release: unsafe extern "system" fn(*mut c_void) -> u32,
    pub get_class_from_object: UnusedSlot,
    pub get_class_from_token: UnusedSlot,
    pub get_code_info: UnusedSlot,
    pub get_event_mask: UnusedSlot,
    pub get_function_from_ip: UnusedSlot,
    pub get_function_from_token: UnusedSlot,
    pub get_handle_from_thread: UnusedSlot,
    pub get_object_size: UnusedSlot,
    pub is_array_class: UnusedSlot,
    pub get_thread_info: UnusedSlot,
    pub get_current_thread_id: UnusedSlot,
    pub get_class_id_info: UnusedSlot,
    pub get_function_info: unsafe extern "system" fn(
        *mut c_void,
        FunctionId,
        *mut usize,
        *mut ModuleId,
        *mut MdToken,
    ) -> Hresult,
    pub set_event_mask: unsafe extern "system" fn(*mut c_void, u32) -> Hresult,
    pub set_enter_leave_function_hooks: UnusedSlot,
    pub set_function_id_mapper: UnusedSlot,
    pub get_token_and_metadata_from_function: UnusedSlot,
    pub get_module_info: unsafe extern "system" fn(
        *mut c_void,
        ModuleId,
        *mut *const u8,
        u32,
        *mut u32,
        *mut u16,
        *mut usize,
    ) -> Hresult,
    pub get_module_metadata: unsafe extern "system" fn(
        *mut c_void,
        ModuleId,
        u32,
        *const Guid,
        *mut *mut c_void,
    ) -> Hresult,
    pub get_il_function_body: unsafe extern "system" fn(
        *mut c_void,
        ModuleId,
        MdToken,
        *mut *const u8,
        *mut u32,
    ) -> Hresult,
    pub get_il_function_body_allocator:
        unsafe extern "system" fn(*mut c_void, ModuleId, *mut *mut c_void) -> Hresult,
    pub set_il_function_body:
        unsafe extern "system" fn(*mut c_void, ModuleId, MdToken, *const u8) -> Hresult,
    pub get_app_domain_info: UnusedSlot,
    pub get_assembly_info: UnusedSlot,
    pub set_function_re_jit: UnusedSlot,
    pub force_gc: UnusedSlot,
    pub set_il_instrumented_code_map: UnusedSlot,
    pub get_inproc_inspection_interface: UnusedSlot,
    pub get_inproc_inspection_ithis_thread: UnusedSlot,
    pub get_thread_context: UnusedSlot,
    pub begin_inproc_debugging: UnusedSlot,
    pub end_inproc_debugging: UnusedSlot,
    pub get_il_to_native_mapping: UnusedSlot,
}

/// Borrowed view of the host-info capability held by the session. No
/// refcount is taken; the pointer stays alive for the process.
#[derive(Copy, Clone)]
pub struct ProfilerInfo {
    raw: *mut c_void,
}

impl ProfilerInfo {
    /// Wraps a non-null interface pointer.
    ///
    /// # Safety
    ///
    /// `raw` must be a live `ICorProfilerInfo` pointer for the life of the
    /// process.
    pub unsafe fn from_raw(raw: *mut c_void) -> Option<Self> {
        (!raw.is_null()).then_some(ProfilerInfo { raw })
    }

    fn vtbl(&self) -> &ICorProfilerInfoVtbl {
        unsafe { &**(self.raw as *mut *const ICorProfilerInfoVtbl) }
    }

    pub fn set_event_mask(&self, mask: u32) -> error::Result<()> {
        check("SetEventMask", unsafe {
            (self.vtbl().set_event_mask)(self.raw, mask)
        })
    }

    /// Logical name and owning assembly of a loaded module.
    pub fn module_info(&self, module: ModuleId) -> error::Result<(String, usize)> {
        let mut name = [0u16; 512];
        let mut len = 0u32;
        let mut assembly = 0usize;
        check("GetModuleInfo", unsafe {
            (self.vtbl().get_module_info)(
                self.raw,
                module,
                ptr::null_mut(),
                name.len() as u32,
                &mut len,
                name.as_mut_ptr(),
                &mut assembly,
            )
        })?;
        Ok((wstr::from_utf16_buf(&name), assembly))
    }

    /// Owning module and metadata token of a function about to compile.
    pub fn function_info(&self, function: FunctionId) -> error::Result<(ModuleId, Token)> {
        let mut class = 0usize;
        let mut module = 0usize;
        let mut token = 0u32;
        check("GetFunctionInfo", unsafe {
            (self.vtbl().get_function_info)(self.raw, function, &mut class, &mut module, &mut token)
        })?;
        Ok((module, Token(token)))
    }

    /// Read-only metadata view of a module.
    pub fn metadata_import(&self, module: ModuleId) -> error::Result<MetaDataImport> {
        let mut out = ptr::null_mut();
        check("GetModuleMetaData(ofRead)", unsafe {
            (self.vtbl().get_module_metadata)(
                self.raw,
                module,
                OF_READ,
                &IID_IMETADATA_IMPORT,
                &mut out,
            )
        })?;
        unsafe { MetaDataImport::from_raw(out) }
            .ok_or_else(|| Error::NotATarget("metadata import view unavailable".into()))
    }

    /// Read/write metadata view of a module.
    pub fn metadata_emit(&self, module: ModuleId) -> error::Result<MetaDataEmit> {
        let mut out = ptr::null_mut();
        check("GetModuleMetaData(ofWrite)", unsafe {
            (self.vtbl().get_module_metadata)(
                self.raw,
                module,
                OF_READ | OF_WRITE,
                &IID_IMETADATA_EMIT,
                &mut out,
            )
        })?;
        unsafe { MetaDataEmit::from_raw(out) }
            .ok_or_else(|| Error::NotATarget("metadata emit view unavailable".into()))
    }

    /// Borrows a method's current body. The storage is host-owned and must
    /// not be freed.
    pub fn il_function_body(&self, module: ModuleId, method: Token) -> error::Result<&[u8]> {
        let mut body = ptr::null();
        let mut size = 0u32;
        check("GetILFunctionBody", unsafe {
            (self.vtbl().get_il_function_body)(self.raw, module, method.0, &mut body, &mut size)
        })?;
        if body.is_null() || size == 0 {
            return Err(Error::Unsupported("method has no body".into()));
        }
        Ok(unsafe { core::slice::from_raw_parts(body, size as usize) })
    }

    /// The IL-body allocator bound to a module.
    pub fn il_body_allocator(&self, module: ModuleId) -> error::Result<MethodAlloc> {
        let mut out = ptr::null_mut();
        check("GetILFunctionBodyAllocator", unsafe {
            (self.vtbl().get_il_function_body_allocator)(self.raw, module, &mut out)
        })?;
        unsafe { MethodAlloc::from_raw(out) }
            .ok_or_else(|| Error::Unsupported("body allocator unavailable".into()))
    }

    /// Submits a replacement body; on success the buffer becomes host
    /// property.
    pub fn set_il_function_body(
        &self,
        module: ModuleId,
        method: Token,
        body: *const u8,
    ) -> error::Result<()> {
        check("SetILFunctionBody", unsafe {
            (self.vtbl().set_il_function_body)(self.raw, module, method.0, body)
        })
    }

    /// Identity-queries an arbitrary interface pointer for the classic
    /// info capability.
    pub fn query_from(unknown: *mut c_void) -> Option<*mut c_void> {
        if unknown.is_null() {
            return None;
        }
        let mut out = ptr::null_mut();
        let hr = unsafe {
            let vtbl = *(unknown as *mut *const super::IUnknownVtbl);
            ((*vtbl).query_interface)(unknown, &super::IID_ICOR_PROFILER_INFO, &mut out)
        };
        (succeeded(hr) && !out.is_null()).then_some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_vtable_slot_offsets() {
        let word = core::mem::size_of::<usize>();
        assert_eq!(
            core::mem::offset_of!(ICorProfilerInfoVtbl, get_function_info),
            15 * word
        );
        assert_eq!(
            core::mem::offset_of!(ICorProfilerInfoVtbl, set_event_mask),
            16 * word
        );
        assert_eq!(
            core::mem::offset_of!(ICorProfilerInfoVtbl, get_module_info),
            20 * word
        );
        assert_eq!(
            core::mem::offset_of!(ICorProfilerInfoVtbl, get_module_metadata),
            21 * word
        );
        assert_eq!(
            core::mem::offset_of!(ICorProfilerInfoVtbl, get_il_function_body),
            22 * word
        );
        assert_eq!(
            core::mem::offset_of!(ICorProfilerInfoVtbl, get_il_function_body_allocator),
            23 * word
        );
        assert_eq!(
            core::mem::offset_of!(ICorProfilerInfoVtbl, set_il_function_body),
            24 * word
        );
        assert_eq!(
            core::mem::size_of::<ICorProfilerInfoVtbl>(),
            36 * word
        );
    }
}
