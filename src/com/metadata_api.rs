//! The consumed metadata surfaces: `IMetaDataImport`, `IMetaDataEmit` and
//! the per-module `IMethodMalloc` body allocator.
//!
//! Each table is declared slot for slot; the handful the plug-in calls
//! carry real signatures, everything else is positional filler. The safe
//! wrappers own the release discipline: every handle obtained from the
//! host is released exactly once, on both success and failure exits.

use core::ffi::c_void;
use core::iter::FusedIterator;
use core::ptr;

use crate::error::{self, Error};
use crate::metadata::Token;
use crate::wstr;

use super::{E_OUTOFMEMORY, Guid, Hresult, MdToken, S_OK, UnusedSlot, check, release_unknown};

/// Enumeration page size for the paged import cursors.
const ENUM_PAGE: usize = 32;

/// `mdAbstract`: the method has no body by attribute.
pub const MD_ABSTRACT: u32 = 0x0400;
/// `miUnmanaged`: the method is a foreign-function stub.
pub const MI_UNMANAGED: u32 = 0x0004;

/// Positional function table of `IMetaDataImport`.
#[repr(C)]
pub struct IMetaDataImportVtbl {
    pub query_interface:
        unsafe extern "system" fn(*mut c_void, *const Guid, *mut *mut c_void) -> Hresult,
    pub add_ref: unsafe extern "system" fn(*mut c_void) -> u32,
    pub release: unsafe extern "system" fn(*mut c_void) -> u32,
    pub close_enum: unsafe extern "system" fn(*mut c_void, *mut c_void),
    pub count_enum: UnusedSlot,
    pub reset_enum: UnusedSlot,
    pub enum_type_defs: unsafe extern "system" fn(
        *mut c_void,
        *mut *mut c_void,
        *mut MdToken,
        u32,
        *mut u32,
    ) -> Hresult,
    pub enum_interface_impls: UnusedSlot,
    pub enum_type_refs: unsafe extern "system" fn(
        *mut c_void,
        *mut *mut c_void,
        *mut MdToken,
        u32,
        *mut u32,
    ) -> Hresult,
    pub find_type_def_by_name: UnusedSlot,
    pub get_scope_props: UnusedSlot,
    pub get_module_from_scope: UnusedSlot,
    pub get_type_def_props: UnusedSlot,
    pub get_interface_impl_props: UnusedSlot,
    pub get_type_ref_props: unsafe extern "system" fn(
        *mut c_void,
        MdToken,
        *mut MdToken,
        *mut u16,
        u32,
        *mut u32,
    ) -> Hresult,
    pub resolve_type_ref: UnusedSlot,
    pub enum_members: UnusedSlot,
    pub enum_members_with_name: UnusedSlot,
    pub enum_methods: unsafe extern "system" fn(
        *mut c_void,
        *mut *mut c_void,
        MdToken,
        *mut MdToken,
        u32,
        *mut u32,
    ) -> Hresult,
    pub enum_methods_with_name: UnusedSlot,
    pub enum_fields: UnusedSlot,
    pub enum_fields_with_name: UnusedSlot,
    pub enum_params: UnusedSlot,
    pub enum_member_refs: UnusedSlot,
    pub enum_method_impls: UnusedSlot,
    pub enum_permission_sets: UnusedSlot,
    pub find_member: UnusedSlot,
    pub find_method: UnusedSlot,
    pub find_field: UnusedSlot,
    pub find_member_ref: UnusedSlot,
    pub get_method_props: unsafe extern "system" fn(
        *mut c_void,
        MdToken,
        *mut MdToken,
        *mut u16,
        u32,
        *mut u32,
        *mut u32,
        *mut *const u8,
        *mut u32,
        *mut u32,
        *mut u32,
    ) -> Hresult,
    pub get_member_ref_props: UnusedSlot,
    pub enum_properties: UnusedSlot,
    pub enum_events: UnusedSlot,
    pub get_event_props: UnusedSlot,
    pub enum_method_semantics: UnusedSlot,
    pub get_method_semantics: UnusedSlot,
    pub get_class_layout: UnusedSlot,
    pub get_field_marshal: UnusedSlot,
    pub get_rva: UnusedSlot,
    pub get_permission_set_props: UnusedSlot,
    pub get_sig_from_token: UnusedSlot,
    pub get_module_ref_props: UnusedSlot,
    pub enum_module_refs: UnusedSlot,
    pub get_type_spec_from_token: UnusedSlot,
    pub get_name_from_token: UnusedSlot,
    pub enum_unresolved_methods: UnusedSlot,
    pub get_user_string: UnusedSlot,
    pub get_pinvoke_map: UnusedSlot,
    pub enum_signatures: UnusedSlot,
    pub enum_type_specs: UnusedSlot,
    pub enum_user_strings: UnusedSlot,
    pub get_param_for_method_index: UnusedSlot,
    pub enum_custom_attributes: UnusedSlot,
    pub get_custom_attribute_props: UnusedSlot,
    pub find_type_ref: UnusedSlot,
    pub get_member_props: UnusedSlot,
    pub get_field_props: UnusedSlot,
    pub get_property_props: UnusedSlot,
    pub get_param_props: UnusedSlot,
    pub get_custom_attribute_by_name: UnusedSlot,
    pub is_valid_token: UnusedSlot,
    pub get_nested_class_props: UnusedSlot,
    pub get_native_call_conv_from_sig: UnusedSlot,
    pub is_global: UnusedSlot,
}

/// Positional function table of `IMetaDataEmit`.
#[repr(C)]
pub struct IMetaDataEmitVtbl {
    pub query_interface:
        unsafe extern "system" fn(*mut c_void, *const Guid, *mut *mut c_void) -> Hresult,
    pub add_ref: unsafe extern "system" fn(*mut c_void) -> u32,
    pub release: unsafe extern "system" fn(*mut c_void) -> u32,
    pub set_module_props: UnusedSlot,
    pub save: UnusedSlot,
    pub save_to_stream: UnusedSlot,
    pub get_save_size: UnusedSlot,
    pub define_type_def: UnusedSlot,
    pub define_nested_type: UnusedSlot,
    pub set_handler: UnusedSlot,
    pub define_method: UnusedSlot,
    pub define_method_impl: UnusedSlot,
    pub define_type_ref_by_name:
        unsafe extern "system" fn(*mut c_void, MdToken, *const u16, *mut MdToken) -> Hresult,
    pub define_import_type: UnusedSlot,
    pub define_member_ref: unsafe extern "system" fn(
        *mut c_void,
        MdToken,
        *const u16,
        *const u8,
        u32,
        *mut MdToken,
    ) -> Hresult,
    pub define_import_member: UnusedSlot,
    pub define_event: UnusedSlot,
    pub set_class_layout: UnusedSlot,
    pub delete_class_layout: UnusedSlot,
    pub set_field_marshal: UnusedSlot,
    pub delete_field_marshal: UnusedSlot,
    pub define_permission_set: UnusedSlot,
    pub set_rva: UnusedSlot,
    pub get_token_from_sig: UnusedSlot,
    pub define_module_ref: UnusedSlot,
    pub set_parent: UnusedSlot,
    pub get_token_from_type_spec: UnusedSlot,
    pub save_to_memory: UnusedSlot,
    pub define_user_string:
        unsafe extern "system" fn(*mut c_void, *const u16, u32, *mut MdToken) -> Hresult,
    pub delete_token: UnusedSlot,
    pub set_method_props: UnusedSlot,
    pub set_type_def_props: UnusedSlot,
    pub set_event_props: UnusedSlot,
    pub set_permission_set_props: UnusedSlot,
    pub define_pinvoke_map: UnusedSlot,
    pub set_pinvoke_map: UnusedSlot,
    pub delete_pinvoke_map: UnusedSlot,
    pub define_custom_attribute: UnusedSlot,
    pub set_custom_attribute_value: UnusedSlot,
    pub define_field: UnusedSlot,
    pub define_property: UnusedSlot,
    pub define_param: UnusedSlot,
    pub set_field_props: UnusedSlot,
    pub set_property_props: UnusedSlot,
    pub set_param_props: UnusedSlot,
    pub define_security_attribute_set: UnusedSlot,
    pub apply_edit_and_continue: UnusedSlot,
    pub translate_sig_with_scope: UnusedSlot,
    pub set_method_impl_flags: UnusedSlot,
    pub set_field_rva: UnusedSlot,
    pub merge: UnusedSlot,
    pub merge_end: UnusedSlot,
}

/// Positional function table of `IMethodMalloc`.
#[repr(C)]
pub struct IMethodMallocVtbl {
    pub query_interface:
        unsafe extern "system" fn(*mut c_void, *const Guid, *mut *mut c_void) -> Hresult,
    pub add_ref: unsafe extern "system" fn(*mut c_void) -> u32,
    pub release: unsafe extern "system" fn(*mut c_void) -> u32,
    pub alloc: unsafe extern "system" fn(*mut c_void, u32) -> *mut u8,
}

/// Read-only metadata view of one module; released on drop.
pub struct MetaDataImport {
    raw: *mut c_void,
}

/// Properties of one type reference.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TypeRefProps {
    /// Resolution-scope token the reference hangs off.
    pub scope: Token,
    pub name: String,
}

/// Properties of one method definition.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct MethodProps {
    pub name: String,
    pub attrs: u32,
    pub code_rva: u32,
    pub impl_flags: u32,
}

impl MethodProps {
    /// A method the rewriter can instrument: it has a body and is neither
    /// abstract nor a foreign-function stub.
    pub fn is_injectable(&self) -> bool {
        self.code_rva != 0 && self.attrs & MD_ABSTRACT == 0 && self.impl_flags & MI_UNMANAGED == 0
    }
}

impl MetaDataImport {
    /// Wraps an owned interface pointer.
    ///
    /// # Safety
    ///
    /// `raw` must be a live `IMetaDataImport` pointer whose sole owner
    /// becomes this wrapper.
    pub unsafe fn from_raw(raw: *mut c_void) -> Option<Self> {
        (!raw.is_null()).then_some(MetaDataImport { raw })
    }

    fn vtbl(&self) -> &IMetaDataImportVtbl {
        unsafe { &**(self.raw as *mut *const IMetaDataImportVtbl) }
    }

    /// Paged cursor over the TypeDef table.
    pub fn type_defs(&self) -> TokenCursor<'_> {
        TokenCursor::new(self, CursorKind::TypeDefs)
    }

    /// Paged cursor over the TypeRef table.
    pub fn type_refs(&self) -> TokenCursor<'_> {
        TokenCursor::new(self, CursorKind::TypeRefs)
    }

    /// Paged cursor over the methods of one type definition.
    pub fn methods(&self, type_def: Token) -> TokenCursor<'_> {
        TokenCursor::new(self, CursorKind::Methods(type_def.0))
    }

    /// Name and resolution scope of a type reference.
    pub fn type_ref_props(&self, type_ref: Token) -> error::Result<TypeRefProps> {
        let mut name = [0u16; 512];
        let mut len = 0u32;
        let mut scope = 0u32;
        check("GetTypeRefProps", unsafe {
            (self.vtbl().get_type_ref_props)(
                self.raw,
                type_ref.0,
                &mut scope,
                name.as_mut_ptr(),
                name.len() as u32,
                &mut len,
            )
        })?;
        Ok(TypeRefProps {
            scope: Token(scope),
            name: wstr::from_utf16_buf(&name),
        })
    }

    /// Name, attributes, code RVA and implementation flags of a method.
    pub fn method_props(&self, method: Token) -> error::Result<MethodProps> {
        let mut name = [0u16; 256];
        let mut len = 0u32;
        let mut attrs = 0u32;
        let mut code_rva = 0u32;
        let mut impl_flags = 0u32;
        check("GetMethodProps", unsafe {
            (self.vtbl().get_method_props)(
                self.raw,
                method.0,
                ptr::null_mut(),
                name.as_mut_ptr(),
                name.len() as u32,
                &mut len,
                &mut attrs,
                ptr::null_mut(),
                ptr::null_mut(),
                &mut code_rva,
                &mut impl_flags,
            )
        })?;
        Ok(MethodProps {
            name: wstr::from_utf16_buf(&name),
            attrs,
            code_rva,
            impl_flags,
        })
    }
}

impl Drop for MetaDataImport {
    fn drop(&mut self) {
        unsafe { release_unknown(self.raw) }
    }
}

enum CursorKind {
    TypeDefs,
    TypeRefs,
    Methods(MdToken),
}

/// Paged cursor over one of the import enumerators; the host enumeration
/// handle is closed on drop. A failing refill ends the iteration.
pub struct TokenCursor<'a> {
    import: &'a MetaDataImport,
    kind: CursorKind,
    handle: *mut c_void,
    page: [MdToken; ENUM_PAGE],
    len: usize,
    pos: usize,
    done: bool,
}

impl<'a> TokenCursor<'a> {
    fn new(import: &'a MetaDataImport, kind: CursorKind) -> Self {
        TokenCursor {
            import,
            kind,
            handle: ptr::null_mut(),
            page: [0; ENUM_PAGE],
            len: 0,
            pos: 0,
            done: false,
        }
    }

    fn refill(&mut self) -> bool {
        let vtbl = self.import.vtbl();
        let raw = self.import.raw;
        let mut count = 0u32;
        let hr = unsafe {
            match self.kind {
                CursorKind::TypeDefs => (vtbl.enum_type_defs)(
                    raw,
                    &mut self.handle,
                    self.page.as_mut_ptr(),
                    ENUM_PAGE as u32,
                    &mut count,
                ),
                CursorKind::TypeRefs => (vtbl.enum_type_refs)(
                    raw,
                    &mut self.handle,
                    self.page.as_mut_ptr(),
                    ENUM_PAGE as u32,
                    &mut count,
                ),
                CursorKind::Methods(type_def) => (vtbl.enum_methods)(
                    raw,
                    &mut self.handle,
                    type_def,
                    self.page.as_mut_ptr(),
                    ENUM_PAGE as u32,
                    &mut count,
                ),
            }
        };
        if hr != S_OK || count == 0 {
            self.done = true;
            return false;
        }
        self.len = count as usize;
        self.pos = 0;
        true
    }
}

impl Iterator for TokenCursor<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            if self.pos < self.len {
                let token = self.page[self.pos];
                self.pos += 1;
                return Some(Token(token));
            }
            if self.done || !self.refill() {
                return None;
            }
        }
    }
}

impl FusedIterator for TokenCursor<'_> {}

impl Drop for TokenCursor<'_> {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe { (self.import.vtbl().close_enum)(self.import.raw, self.handle) }
        }
    }
}

/// Read/write metadata view of one module; released on drop.
pub struct MetaDataEmit {
    raw: *mut c_void,
}

impl MetaDataEmit {
    /// Wraps an owned interface pointer.
    ///
    /// # Safety
    ///
    /// `raw` must be a live `IMetaDataEmit` pointer whose sole owner
    /// becomes this wrapper.
    pub unsafe fn from_raw(raw: *mut c_void) -> Option<Self> {
        (!raw.is_null()).then_some(MetaDataEmit { raw })
    }

    fn vtbl(&self) -> &IMetaDataEmitVtbl {
        unsafe { &**(self.raw as *mut *const IMetaDataEmitVtbl) }
    }

    /// Defines a type reference under `scope`.
    pub fn define_type_ref_by_name(&self, scope: Token, name: &str) -> error::Result<Token> {
        let wide = wstr::to_utf16z(name);
        let mut token = 0u32;
        check("DefineTypeRefByName", unsafe {
            (self.vtbl().define_type_ref_by_name)(self.raw, scope.0, wide.as_ptr(), &mut token)
        })?;
        Ok(Token(token))
    }

    /// Defines a member reference on `parent` with a hand-built signature
    /// blob.
    pub fn define_member_ref(&self, parent: Token, name: &str, sig: &[u8]) -> error::Result<Token> {
        let wide = wstr::to_utf16z(name);
        let mut token = 0u32;
        check("DefineMemberRef", unsafe {
            (self.vtbl().define_member_ref)(
                self.raw,
                parent.0,
                wide.as_ptr(),
                sig.as_ptr(),
                sig.len() as u32,
                &mut token,
            )
        })?;
        Ok(Token(token))
    }

    /// Interns a 16-bit string literal; the length is in characters.
    pub fn define_user_string(&self, chars: &[u16]) -> error::Result<Token> {
        let mut token = 0u32;
        check("DefineUserString", unsafe {
            (self.vtbl().define_user_string)(
                self.raw,
                chars.as_ptr(),
                chars.len() as u32,
                &mut token,
            )
        })?;
        Ok(Token(token))
    }
}

impl Drop for MetaDataEmit {
    fn drop(&mut self) {
        unsafe { release_unknown(self.raw) }
    }
}

/// The per-module IL-body allocator; released on drop. Buffers it hands
/// out are never freed by the plug-in: a submitted buffer belongs to the
/// host, an abandoned one stays with the allocator.
pub struct MethodAlloc {
    raw: *mut c_void,
}

impl MethodAlloc {
    /// Wraps an owned interface pointer.
    ///
    /// # Safety
    ///
    /// `raw` must be a live `IMethodMalloc` pointer whose sole owner
    /// becomes this wrapper.
    pub unsafe fn from_raw(raw: *mut c_void) -> Option<Self> {
        (!raw.is_null()).then_some(MethodAlloc { raw })
    }

    fn vtbl(&self) -> &IMethodMallocVtbl {
        unsafe { &**(self.raw as *mut *const IMethodMallocVtbl) }
    }

    /// Obtains `size` bytes of module-bound body storage.
    pub fn alloc(&self, size: usize) -> error::Result<*mut u8> {
        let buf = unsafe { (self.vtbl().alloc)(self.raw, size as u32) };
        if buf.is_null() {
            return Err(Error::Host {
                call: "IMethodMalloc::Alloc",
                hr: E_OUTOFMEMORY,
            });
        }
        Ok(buf)
    }
}

impl Drop for MethodAlloc {
    fn drop(&mut self) {
        unsafe { release_unknown(self.raw) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_vtable_slot_offsets() {
        let word = core::mem::size_of::<usize>();
        assert_eq!(core::mem::offset_of!(IMetaDataImportVtbl, close_enum), 3 * word);
        assert_eq!(
            core::mem::offset_of!(IMetaDataImportVtbl, enum_type_defs),
            6 * word
        );
        assert_eq!(
            core::mem::offset_of!(IMetaDataImportVtbl, enum_type_refs),
            8 * word
        );
        assert_eq!(
            core::mem::offset_of!(IMetaDataImportVtbl, get_type_ref_props),
            14 * word
        );
        assert_eq!(
            core::mem::offset_of!(IMetaDataImportVtbl, enum_methods),
            18 * word
        );
        assert_eq!(
            core::mem::offset_of!(IMetaDataImportVtbl, get_method_props),
            30 * word
        );
        assert_eq!(
            core::mem::offset_of!(IMetaDataImportVtbl, find_type_ref),
            55 * word
        );
        assert_eq!(core::mem::size_of::<IMetaDataImportVtbl>(), 65 * word);
    }

    #[test]
    fn emit_vtable_slot_offsets() {
        let word = core::mem::size_of::<usize>();
        assert_eq!(
            core::mem::offset_of!(IMetaDataEmitVtbl, define_type_ref_by_name),
            12 * word
        );
        assert_eq!(
            core::mem::offset_of!(IMetaDataEmitVtbl, define_member_ref),
            14 * word
        );
        assert_eq!(
            core::mem::offset_of!(IMetaDataEmitVtbl, define_user_string),
            28 * word
        );
        assert_eq!(core::mem::size_of::<IMetaDataEmitVtbl>(), 52 * word);
    }

    #[test]
    fn method_alloc_slot_offset() {
        let word = core::mem::size_of::<usize>();
        assert_eq!(core::mem::offset_of!(IMethodMallocVtbl, alloc), 3 * word);
    }

    #[test]
    fn injectability_filter() {
        let mut props = MethodProps {
            name: "Main".into(),
            attrs: 0,
            code_rva: 0x2050,
            impl_flags: 0,
        };
        assert!(props.is_injectable());
        props.code_rva = 0;
        assert!(!props.is_injectable());
        props.code_rva = 0x2050;
        props.attrs = MD_ABSTRACT;
        assert!(!props.is_injectable());
        props.attrs = 0;
        props.impl_flags = MI_UNMANAGED;
        assert!(!props.is_injectable());
    }
}
