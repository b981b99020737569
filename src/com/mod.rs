//! The COM-shaped boundary shared with the host.
//!
//! The host calls positional function tables; the layout, not the
//! implementation language's own polymorphism, is the contract. This
//! module holds the 128-bit identities, the status codes, and the
//! identity triple every table starts with; [`callback`] and [`factory`]
//! are the two objects the plug-in exposes, [`info`] and [`metadata_api`]
//! the surfaces it consumes.

pub mod callback;
pub mod factory;
pub mod info;
pub mod metadata_api;

use core::ffi::c_void;
use core::fmt;

use crate::error;

/// Host result code.
pub type Hresult = i32;

pub const S_OK: Hresult = 0;
pub const S_FALSE: Hresult = 1;
pub const E_NOINTERFACE: Hresult = 0x8000_4002_u32 as Hresult;
pub const E_POINTER: Hresult = 0x8000_4003_u32 as Hresult;
pub const E_FAIL: Hresult = 0x8000_4005_u32 as Hresult;
pub const E_OUTOFMEMORY: Hresult = 0x8007_000E_u32 as Hresult;
pub const CLASS_E_NOAGGREGATION: Hresult = 0x8004_0110_u32 as Hresult;
pub const CLASS_E_CLASSNOTAVAILABLE: Hresult = 0x8004_0111_u32 as Hresult;

#[inline]
pub fn succeeded(hr: Hresult) -> bool {
    hr >= 0
}

/// Converts a host status into an [`error::Error::Host`] on failure.
pub fn check(call: &'static str, hr: Hresult) -> error::Result<()> {
    if succeeded(hr) {
        Ok(())
    } else {
        Err(error::Error::Host { call, hr })
    }
}

/// Opaque host identifier of a loaded managed module.
pub type ModuleId = usize;
/// Opaque host identifier of a managed function instance.
pub type FunctionId = usize;
/// Raw 32-bit metadata token at the boundary.
pub type MdToken = u32;

/// Metadata open-scope flag: read-only view.
pub const OF_READ: u32 = 0x0000_0000;
/// Metadata open-scope flag: read/write view.
pub const OF_WRITE: u32 = 0x0000_0001;

/// Event-mask bit: module-load notifications.
pub const COR_PRF_MONITOR_MODULE_LOADS: u32 = 0x0000_0004;
/// Event-mask bit: JIT-compilation notifications.
pub const COR_PRF_MONITOR_JIT_COMPILATION: u32 = 0x0000_0020;
/// Event-mask bit: disable every precompiled image, forcing all methods
/// through the JIT so body rewrites take effect.
pub const COR_PRF_DISABLE_ALL_NGEN_IMAGES: u32 = 0x0008_0000;

/// A 128-bit interface or class identity.
#[repr(C)]
#[derive(PartialEq, Eq, Copy, Clone)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Guid {
            data1,
            data2,
            data3,
            data4,
        }
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7],
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Class identity the host reads from its environment configuration.
pub const CLSID_UPROOTED_PROFILER: Guid = Guid::new(
    0xD1A6_F5A0,
    0x1234,
    0x4567,
    [0x89, 0xAB, 0xCD, 0xEF, 0x01, 0x23, 0x45, 0x67],
);

pub const IID_IUNKNOWN: Guid = Guid::new(
    0x0000_0000,
    0x0000,
    0x0000,
    [0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46],
);

pub const IID_ICLASS_FACTORY: Guid = Guid::new(
    0x0000_0001,
    0x0000,
    0x0000,
    [0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46],
);

/// Every shipped version of the profiler callback capability. An identity
/// query for any of them is answered with the same object.
pub const IID_ICOR_PROFILER_CALLBACK: [Guid; 11] = [
    Guid::new(
        0x176F_BED1,
        0xA55C,
        0x4796,
        [0x98, 0xCA, 0xA9, 0xDA, 0x0E, 0xF8, 0x83, 0xE7],
    ),
    Guid::new(
        0x8A8C_C829,
        0xCCF2,
        0x49FE,
        [0xBB, 0xAE, 0x0F, 0x02, 0x22, 0x28, 0x07, 0x1A],
    ),
    Guid::new(
        0x4FD2_ED52,
        0x7731,
        0x4B8D,
        [0x94, 0x69, 0x03, 0xD2, 0xCC, 0x30, 0x86, 0xC5],
    ),
    Guid::new(
        0x7B63_B2E3,
        0x107D,
        0x4D48,
        [0xB2, 0xF6, 0xF6, 0x1E, 0x22, 0x94, 0x70, 0xD2],
    ),
    Guid::new(
        0x8DFB_A405,
        0x8C9F,
        0x45F8,
        [0xBF, 0xFA, 0x83, 0xB1, 0x4C, 0xEF, 0x78, 0xB5],
    ),
    Guid::new(
        0xFC13_DF4B,
        0x4448,
        0x4F4F,
        [0x95, 0x0C, 0xBA, 0x8D, 0x19, 0xD0, 0x0C, 0x36],
    ),
    Guid::new(
        0xF76A_2DBA,
        0x1D52,
        0x4539,
        [0x86, 0x6C, 0x2A, 0xA5, 0x18, 0xF9, 0xEF, 0xC3],
    ),
    Guid::new(
        0x5BED_9B15,
        0xC079,
        0x4D47,
        [0xBF, 0xE2, 0x21, 0x5A, 0x14, 0x0C, 0x07, 0xE0],
    ),
    Guid::new(
        0x2758_3EC3,
        0xC8F5,
        0x482F,
        [0x80, 0x52, 0x19, 0x4B, 0x8C, 0xE4, 0x70, 0x5A],
    ),
    Guid::new(
        0xCEC5_B60E,
        0xC69C,
        0x495F,
        [0x87, 0xF6, 0x84, 0xD2, 0x8E, 0xE1, 0x6F, 0xFB],
    ),
    Guid::new(
        0x4235_0846,
        0xAAED,
        0x47F7,
        [0xB1, 0x28, 0xFD, 0x0C, 0x98, 0x88, 0x1C, 0xDE],
    ),
];

pub const IID_ICOR_PROFILER_INFO: Guid = Guid::new(
    0x28B5_557D,
    0x3F3F,
    0x48B4,
    [0x90, 0xB2, 0x5F, 0x9E, 0xEA, 0x2F, 0x6C, 0x48],
);

pub const IID_IMETADATA_IMPORT: Guid = Guid::new(
    0x7DAC_8207,
    0xD3AE,
    0x4C75,
    [0x9B, 0x67, 0x92, 0x80, 0x1A, 0x49, 0x7D, 0x44],
);

pub const IID_IMETADATA_EMIT: Guid = Guid::new(
    0xBA3F_EE4C,
    0xECB9,
    0x4E41,
    [0x83, 0xB7, 0x18, 0x3F, 0xA4, 0x1C, 0xD8, 0x59],
);

/// A positional slot the plug-in declares but never calls.
pub type UnusedSlot = *const c_void;

/// The identity triple at the head of every host table.
#[repr(C)]
pub struct IUnknownVtbl {
    pub query_interface:
        unsafe extern "system" fn(*mut c_void, *const Guid, *mut *mut c_void) -> Hresult,
    pub add_ref: unsafe extern "system" fn(*mut c_void) -> u32,
    pub release: unsafe extern "system" fn(*mut c_void) -> u32,
}

/// Calls Release through an arbitrary interface pointer's identity triple.
pub(crate) unsafe fn release_unknown(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        let vtbl = *(ptr as *mut *const IUnknownVtbl);
        ((*vtbl).release)(ptr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_formats_in_registry_style() {
        assert_eq!(
            CLSID_UPROOTED_PROFILER.to_string(),
            "{D1A6F5A0-1234-4567-89AB-CDEF01234567}"
        );
    }

    #[test]
    fn guid_layout_is_sixteen_bytes() {
        assert_eq!(core::mem::size_of::<Guid>(), 16);
    }

    #[test]
    fn callback_identities_are_distinct() {
        for (i, a) in IID_ICOR_PROFILER_CALLBACK.iter().enumerate() {
            for b in &IID_ICOR_PROFILER_CALLBACK[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn failure_codes_are_negative() {
        assert!(!succeeded(E_FAIL));
        assert!(!succeeded(E_NOINTERFACE));
        assert!(!succeeded(CLASS_E_CLASSNOTAVAILABLE));
        assert!(succeeded(S_OK));
        assert!(succeeded(S_FALSE));
        assert!(check("SetEventMask", E_FAIL).is_err());
    }
}
