//! Process-wide session state.
//!
//! Every field is written by at most one thread, at the transition that
//! initialises it: the host-info pointer at Initialize, the corelib and
//! target module ids at their first sighting, the token set once when a
//! target is armed. Readers race with those writes but gate on the
//! published target module before trusting the token set, so stale reads
//! are harmless. There are no locks; all synchronisation is atomic.

use core::ffi::c_void;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, AtomicU32, AtomicUsize, Ordering};

use once_cell::sync::OnceCell;

use crate::com::ModuleId;
use crate::com::info::ProfilerInfo;
use crate::metadata::PreparedTokens;

/// Lifecycle phase. Advances monotonically; Injected is terminal until
/// Shutdown.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    Initialized = 1,
    TargetArmed = 2,
    Injected = 3,
    Shutdown = 4,
}

impl Phase {
    fn from_u8(raw: u8) -> Phase {
        match raw {
            1 => Phase::Initialized,
            2 => Phase::TargetArmed,
            3 => Phase::Injected,
            4 => Phase::Shutdown,
            _ => Phase::Idle,
        }
    }
}

pub struct Session {
    phase: AtomicU8,
    info: AtomicPtr<c_void>,
    corelib_module: AtomicUsize,
    target_module: AtomicUsize,
    tokens: OnceCell<PreparedTokens>,
    rewrite_claimed: AtomicBool,
    modules_seen: AtomicU32,
    jit_seen: AtomicU32,
}

/// The process singleton.
pub static SESSION: Session = Session::new();

impl Session {
    pub const fn new() -> Self {
        Session {
            phase: AtomicU8::new(Phase::Idle as u8),
            info: AtomicPtr::new(ptr::null_mut()),
            corelib_module: AtomicUsize::new(0),
            target_module: AtomicUsize::new(0),
            tokens: OnceCell::new(),
            rewrite_claimed: AtomicBool::new(false),
            modules_seen: AtomicU32::new(0),
            jit_seen: AtomicU32::new(0),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn advance(&self, from: Phase, to: Phase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Idle -> Initialized, publishing the host-info capability.
    pub fn begin(&self, info: *mut c_void) -> bool {
        if !self.advance(Phase::Idle, Phase::Initialized) {
            return false;
        }
        self.info.store(info, Ordering::Release);
        true
    }

    pub fn info(&self) -> Option<ProfilerInfo> {
        unsafe { ProfilerInfo::from_raw(self.info.load(Ordering::Acquire)) }
    }

    /// Records the corelib module id; the first sighting wins.
    pub fn note_corelib(&self, module: ModuleId) -> bool {
        self.corelib_module
            .compare_exchange(0, module, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn corelib_module(&self) -> ModuleId {
        self.corelib_module.load(Ordering::Acquire)
    }

    /// Publishes the prepared tokens and the chosen target. Exactly one
    /// caller wins; racing candidates beyond it are no-ops.
    pub fn try_arm(&self, module: ModuleId, tokens: PreparedTokens) -> bool {
        debug_assert!(tokens.is_complete());
        if self.tokens.set(tokens).is_err() {
            return false;
        }
        self.target_module.store(module, Ordering::Release);
        self.advance(Phase::Initialized, Phase::TargetArmed);
        true
    }

    pub fn is_armed(&self) -> bool {
        self.target_module.load(Ordering::Acquire) != 0
    }

    pub fn target_module(&self) -> ModuleId {
        self.target_module.load(Ordering::Acquire)
    }

    /// The token set, if `module` is the armed target.
    pub fn target(&self, module: ModuleId) -> Option<PreparedTokens> {
        if self.target_module.load(Ordering::Acquire) != module {
            return None;
        }
        self.tokens.get().copied()
    }

    /// One-shot claim on the rewrite. Never granted again once injected;
    /// otherwise granted to exactly one caller at a time.
    pub fn claim_rewrite(&self) -> bool {
        if self.phase() == Phase::Injected {
            return false;
        }
        self.rewrite_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns the claim after an in-progress rewrite reported failure.
    pub fn release_rewrite(&self) {
        self.rewrite_claimed.store(false, Ordering::Release);
    }

    /// Marks the single successful rewrite. The claim is kept forever, so
    /// no later caller can obtain it.
    pub fn mark_injected(&self) {
        self.advance(Phase::TargetArmed, Phase::Injected);
    }

    pub fn is_injected(&self) -> bool {
        self.phase() == Phase::Injected
    }

    /// Terminal; only the log teardown follows.
    pub fn end(&self) {
        self.phase.store(Phase::Shutdown as u8, Ordering::SeqCst);
    }

    /// Ordinal of a module-load event, for log throttling.
    pub fn next_module_ordinal(&self) -> u32 {
        self.modules_seen.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Ordinal of a JIT event, for log throttling.
    pub fn next_jit_ordinal(&self) -> u32 {
        self.jit_seen.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Token;

    fn armed_tokens() -> PreparedTokens {
        PreparedTokens {
            load_from: Token(0x0A00_0001),
            create_instance: Token(0x0A00_0002),
            exception: Token(0x0100_0003),
            payload_path: Token(0x7000_0004),
            entry_type: Token(0x7000_0005),
        }
    }

    #[test]
    fn phases_advance_in_order() {
        let s = Session::new();
        assert_eq!(s.phase(), Phase::Idle);
        assert!(s.begin(core::ptr::dangling_mut()));
        assert_eq!(s.phase(), Phase::Initialized);
        // A second Initialize is refused.
        assert!(!s.begin(core::ptr::dangling_mut()));
        assert!(s.try_arm(0x1000, armed_tokens()));
        assert_eq!(s.phase(), Phase::TargetArmed);
        s.mark_injected();
        assert_eq!(s.phase(), Phase::Injected);
        s.end();
        assert_eq!(s.phase(), Phase::Shutdown);
    }

    #[test]
    fn first_arming_wins() {
        let s = Session::new();
        s.begin(core::ptr::dangling_mut());
        assert!(s.try_arm(0x1000, armed_tokens()));
        assert!(!s.try_arm(0x2000, armed_tokens()));
        assert_eq!(s.target_module(), 0x1000);
        assert_eq!(s.target(0x1000), Some(armed_tokens()));
        assert_eq!(s.target(0x2000), None);
    }

    #[test]
    fn corelib_is_recorded_once() {
        let s = Session::new();
        assert!(s.note_corelib(0xAAAA));
        assert!(!s.note_corelib(0xBBBB));
        assert_eq!(s.corelib_module(), 0xAAAA);
    }

    #[test]
    fn rewrite_claim_is_one_shot_until_released() {
        let s = Session::new();
        s.begin(core::ptr::dangling_mut());
        s.try_arm(0x1000, armed_tokens());
        assert!(s.claim_rewrite());
        assert!(!s.claim_rewrite());
        s.release_rewrite();
        assert!(s.claim_rewrite());
        // The successful rewrite keeps the claim forever.
        s.mark_injected();
        assert!(!s.claim_rewrite());
    }

    #[test]
    fn tokens_are_gated_on_the_target_module() {
        let s = Session::new();
        assert_eq!(s.target(0x1000), None);
        assert!(!s.is_armed());
        s.begin(core::ptr::dangling_mut());
        s.try_arm(0x1000, armed_tokens());
        assert!(s.is_armed());
        assert!(s.target(0x1000).is_some_and(|t| t.is_complete()));
    }
}
