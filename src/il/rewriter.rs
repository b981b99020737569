//! The rewrite itself: fetch the original body, synthesize the guarded
//! replacement, obtain runtime-owned storage, submit.

use log::debug;

use crate::com::ModuleId;
use crate::com::info::ProfilerInfo;
use crate::error;
use crate::metadata::{PreparedTokens, Token};

use super::{FAT_HEADER_SIZE, MethodBody, PROLOGUE_SIZE, RewrittenBody};

/// Replaces `method`'s body with the prologue-guarded rewrite.
///
/// The original body is host-owned and read in place. The new body comes
/// from the module-bound allocator and becomes host property the instant
/// the submission succeeds; on any failure the buffer is abandoned to the
/// allocator, never freed or reused (the allocator exposes no free entry
/// point to profilers).
pub fn inject(
    info: &ProfilerInfo,
    module: ModuleId,
    method: Token,
    tokens: PreparedTokens,
) -> error::Result<()> {
    let original = info.il_function_body(module, method)?;
    let parsed = MethodBody::parse(original)?;
    debug!(
        "  original body: tiny={} max_stack={} code_size={:#x} locals={:#010x} more_sects={}",
        parsed.tiny,
        parsed.max_stack,
        parsed.code.len(),
        parsed.locals_sig,
        parsed.more_sects,
    );

    let body = RewrittenBody::plan(&parsed, tokens)?;
    let total = body.total_size();
    debug!(
        "  rewritten body: flags={:#06x} max_stack={} code_size={:#x} total={:#x}",
        body.header().flags,
        body.header().max_stack,
        body.header().code_size,
        total,
    );

    let allocator = info.il_body_allocator(module)?;
    let raw = allocator.alloc(total)?;
    let buf = unsafe { core::slice::from_raw_parts_mut(raw, total) };
    buf.fill(0);
    body.render_into(buf)?;
    debug!(
        "  prologue bytes: {:02X?}",
        &buf[FAT_HEADER_SIZE..FAT_HEADER_SIZE + PROLOGUE_SIZE]
    );

    info.set_il_function_body(module, method, raw)
}
