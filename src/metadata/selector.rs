//! Injection-point selection inside the armed target module.

use log::{debug, info};

use crate::com::ModuleId;
use crate::com::info::ProfilerInfo;
use crate::error::{self, Error};
use crate::il::rewriter;
use crate::session::SESSION;

use super::{PreparedTokens, Token};

/// Walks the target module's type definitions and their methods in
/// enumeration order and rewrites the first injectable candidate.
///
/// Each attempt holds the session's one-shot rewrite claim; a failing
/// candidate returns the claim and the scan continues, so the first
/// *successful* rewrite wins, not the first candidate. The enumeration
/// order is host-defined and treated as opaque.
pub fn select_and_inject(
    info: &ProfilerInfo,
    module: ModuleId,
    tokens: PreparedTokens,
) -> error::Result<Token> {
    let import = info.metadata_import(module)?;
    for type_def in import.type_defs() {
        for method in import.methods(type_def) {
            let props = match import.method_props(method) {
                Ok(props) => props,
                Err(_) => continue,
            };
            if !props.is_injectable() {
                continue;
            }
            if !SESSION.claim_rewrite() {
                return Err(Error::Unsupported("rewrite already claimed".into()));
            }
            info!(
                "injecting into method {method}: {} (rva={:#x})",
                props.name, props.code_rva
            );
            match rewriter::inject(info, module, method, tokens) {
                Ok(()) => {
                    SESSION.mark_injected();
                    return Ok(method);
                }
                Err(err) => {
                    SESSION.release_rewrite();
                    debug!("method {method} not rewritable: {err}");
                }
            }
        }
    }
    Err(Error::Unsupported(
        "no suitable method in target module".into(),
    ))
}
