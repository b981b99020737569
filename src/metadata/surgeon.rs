//! Metadata surgery over a candidate module: find or create the token set
//! the injected prologue needs.

use log::debug;

use crate::com::ModuleId;
use crate::com::info::ProfilerInfo;
use crate::com::metadata_api::MetaDataImport;
use crate::error::{self, Error};
use crate::paths;
use crate::wstr;

use super::{CREATE_INSTANCE_SIG, PreparedTokens, Token, load_from_sig};

/// Type whose presence in the type-reference table marks a module as able
/// to host the injected call site; its resolution scope becomes the
/// anchor for every synthetic reference.
pub const ROOT_OBJECT_TYPE: &str = "System.Object";
/// Reflection type carrying the load and instantiate entry points.
pub const ASSEMBLY_TYPE: &str = "System.Reflection.Assembly";
/// Root exception type caught around the prologue.
pub const EXCEPTION_TYPE: &str = "System.Exception";

/// Builds the prepared token set for `module`.
///
/// A module with no `System.Object` type reference is either the
/// single-file host shim or a resource-only module; it cannot resolve the
/// prologue's references and is refused with [`Error::NotATarget`].
/// Failure at any later step surfaces the same way: nothing partial is
/// ever returned, and both metadata handles are released on every exit.
pub fn prepare_target_module(
    info: &ProfilerInfo,
    module: ModuleId,
) -> error::Result<PreparedTokens> {
    let import = info
        .metadata_import(module)
        .map_err(|err| Error::NotATarget(err.to_string()))?;
    log_type_ref_census(&import);

    let (_, runtime_scope) = find_type_ref(&import, ROOT_OBJECT_TYPE)
        .ok_or_else(|| Error::NotATarget(format!("no {ROOT_OBJECT_TYPE} type reference")))?;
    debug!("  runtime scope {runtime_scope}");

    let emit = info
        .metadata_emit(module)
        .map_err(|err| Error::NotATarget(err.to_string()))?;

    let assembly = match find_type_ref(&import, ASSEMBLY_TYPE) {
        Some((token, _)) => token,
        None => emit.define_type_ref_by_name(runtime_scope, ASSEMBLY_TYPE)?,
    };
    debug!("  {ASSEMBLY_TYPE} -> {assembly}");

    let load_from = emit.define_member_ref(assembly, "LoadFrom", &load_from_sig(assembly))?;
    let create_instance = emit.define_member_ref(assembly, "CreateInstance", &CREATE_INSTANCE_SIG)?;

    let exception = match find_type_ref(&import, EXCEPTION_TYPE) {
        Some((token, _)) => token,
        None => emit.define_type_ref_by_name(runtime_scope, EXCEPTION_TYPE)?,
    };

    let payload_path = emit.define_user_string(&paths::payload_utf16())?;
    let entry_type = emit.define_user_string(&wstr::to_utf16(paths::ENTRY_TYPE))?;

    let tokens = PreparedTokens {
        load_from,
        create_instance,
        exception,
        payload_path,
        entry_type,
    };
    debug!(
        "  tokens ready: LoadFrom={load_from} CreateInstance={create_instance} \
         Exception={exception} path={payload_path} entry={entry_type}"
    );
    Ok(tokens)
}

/// First type reference named `name`, with its resolution scope.
/// References whose properties cannot be read are skipped.
fn find_type_ref(import: &MetaDataImport, name: &str) -> Option<(Token, Token)> {
    import.type_refs().find_map(|type_ref| {
        let props = import.type_ref_props(type_ref).ok()?;
        (props.name == name).then_some((type_ref, props.scope))
    })
}

fn log_type_ref_census(import: &MetaDataImport) {
    let mut total = 0usize;
    for (i, type_ref) in import.type_refs().enumerate() {
        total += 1;
        if i < 5 {
            if let Ok(props) = import.type_ref_props(type_ref) {
                debug!("    type ref {type_ref}: scope={} {}", props.scope, props.name);
            }
        }
    }
    debug!("  total type refs: {total}");
}
