//! Install-layout resolution and the process identity guard.
//!
//! The payload assembly and the event log live side by side under the
//! user's local data directory; both paths are resolved once and cached
//! for the life of the process.

use std::env;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

/// Basename of the only process the plug-in stays attached to.
pub const TARGET_PROCESS: &str = "Root";
/// File name of the managed payload assembly.
pub const PAYLOAD_FILE: &str = "UprootedHook.dll";
/// Fully-qualified name of the payload's entry type.
pub const ENTRY_TYPE: &str = "UprootedHook.Entry";
/// File name of the append-only event log, next to the payload.
pub const LOG_FILE: &str = "profiler.log";

struct InstallPaths {
    payload: PathBuf,
    log: PathBuf,
}

static PATHS: Lazy<InstallPaths> = Lazy::new(resolve);

#[cfg(unix)]
fn resolve() -> InstallPaths {
    let home = env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    let dir = home.join(".local/share/uprooted");
    InstallPaths {
        payload: dir.join(PAYLOAD_FILE),
        log: dir.join(LOG_FILE),
    }
}

#[cfg(not(unix))]
fn resolve() -> InstallPaths {
    match env::var_os("LOCALAPPDATA") {
        Some(base) => {
            let dir = PathBuf::from(base).join("Root").join("uprooted");
            InstallPaths {
                payload: dir.join(PAYLOAD_FILE),
                log: dir.join(LOG_FILE),
            }
        }
        None => InstallPaths {
            payload: PathBuf::from("C:\\").join(PAYLOAD_FILE),
            log: PathBuf::from("C:\\").join(LOG_FILE),
        },
    }
}

/// Absolute path of the payload assembly.
pub fn payload() -> &'static Path {
    &PATHS.payload
}

/// Absolute path of the event log.
pub fn log_file() -> &'static Path {
    &PATHS.log
}

/// UTF-16 form of the payload path, as stored into the user-string heap.
pub fn payload_utf16() -> Vec<u16> {
    crate::wstr::to_utf16(&PATHS.payload.to_string_lossy())
}

/// Whether `exe` names the target process.
///
/// An exact basename match always wins; beyond that the guard tolerates a
/// trailing `.exe`, case differences, a basename that merely starts with
/// the target (AppImage launchers decorate it), and an `APPIMAGE` value
/// whose basename contains the target.
pub fn identity_matches(exe: &str, appimage: Option<&str>) -> bool {
    let base = exe.strip_suffix(".exe").unwrap_or(exe);
    if base.eq_ignore_ascii_case(TARGET_PROCESS) {
        return true;
    }
    if base
        .get(..TARGET_PROCESS.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(TARGET_PROCESS))
    {
        return true;
    }
    appimage
        .and_then(|v| Path::new(v).file_name())
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|n| n.contains(&TARGET_PROCESS.to_ascii_lowercase()))
}

/// Resolves the running executable and applies [`identity_matches`].
pub fn process_is_target() -> bool {
    let Ok(exe) = env::current_exe() else {
        return false;
    };
    let Some(name) = exe.file_name() else {
        return false;
    };
    let appimage = env::var("APPIMAGE").ok();
    identity_matches(&name.to_string_lossy(), appimage.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_case_insensitive_basenames_match() {
        assert!(identity_matches("Root", None));
        assert!(identity_matches("root", None));
        assert!(identity_matches("Root.exe", None));
        assert!(identity_matches("ROOT.EXE", None));
    }

    #[test]
    fn prefixed_basenames_match() {
        assert!(identity_matches("Root.AppImage", None));
        assert!(identity_matches("root-1.4.2", None));
    }

    #[test]
    fn foreign_processes_are_refused() {
        assert!(!identity_matches("dotnet", None));
        assert!(!identity_matches("Roo", None));
        assert!(!identity_matches("TapRoot", None));
    }

    #[test]
    fn appimage_variable_rescues_a_renamed_launcher() {
        assert!(identity_matches(
            "AppRun",
            Some("/home/u/Applications/Root-x86_64.AppImage")
        ));
        assert!(!identity_matches(
            "AppRun",
            Some("/home/u/Applications/Other.AppImage")
        ));
    }

    #[test]
    fn payload_and_log_share_a_directory() {
        assert_eq!(payload().parent(), log_file().parent());
        assert!(payload().ends_with("UprootedHook.dll"));
        assert!(log_file().ends_with("profiler.log"));
    }
}
