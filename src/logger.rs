//! Append-only event log behind the `log` facade.
//!
//! The host process carries no logging of its own, so the plug-in installs
//! a process-static sink that writes one line per event with a local-time
//! millisecond timestamp and flushes per record. The file is opened lazily
//! on the first record and closed at Shutdown.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::sync::{Mutex, Once};

use log::{LevelFilter, Log, Metadata, Record};

use crate::paths;

struct FileSink {
    file: Mutex<Option<File>>,
}

static SINK: FileSink = FileSink {
    file: Mutex::new(None),
};
static INSTALL: Once = Once::new();

/// Installs the sink; later calls are no-ops. Called from every exported
/// entry point so whichever one the host resolves first wins.
pub fn init() {
    INSTALL.call_once(|| {
        let _ = log::set_logger(&SINK);
        log::set_max_level(LevelFilter::Debug);
    });
}

/// Flushes and closes the log file.
pub fn close() {
    if let Ok(mut slot) = SINK.file.lock() {
        if let Some(mut file) = slot.take() {
            let _ = file.flush();
        }
    }
}

fn open_log() -> Option<File> {
    let path = paths::log_file();
    if let Some(dir) = path.parent() {
        let _ = fs::create_dir_all(dir);
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}

impl Log for FileSink {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::Level::Debug
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Ok(mut slot) = self.file.lock() else {
            return;
        };
        if slot.is_none() {
            *slot = open_log();
        }
        if let Some(file) = slot.as_mut() {
            let (h, m, s, ms) = clock::local_hms_millis();
            let _ = writeln!(file, "[{h:02}:{m:02}:{s:02}.{ms:03}] {}", record.args());
            let _ = file.flush();
        }
    }

    fn flush(&self) {
        if let Ok(mut slot) = self.file.lock() {
            if let Some(file) = slot.as_mut() {
                let _ = file.flush();
            }
        }
    }
}

mod clock {
    /// Wall-clock time of day, millisecond precision.
    #[cfg(unix)]
    pub fn local_hms_millis() -> (u32, u32, u32, u32) {
        unsafe {
            let mut tv = libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            };
            libc::gettimeofday(&mut tv, core::ptr::null_mut());
            let mut tm = core::mem::zeroed::<libc::tm>();
            libc::localtime_r(&tv.tv_sec, &mut tm);
            (
                tm.tm_hour as u32,
                tm.tm_min as u32,
                tm.tm_sec as u32,
                (tv.tv_usec / 1000) as u32,
            )
        }
    }

    /// UTC fallback where no local-time source is bound.
    #[cfg(not(unix))]
    pub fn local_hms_millis() -> (u32, u32, u32, u32) {
        use std::time::{SystemTime, UNIX_EPOCH};
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let secs = now.as_secs();
        (
            ((secs / 3600) % 24) as u32,
            ((secs / 60) % 60) as u32,
            (secs % 60) as u32,
            now.subsec_millis(),
        )
    }

}
