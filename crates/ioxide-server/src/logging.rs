use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::project_dirs;

/// A log file already past this size is started over
const LOG_LIMIT: u64 = 1 << 20;

/// Filter directive for `-d` counts when `RUST_LOG` is not set
pub fn default_directive(debug: u8) -> &'static str {
    match debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// `<data dir>/logs/<component>.log`, creating the directory
fn log_path(component: &str) -> io::Result<PathBuf> {
    let dirs = project_dirs()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no data directory for ioxide"))?;
    let dir = dirs.data_dir().join("logs");
    fs::create_dir_all(&dir)?;
    Ok(dir.join(format!("{component}.log")))
}

/// Open `path` for appending, emptying it first if it has outgrown `LOG_LIMIT`
fn open_log(path: &Path) -> io::Result<File> {
    let oversized = fs::metadata(path).is_ok_and(|meta| meta.len() > LOG_LIMIT);
    OpenOptions::new()
        .create(true)
        .write(true)
        .append(!oversized)
        .truncate(oversized)
        .open(path)
}

/// Install the global subscriber: stderr always, plus the component's log
/// file when `file` is set. Keep the returned guard alive until exit or
/// buffered file output is lost.
pub fn init_logging(component: &str, debug: u8, file: bool) -> io::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    let (log_file, writer, guard) = if file {
        let path = log_path(component)?;
        let (writer, guard) = tracing_appender::non_blocking(open_log(&path)?);
        (Some(path), Some(writer), Some(guard))
    } else {
        (None, None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(writer.map(|writer| fmt::layer().with_writer(writer).with_ansi(false)))
        .try_init()
        .map_err(io::Error::other)?;

    if let Some(path) = log_file {
        info!("Writing log to {}", path.display());
    }
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_debug_levels() {
        assert_eq!(default_directive(0), "info");
        assert_eq!(default_directive(1), "debug");
        assert_eq!(default_directive(2), "trace");
        assert_eq!(default_directive(9), "trace");
    }

    #[test]
    fn test_open_log_appends_until_limit() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("small.log");
        let large = dir.path().join("large.log");
        fs::write(&small, b"kept").unwrap();
        fs::write(&large, vec![b'x'; LOG_LIMIT as usize + 1]).unwrap();

        write!(open_log(&small).unwrap(), " more").unwrap();
        write!(open_log(&large).unwrap(), "fresh").unwrap();
        write!(open_log(&dir.path().join("new.log")).unwrap(), "new").unwrap();

        assert_eq!(fs::read(&small).unwrap(), b"kept more");
        assert_eq!(fs::read(&large).unwrap(), b"fresh");
        assert_eq!(fs::read(dir.path().join("new.log")).unwrap(), b"new");
    }
}
