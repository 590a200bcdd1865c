//! Logging infrastructure
//!
//! Every event goes to two places: a colored console line prefixed with the
//! emitting component, and a plain line appended to the service log inside
//! the output root. The service log writer re-opens the file for each event,
//! so the cleanup engine may replace it at any time.

use owo_colors::{OwoColorize, Style};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{
    format::{FormatEvent, FormatFields, Writer},
    FmtContext, MakeWriter,
};
use tracing_subscriber::registry::LookupSpan;

/// Component identifier for prefixing logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Service,
    Session,
    Rotate,
    Cleanup,
    Capture,
}

impl Component {
    /// Map an event target (module path) to its component
    pub fn from_target(target: &str) -> Self {
        if target.starts_with("nvrec_storage") {
            Component::Cleanup
        } else if target.starts_with("nvrec_capture") {
            Component::Capture
        } else if target.starts_with("nvrec_core::session") || target.starts_with("nvrec_core::target") {
            Component::Session
        } else if target.starts_with("nvrec_core::scheduler") {
            Component::Rotate
        } else {
            Component::Service
        }
    }

    /// Get the string representation for logging prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Service => "SERVICE",
            Component::Session => "SESSION",
            Component::Rotate => "ROTATE",
            Component::Cleanup => "CLEANUP",
            Component::Capture => "CAPTURE",
        }
    }

    /// Get the color style for this component
    pub fn color_style(&self) -> Style {
        match self {
            Component::Service => Style::new().cyan().bold(),
            Component::Session => Style::new().green().bold(),
            Component::Rotate => Style::new().yellow().bold(),
            Component::Cleanup => Style::new().magenta().bold(),
            Component::Capture => Style::new().blue().bold(),
        }
    }
}

/// Event formatter shared by the console and service-log layers
pub struct ServiceFormatter {
    /// Colored console layout when true, plain file layout otherwise
    pub ansi: bool,
}

impl<S, N> FormatEvent<S, N> for ServiceFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let component = Component::from_target(metadata.target());
        let level = *metadata.level();
        let now = chrono::Local::now();

        if self.ansi {
            write!(writer, "{} ", now.format("%H:%M:%S").dimmed())?;

            let prefix = format!("[{:8}]", component.as_str());
            write!(writer, "{} ", prefix.style(component.color_style()))?;

            match level {
                Level::ERROR => write!(writer, "{} ", "ERROR".red().bold())?,
                Level::WARN => write!(writer, "{} ", "WARN ".yellow().bold())?,
                Level::INFO => write!(writer, "{} ", "INFO ".green().bold())?,
                Level::DEBUG => write!(writer, "{} ", "DEBUG".blue().bold())?,
                Level::TRACE => write!(writer, "{} ", "TRACE".dimmed().bold())?,
            }
        } else {
            write!(
                writer,
                "[{}] {:5} [{}] ",
                now.format("%Y-%m-%d %H:%M:%S"),
                level,
                component.as_str()
            )?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Append-only service log, opened per event
#[derive(Debug, Clone)]
pub struct ServiceLogFile {
    path: PathBuf,
}

impl ServiceLogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Writer for one event; drops output if the log cannot be opened
pub struct ServiceLogWriter {
    file: Option<File>,
}

impl Write for ServiceLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for ServiceLogFile {
    type Writer = ServiceLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .ok();
        ServiceLogWriter { file }
    }
}

/// Create the folder holding the service log so no early line is dropped
pub fn prepare_service_log(path: &Path) -> anyhow::Result<ServiceLogFile> {
    use anyhow::Context;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log folder {:?}", parent))?;
    }
    Ok(ServiceLogFile::new(path))
}

/// Initialize console output, plus the service log when `log_file` is given.
///
/// `RUST_LOG` takes precedence over `level`. Should be called once per process.
pub fn init_logging(level: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let console_layer = tracing_subscriber::fmt::layer()
        .event_format(ServiceFormatter { ansi: true })
        .with_writer(io::stdout);

    let file_layer = log_file.map(prepare_service_log).transpose()?.map(|writer| {
        tracing_subscriber::fmt::layer()
            .event_format(ServiceFormatter { ansi: false })
            .with_ansi(false)
            .with_writer(writer)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_from_target() {
        assert_eq!(Component::from_target("nvrec_storage::cleanup"), Component::Cleanup);
        assert_eq!(Component::from_target("nvrec_capture::handle"), Component::Capture);
        assert_eq!(Component::from_target("nvrec_core::session"), Component::Session);
        assert_eq!(Component::from_target("nvrec_core::target"), Component::Session);
        assert_eq!(Component::from_target("nvrec_core::scheduler"), Component::Rotate);
        assert_eq!(Component::from_target("nvrec_core::service"), Component::Service);
        assert_eq!(Component::from_target("nvrec"), Component::Service);
    }

    #[test]
    fn test_service_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = ServiceLogFile::new(dir.path().join("service.log"));

        log.make_writer().write_all(b"first\n").unwrap();
        log.make_writer().write_all(b"second\n").unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_service_log_recreated_after_delete() {
        let dir = tempfile::tempdir().unwrap();
        let log = ServiceLogFile::new(dir.path().join("service.log"));
        log.make_writer().write_all(b"old\n").unwrap();

        std::fs::remove_file(log.path()).unwrap();
        log.make_writer().write_all(b"new\n").unwrap();

        assert_eq!(std::fs::read_to_string(log.path()).unwrap(), "new\n");
    }

    #[test]
    fn test_prepare_creates_missing_output_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("recordings").join("site-a");

        let log = prepare_service_log(&root.join("service.log")).unwrap();
        assert!(root.is_dir());

        log.make_writer().write_all(b"starting\n").unwrap();
        assert_eq!(std::fs::read_to_string(log.path()).unwrap(), "starting\n");
    }

    #[test]
    fn test_prepare_fails_when_root_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        assert!(prepare_service_log(&blocker.join("service.log")).is_err());
    }

    #[test]
    fn test_unwritable_log_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let log = ServiceLogFile::new(dir.path().join("missing").join("service.log"));

        let mut writer = log.make_writer();
        assert!(writer.file.is_none());
        assert_eq!(writer.write(b"dropped").unwrap(), 7);
    }
}
