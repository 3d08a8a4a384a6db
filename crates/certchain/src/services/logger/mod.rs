use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use rotation::Rotation;
use time::OffsetDateTime;
use tracing_subscriber::fmt::MakeWriter;

use crate::config::Logging;

mod rotation;

/// Destination of formatted log lines
enum LogWriter {
    Stderr(io::Stderr),
    File(File),
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogWriter::Stderr(w) => w.write(buf),
            LogWriter::File(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogWriter::Stderr(w) => w.flush(),
            LogWriter::File(w) => w.flush(),
        }
    }
}

struct Inner {
    writer: LogWriter,
    directory: Option<PathBuf>,
    rotation: Rotation,
    /// Unix timestamp at which the next file is opened, 0 when not rotating
    next_date: i64,
}

impl Inner {
    /// Opens `certchain[.suffix].log` for the period `date` falls in
    fn open_file(&mut self, directory: &Path, date: OffsetDateTime) -> io::Result<()> {
        let suffix = if self.rotation == Rotation::NEVER {
            String::new()
        } else {
            let formatted = date
                .format(self.rotation.date_format())
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
            format!(".{formatted}")
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(directory.join(format!("certchain{suffix}.log")))?;

        self.writer = LogWriter::File(file);
        self.next_date = self
            .rotation
            .next_date(&date)
            .map_or(0, OffsetDateTime::unix_timestamp);

        Ok(())
    }

    fn roll_if_needed(&mut self, now: OffsetDateTime) -> io::Result<()> {
        if self.next_date == 0 || now.unix_timestamp() < self.next_date {
            return Ok(());
        }

        let Some(directory) = self.directory.clone() else {
            return Ok(());
        };

        self.writer.flush()?;
        self.open_file(&directory, now)
    }
}

/// A `tracing_subscriber` writer factory that writes to stderr or to a
/// rotated file, honouring the enabled/error-log switches from the config.
pub struct LogAppender {
    enabled: bool,
    error_logs: bool,
    inner: Mutex<Inner>,
}

impl LogAppender {
    pub fn new(logging: &Logging) -> io::Result<Self> {
        let mut inner = Inner {
            writer: LogWriter::Stderr(io::stderr()),
            directory: logging.path.clone(),
            rotation: Rotation(logging.rotation),
            next_date: 0,
        };

        if let Some(directory) = &logging.path {
            let directory = std::path::absolute(directory)?;
            std::fs::create_dir_all(&directory)?;
            inner.open_file(&directory, OffsetDateTime::now_utc())?;
            inner.directory = Some(directory);
        }

        Ok(Self {
            enabled: logging.enabled,
            error_logs: logging.error_logs_enabled,
            inner: Mutex::new(inner),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A `io::Write` handle for a single log event
pub struct AppenderWriter<'a> {
    appender: &'a LogAppender,
    skip_log: bool,
}

impl io::Write for AppenderWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.skip_log {
            return Ok(buf.len());
        }

        let mut inner = self.appender.lock();
        inner.roll_if_needed(OffsetDateTime::now_utc())?;
        inner.writer.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.skip_log {
            return Ok(());
        }

        self.appender.lock().writer.flush()
    }
}

/// impl from `tracing_subscriber::fmt::MakeWriter`
impl<'a> MakeWriter<'a> for LogAppender {
    type Writer = AppenderWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        AppenderWriter {
            appender: self,
            skip_log: !self.enabled,
        }
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        let skip_error = !self.error_logs && meta.level() == &tracing::Level::ERROR;

        AppenderWriter {
            appender: self,
            skip_log: skip_error || !self.enabled,
        }
    }
}
