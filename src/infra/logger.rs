// ============================================================
// Duplicating Logger
// ============================================================
// Every event the process logs goes to stdout and, once a log
// file is attached, to that file as well:
//
//   tracing event ──▶ fmt layer (stdout)
//                └──▶ reloadable fmt layer ──▶ non_blocking ──▶ ModelInformation.log
//
// The binary installs the subscriber before the model exists, with
// the file layer empty. The model attaches the file once its
// logging directory is known, which swaps the layer in through the
// reload handle. Clones share the same handle.
//
// Reference: tracing-subscriber docs (reload, Layer)
//            tracing-appender docs (rolling, non_blocking)

use std::{
    io,
    path::{Path, PathBuf},
};

use tracing::Subscriber;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{InitError, RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, reload, EnvFilter, Layer, Registry};

pub const LOG_FILE: &str = "ModelInformation.log";

type FileLayer  = Box<dyn Layer<Registry> + Send + Sync>;
type FileHandle = reload::Handle<Option<FileLayer>, Registry>;

#[derive(Clone, Default)]
pub struct Logger {
    file: Option<FileHandle>,
}

/// An attached log file. Its background writer runs until this is
/// dropped; dropping flushes whatever is still queued.
#[must_use = "the log file stops receiving events once this is dropped"]
pub struct LogFile {
    path:   PathBuf,
    _guard: WorkerGuard,
}

impl LogFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Logger {
    /// A logger outside any subscriber: attaching creates the file
    /// but nothing is routed into it.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process subscriber (stdout, plus the file layer once
    /// attached) and the logger controlling its file layer.
    pub fn subscriber(filter: EnvFilter) -> (Self, impl Subscriber + Send + Sync + 'static) {
        let (file_layer, handle) = reload::Layer::new(None::<FileLayer>);
        let subscriber = tracing_subscriber::registry()
            .with(file_layer)
            .with(filter)
            .with(fmt::layer().with_writer(io::stdout).with_ansi(false));
        (Self { file: Some(handle) }, subscriber)
    }

    /// Create `dir/ModelInformation.log` and start duplicating every
    /// event into it. A later attach replaces the earlier file.
    pub fn attach(&self, dir: impl AsRef<Path>) -> Result<LogFile, InitError> {
        let dir = dir.as_ref();
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(LOG_FILE)
            .build(dir)?;
        let (writer, guard) = tracing_appender::non_blocking(appender);

        if let Some(handle) = &self.file {
            let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
            if let Err(e) = handle.reload(Some(layer)) {
                tracing::warn!("Log file layer could not be installed: {}", e);
            }
        }
        Ok(LogFile { path: dir.join(LOG_FILE), _guard: guard })
    }

    pub fn is_attached(&self) -> bool {
        self.file
            .as_ref()
            .and_then(|handle| handle.with_current(Option::is_some).ok())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attached_file_receives_every_event() {
        let dir = tempfile::tempdir().unwrap();
        let (logger, subscriber) = Logger::subscriber(EnvFilter::new("info"));

        let log_file = tracing::subscriber::with_default(subscriber, || {
            tracing::info!("before attach");
            assert!(!logger.is_attached());
            let log_file = logger.attach(dir.path()).unwrap();
            assert!(logger.clone().is_attached());
            tracing::info!("conv_1 output: [1, 2]");
            tracing::debug!("below the filter");
            log_file
        });
        assert_eq!(log_file.path(), dir.path().join(LOG_FILE));
        drop(log_file);

        let text = std::fs::read_to_string(dir.path().join(LOG_FILE)).unwrap();
        assert!(text.contains("conv_1 output: [1, 2]"));
        assert!(!text.contains("before attach"));
        assert!(!text.contains("below the filter"));
    }

    #[test]
    fn logger_without_subscriber_still_creates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new();
        let log_file = logger.attach(dir.path()).unwrap();
        assert!(log_file.path().exists());
        assert!(!logger.is_attached());
    }
}
