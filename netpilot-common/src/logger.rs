use netpilot_error::{NPError, NPResult};
use netpilot_models::settings::Log;
use std::{
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{subscriber::set_global_default, Level};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    filter::DynFilterFn,
    fmt::{self},
    layer::SubscriberExt,
    Layer, Registry,
};

pub struct Logger {
    level: Arc<Mutex<Level>>,
    _file_guard: Option<WorkerGuard>,
}

fn lock_level(level: &Mutex<Level>) -> MutexGuard<'_, Level> {
    level.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Logger {
    pub fn new(level: Option<Level>) -> Self {
        Logger {
            level: Arc::new(Mutex::new(level.unwrap_or(Level::INFO))),
            _file_guard: None,
        }
    }

    /// Logger whose level comes from the `[log]` section; unknown names fall back to `info`.
    pub fn from_config(log: &Log) -> Self {
        Self::new(Some(parse_level(&log.level)))
    }

    /// Sets the new logging level. Takes effect for both console and file output.
    #[inline]
    pub fn set_level(&self, new_level: Level) {
        *lock_level(&self.level) = new_level;
    }

    #[inline]
    pub fn get_level(&self) -> Level {
        *lock_level(&self.level)
    }

    /// Installs the global subscriber.
    ///
    /// Output goes to stdout and to a daily rolling file under `log.dir`.
    /// Both sinks share the runtime-adjustable level.
    pub fn initialize(&mut self, log: &Log) -> NPResult<()> {
        let file_appender = rolling::daily(&log.dir, &log.file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        self._file_guard = Some(guard);

        let console_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| metadata.level() <= &*lock_level(&level))
        };

        let file_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| metadata.level() <= &*lock_level(&level))
        };

        let console_layer = {
            #[cfg(debug_assertions)]
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_file(true)
                .with_line_number(true);

            #[cfg(not(debug_assertions))]
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_file(false)
                .with_line_number(false);

            layer.with_filter(console_filter)
        };

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_filter(file_filter);

        let subscriber = Registry::default().with(console_layer).with(file_layer);

        set_global_default(subscriber).map_err(|_| NPError::from("Failed to set logger"))?;
        Ok(())
    }
}

/// Parse a level name case-insensitively, defaulting to `INFO`.
pub fn parse_level(name: &str) -> Level {
    Level::from_str(name.trim()).unwrap_or(Level::INFO)
}
