use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::Handle;

use crate::{Error, Result};

const LOG_FORMAT_CONSOLE: &str =
    "\x1B[37m{d(%Y-%m-%d %H:%M:%S%.3f)}\x1B[0m {h({l:>5.5})} \x1B[36m{t:<30.30}\x1B[0m \x1B[37m:\x1B[0m {m}{n}";
const CONSOLE_APPENDER: &str = "stdout";

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// The console logger of the application.
///
/// It installs a [log4rs] console appender as the global [log] backend and can only be
/// initialized once for the lifetime of the process.
#[derive(Debug)]
pub struct CssLogger {
    handle: Handle,
    loggers: Vec<(String, LevelFilter)>,
}

impl CssLogger {
    /// Returns a builder instance for the logger.
    pub fn builder() -> CssLoggerBuilder {
        CssLoggerBuilder::default()
    }

    /// Create a new logging instance with the given root level and package level overrides.
    pub fn new(root_level: LevelFilter, loggers: Vec<(String, LevelFilter)>) -> Result<Self> {
        if INITIALIZED.swap(true, Ordering::Relaxed) {
            return Err(Error::AlreadyInitialized);
        }

        let config = Self::create_config(root_level, loggers.clone())?;
        let handle = log4rs::init_config(config).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        debug!("Logger has been initialized");
        Ok(Self { handle, loggers })
    }

    /// Returns the root logging level of the logger.
    pub fn root_log_level(&self) -> LevelFilter {
        self.handle.max_log_level()
    }

    /// Change the root logging level of the running logger.
    pub fn set_root_level(&self, level: LevelFilter) -> Result<()> {
        let config = Self::create_config(level, self.loggers.clone())?;
        self.handle.set_config(config);
        debug!("Root log level has been updated to {}", level);
        Ok(())
    }

    fn create_config(
        root_level: LevelFilter,
        loggers: Vec<(String, LevelFilter)>,
    ) -> Result<Config> {
        let root = Root::builder().appender(CONSOLE_APPENDER);
        let mut config_builder = Config::builder().appender(Appender::builder().build(
            CONSOLE_APPENDER,
            Box::new(
                ConsoleAppender::builder()
                    .encoder(Box::new(PatternEncoder::new(LOG_FORMAT_CONSOLE)))
                    .build(),
            ),
        ));

        // configure the package log levels
        for (logger, level) in loggers.into_iter() {
            config_builder = config_builder.logger(Logger::builder().build(logger, level));
        }

        config_builder
            .build(root.build(root_level))
            .map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct CssLoggerBuilder {
    root_level: Option<LevelFilter>,
    loggers: Vec<(String, LevelFilter)>,
}

impl CssLoggerBuilder {
    /// Set the root level of the logger.
    pub fn root_level(&mut self, level: LevelFilter) -> &mut Self {
        self.root_level = Some(level);
        self
    }

    /// Add a log level filter for the given package.
    pub fn logger<S: AsRef<str>>(&mut self, package: S, level: LevelFilter) -> &mut Self {
        self.loggers.push((package.as_ref().to_string(), level));
        self
    }

    /// Consumes the [CssLoggerBuilder] and creates a new logging instance.
    pub fn build(&mut self) -> Result<CssLogger> {
        let root_level = self.root_level.take().unwrap_or(LevelFilter::Info);
        let loggers = std::mem::take(&mut self.loggers);

        CssLogger::new(root_level, loggers)
    }
}
