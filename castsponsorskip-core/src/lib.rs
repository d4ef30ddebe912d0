/// The current application version of CastSponsorSkip.
pub const VERSION: &str = "0.1.0";

pub mod core;

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use std::sync::Once;

    use log::LevelFilter;
    use log4rs::append::console::ConsoleAppender;
    use log4rs::config::{Appender, Root};
    use log4rs::encode::pattern::PatternEncoder;
    use log4rs::Config;

    static INIT: Once = Once::new();

    const LOG_FORMAT: &str = "{d(%H:%M:%S%.3f)} {h({l:>5.5})} {t:<30.30} : {m}{n}";

    /// Initializes the test logger with the specified log level.
    #[macro_export]
    macro_rules! init_logger {
        () => {
            $crate::testing::init_logger_level(log::LevelFilter::Trace)
        };
        ($level:expr) => {
            $crate::testing::init_logger_level($level)
        };
    }

    /// Initialize the logger for test execution with the given root level.
    pub fn init_logger_level(level: LevelFilter) {
        INIT.call_once(|| {
            log4rs::init_config(
                Config::builder()
                    .appender(
                        Appender::builder().build(
                            "stdout",
                            Box::new(
                                ConsoleAppender::builder()
                                    .encoder(Box::new(PatternEncoder::new(LOG_FORMAT)))
                                    .build(),
                            ),
                        ),
                    )
                    .build(Root::builder().appender("stdout").build(level))
                    .expect("expected a valid logger config"),
            )
            .expect("expected the logger to have been initialized");
        });
    }
}
