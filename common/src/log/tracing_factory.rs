use std::sync::OnceLock;

use tracing::Level;
use tracing_appender::rolling;
use tracing_subscriber::fmt;

static INIT: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct TracingFactory {
    options: TracingFactoryOptions,
}

#[derive(Debug, Clone)]
pub struct TracingFactoryOptions {
    pub level: Level,

    pub output_type: OutputType,

    /// Directory for the rolling log file; only read for `OutputType::Log`.
    pub log_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub enum OutputType {
    Stdout,

    Log,
}

impl Default for TracingFactoryOptions {
    fn default() -> Self {
        TracingFactoryOptions {
            level: Level::INFO,
            output_type: OutputType::Stdout,
            log_dir: None,
        }
    }
}

impl TracingFactoryOptions {
    pub fn new_with_debug(debug: bool) -> Self {
        TracingFactoryOptions {
            level: if debug { Level::DEBUG } else { Level::INFO },
            ..Default::default()
        }
    }
}

impl TracingFactory {
    pub fn init_log(debug: bool) -> Self {
        TracingFactory::init_log_with_options(TracingFactoryOptions::new_with_debug(debug))
    }

    /// Installs the global subscriber once; later calls keep the first
    /// configuration.
    pub fn init_log_with_options(opt: TracingFactoryOptions) -> Self {
        let options = opt.clone();

        INIT.get_or_init(|| {
            match &opt.output_type {
                OutputType::Stdout => {
                    fmt()
                        .compact()
                        .with_max_level(opt.level)
                        .with_target(false)
                        .with_thread_names(true)
                        .init();
                }
                OutputType::Log => {
                    let dir = opt
                        .log_dir
                        .clone()
                        .unwrap_or_else(|| String::from("/tmp/binlog2avro/logs"));
                    let appender = rolling::daily(dir, "converter.log");

                    fmt()
                        .compact()
                        .with_max_level(opt.level)
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(appender)
                        .init();
                }
            };
        });

        TracingFactory { options }
    }

    pub fn get_options(&self) -> &TracingFactoryOptions {
        &self.options
    }
}
