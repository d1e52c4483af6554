use std::fmt;

use tracing_subscriber::{filter::LevelFilter, prelude::*, reload, Registry};

use crate::error::{FleetError, FleetResult};

/// Handle onto the installed level filter, used to follow the operator log level
/// requested by the cluster DNS resource without restarting.
#[derive(Clone)]
pub struct LogLevelHandle {
    handle: reload::Handle<LevelFilter, Registry>,
}

impl LogLevelHandle {
    pub fn set(&self, level: LevelFilter) -> FleetResult {
        self.handle
            .modify(|filter| *filter = level)
            .map_err(|err| FleetError::Logging(err.to_string()))
    }

    pub fn current(&self) -> Option<LevelFilter> {
        self.handle.clone_current()
    }
}

impl fmt::Debug for LogLevelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogLevelHandle")
            .field("level", &self.current())
            .finish()
    }
}

pub fn setup_tracing(level: log::LevelFilter) -> FleetResult<LogLevelHandle> {
    let (filter, handle) = reload::Layer::new(to_tracing_level(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .map_err(|err| FleetError::Logging(err.to_string()))?;

    Ok(LogLevelHandle { handle })
}

pub fn to_tracing_level(level: log::LevelFilter) -> LevelFilter {
    match level {
        log::LevelFilter::Off => LevelFilter::OFF,
        log::LevelFilter::Error => LevelFilter::ERROR,
        log::LevelFilter::Warn => LevelFilter::WARN,
        log::LevelFilter::Info => LevelFilter::INFO,
        log::LevelFilter::Debug => LevelFilter::DEBUG,
        log::LevelFilter::Trace => LevelFilter::TRACE,
    }
}
