use dnsfleet_common::{
    error::FleetResult,
    settings::{self, Settings},
};

use crate::Cli;

/// Loads the settings once per process. A log level given on the command line
/// wins over the configured one.
pub fn init_config(cli: &Cli) -> FleetResult<&'static Settings> {
    let mut loaded = Settings::load(cli.settings.clone())?;
    if let Some(level) = cli.log_level {
        loaded.log_level = level;
    }
    settings::init_config(loaded)
}
