use clap::Args;
use dnsfleet_common::{info, settings::Settings, LogLevelHandle};

use crate::error::FleetCliResult;

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Keep the operator log level fixed instead of following the cluster DNS.
    #[arg(long)]
    pub static_log_level: bool,
}

pub async fn run(args: RunArgs, cfg: &Settings, handle: LogLevelHandle) -> FleetCliResult {
    info!(
        release = %cfg.release_version,
        namespace = %cfg.operand_namespace,
        "starting dnsfleet operator"
    );
    let handle = (!args.static_log_level).then_some(handle);
    dnsfleet_operator::operator(cfg, handle).await?;
    Ok(())
}
