use std::path::PathBuf;

use clap::Parser;
use dnsfleet_common::setup_tracing;
use log::LevelFilter;

use crate::{error::FleetCliResult, init::init_config};

mod crds;
mod run;

#[derive(Debug, Parser)]
#[command(version, about = "Cluster DNS operator", long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[clap(short('l'), long, value_name("LEVEL"))]
    pub log_level: Option<LevelFilter>,

    /// Settings file layered over config/default and the environment.
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Parser, Clone)]
pub enum Command {
    #[command(about = "Run the DNS and cluster operator controllers")]
    Run(run::RunArgs),
    #[command(about = "Print the custom resource definitions")]
    Crds(crds::CrdsArgs),
}

pub async fn exec() -> FleetCliResult {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let cfg = init_config(&cli)?;

    match cli.cmd {
        Command::Run(args) => {
            let handle = setup_tracing(cfg.log_level)?;
            run::run(args, cfg, handle).await?
        }
        Command::Crds(args) => crds::run(args)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_settings() {
        let cli = Cli::try_parse_from(["dnsfleet", "-l", "debug", "--settings", "dns.yaml", "run"])
            .unwrap();
        assert_eq!(cli.log_level, Some(LevelFilter::Debug));
        assert_eq!(cli.settings, Some(PathBuf::from("dns.yaml")));
        assert!(matches!(cli.cmd, Command::Run(_)));
    }

    #[test]
    fn test_parse_crds() {
        let cli = Cli::try_parse_from(["dnsfleet", "crds"]).unwrap();
        assert!(cli.log_level.is_none());
        assert!(matches!(cli.cmd, Command::Crds(_)));
    }
}
