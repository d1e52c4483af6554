use clap::Args;
use dnsfleet_operator::operator::crd::{ClusterDns, ClusterOperator};
use kube::CustomResourceExt;

use crate::error::FleetCliResult;

#[derive(Debug, Args, Clone)]
pub struct CrdsArgs {}

pub fn render() -> FleetCliResult<String> {
    let documents = [
        serde_yaml::to_string(&ClusterDns::crd())?,
        serde_yaml::to_string(&ClusterOperator::crd())?,
    ];
    Ok(documents.join("---\n"))
}

pub fn run(_args: CrdsArgs) -> FleetCliResult {
    print!("{}", render()?);
    Ok(())
}
