use dnsfleet_common::error::FleetError;
use dnsfleet_operator::error::FleetOperatorError;
use thiserror::Error;

pub type FleetCliResult<T = (), E = FleetCliError> = Result<T, E>;

#[derive(Debug, Error)]
pub enum FleetCliError {
    #[error("Unable to initialize config: {0}")]
    InitConfig(#[from] FleetError),
    #[error("Unable to render CRDs: {0}")]
    Render(#[from] serde_yaml::Error),
    #[error("Operator failed: {0}")]
    Operator(#[from] FleetOperatorError),
    #[error("Runtime error: {0}")]
    Runtime(#[from] anyhow::Error),
}
