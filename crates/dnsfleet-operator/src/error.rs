use std::fmt;

use dnsfleet_common::error::FleetError;

pub type FleetOperatorResult<T = (), E = FleetOperatorError> = Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum FleetOperatorError {
    #[error("Runtime error: {0}")]
    Runtime(#[from] anyhow::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] FleetError),

    /// Any error originating from the `kube-rs` crate
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Invalid Json: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// A static template is missing something the generators rely on. Retrying
    /// cannot fix this.
    #[error("Invalid template {template}: {reason}")]
    Template { template: String, reason: String },

    #[error("Invalid DNS configuration: {0}")]
    InvalidConfig(String),

    #[error("{kind} {key} exists but is not owned by DNS {owner}")]
    NotOwned {
        kind: String,
        key: String,
        owner: String,
    },

    #[error("{kind} {key} is managed by {manager}, refusing to modify it")]
    NotManaged {
        kind: String,
        key: String,
        manager: String,
    },

    #[error("{}", StepErrors::describe(.0))]
    Aggregate(Vec<StepError>),
}

impl FleetOperatorError {
    pub fn template(template: &str, reason: impl Into<String>) -> Self {
        FleetOperatorError::Template {
            template: template.to_string(),
            reason: reason.into(),
        }
    }

    fn api_code(&self) -> Option<u16> {
        match self {
            FleetOperatorError::Kube {
                source: kube::Error::Api(response),
            } => Some(response.code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// Optimistic concurrency failures; the next pass re-reads and retries.
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            FleetOperatorError::Kube { .. } | FleetOperatorError::Runtime(_) => true,
            FleetOperatorError::Aggregate(errors) => {
                errors.iter().any(|step| step.source.is_retryable())
            }
            _ => false,
        }
    }
}

/// One failed step of a reconcile pass.
#[derive(Debug)]
pub struct StepError {
    pub step: &'static str,
    pub source: FleetOperatorError,
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.source)
    }
}

/// Collects the outcome of independent steps so that one failing child kind does
/// not stop the others from being attempted in the same pass.
#[derive(Debug, Default)]
pub struct StepErrors {
    errors: Vec<StepError>,
}

impl StepErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<T>(&mut self, step: &'static str, result: FleetOperatorResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(source) => {
                tracing::error!(step, error = %source, "reconcile step failed");
                self.errors.push(StepError { step, source });
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> FleetOperatorResult {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(FleetOperatorError::Aggregate(self.errors))
        }
    }

    fn describe(errors: &[StepError]) -> String {
        let joined = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        format!("{} reconcile step(s) failed: {}", errors.len(), joined)
    }
}
