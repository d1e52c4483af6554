use std::sync::Arc;
use std::time::Duration;

use dnsfleet_common::LogLevelHandle;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, instrument, warn};

use super::cluster_status;
use super::crd::{ClusterDns, ClusterOperator, DnsLogLevel};
use super::ensure;
use super::finalizer;
use super::status;
use crate::clock::Clock;
use crate::error::{FleetOperatorError, FleetOperatorResult, StepErrors};
use crate::k8s::names::{self, DEFAULT_DNS_NAME};
use crate::params::RuntimeParams;
use crate::store::{ObjectKey, ObjectStore};

/// Requeue interval once everything has converged; watches cover the rest.
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);
const ERROR_REQUEUE: Duration = Duration::from_secs(5);
/// Requeue interval while an operand rollout is still in progress.
const ROLLOUT_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct Context<S> {
    pub store: S,
    pub params: RuntimeParams,
    pub clock: Arc<dyn Clock>,
    /// Present when the process installed a reloadable subscriber.
    pub log_level: Option<LogLevelHandle>,
}

impl<S: ObjectStore> Context<S> {
    pub fn new(store: S, params: RuntimeParams, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            params,
            clock,
            log_level: None,
        }
    }

    pub fn with_log_level(mut self, handle: LogLevelHandle) -> Self {
        self.log_level = Some(handle);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsAction {
    /// The DNS does not exist; nothing to do.
    Absent,
    /// Not the canonical instance, or terminating without our finalizer.
    Ignore,
    AddFinalizer,
    Converge,
    Finalize,
}

/// Outcome of one successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Absent,
    Ignored,
    FinalizerAdded,
    /// `recheck` is set while a Degraded flip is being held back.
    Converged { recheck: bool },
    Finalized,
}

pub fn determine_action(dns: Option<&ClusterDns>) -> DnsAction {
    let Some(dns) = dns else {
        return DnsAction::Absent;
    };
    if dns.name_any() != DEFAULT_DNS_NAME {
        return DnsAction::Ignore;
    }
    let has_finalizer = finalizer::has_finalizer(dns);
    match (dns.meta().deletion_timestamp.is_some(), has_finalizer) {
        (true, true) => DnsAction::Finalize,
        (true, false) => DnsAction::Ignore,
        (false, false) => DnsAction::AddFinalizer,
        (false, true) => DnsAction::Converge,
    }
}

/// One pass over the DNS named `name`, reading it fresh from the store.
#[instrument(skip_all, fields(dns = %name))]
pub async fn reconcile_dns<S: ObjectStore>(
    name: &str,
    ctx: &Context<S>,
) -> FleetOperatorResult<Reconciled> {
    let dns = ctx.store.get::<ClusterDns>(&ObjectKey::cluster(name)).await?;
    match (determine_action(dns.as_ref()), dns) {
        (DnsAction::Absent, _) | (_, None) => {
            info!("DNS not found, reconciliation skipped");
            Ok(Reconciled::Absent)
        }
        (DnsAction::Ignore, Some(_)) => {
            if name != DEFAULT_DNS_NAME {
                warn!("ignoring DNS, only {:?} is managed", DEFAULT_DNS_NAME);
            } else {
                debug!("DNS is terminating and already finalized");
            }
            Ok(Reconciled::Ignored)
        }
        (DnsAction::AddFinalizer, Some(dns)) => {
            finalizer::add(&ctx.store, &dns).await?;
            info!("added finalizer");
            Ok(Reconciled::FinalizerAdded)
        }
        (DnsAction::Converge, Some(dns)) => converge(&dns, ctx).await,
        (DnsAction::Finalize, Some(dns)) => finalize(&dns, ctx).await,
    }
}

fn apply_operator_log_level<S>(dns: &ClusterDns, ctx: &Context<S>) {
    let Some(handle) = &ctx.log_level else {
        return;
    };
    let level = match dns.spec.operator_log_level {
        DnsLogLevel::Normal => LevelFilter::INFO,
        DnsLogLevel::Debug => LevelFilter::DEBUG,
        DnsLogLevel::Trace => LevelFilter::TRACE,
    };
    if handle.current() == Some(level) {
        return;
    }
    match handle.set(level) {
        Ok(()) => info!(level = %level, "changed operator log level"),
        Err(err) => warn!(error = %err, "failed to change operator log level"),
    }
}

async fn converge<S: ObjectStore>(
    dns: &ClusterDns,
    ctx: &Context<S>,
) -> FleetOperatorResult<Reconciled> {
    apply_operator_log_level(dns, ctx);

    let (store, params) = (&ctx.store, &ctx.params);
    let dns_name = dns.name_any();
    let mut steps = StepErrors::new();

    steps.record("scaffolding", ensure::ensure_scaffolding(store, params).await);
    steps.record(
        "legacy-node-resolver",
        ensure::remove_legacy_node_resolver(store, params, &dns_name).await,
    );
    steps.record("daemonset", ensure::ensure_daemonset(store, params, dns).await);
    steps.record("configmap", ensure::ensure_configmap(store, params, dns).await);
    steps.record("service", ensure::ensure_service(store, params, dns).await);
    steps.record("ca-bundles", ensure::sync_ca_bundles(store, params, dns).await);
    steps.record("ca-bundle-gc", ensure::prune_ca_copies(store, params, dns).await);
    steps.record(
        "network-policy",
        ensure::ensure_network_policy(store, params, dns).await,
    );
    steps.record("monitoring", ensure::ensure_monitoring(store, params, dns).await);

    let recheck = steps
        .record("status", sync_status(dns, ctx).await)
        .unwrap_or(false);

    steps.into_result()?;
    debug!("converged");
    Ok(Reconciled::Converged { recheck })
}

/// Re-reads the service and daemonset so the status reflects what is actually
/// there, even when one of the steps above failed. Returns whether a Degraded
/// flip is being held back.
async fn sync_status<S: ObjectStore>(dns: &ClusterDns, ctx: &Context<S>) -> FleetOperatorResult<bool> {
    let (store, params) = (&ctx.store, &ctx.params);
    let dns_name = dns.name_any();
    let service = store
        .get::<Service>(&ObjectKey::namespaced(
            &params.operand_namespace,
            names::service_name(&dns_name),
        ))
        .await?;
    let daemonset = store
        .get::<DaemonSet>(&ObjectKey::namespaced(
            &params.operand_namespace,
            names::daemonset_name(&dns_name),
        ))
        .await?;

    let computed = status::compute_status(
        dns,
        service.as_ref(),
        daemonset.as_ref(),
        &params.cluster_domain,
        ctx.clock.now(),
        params.degraded_toleration,
    );
    status::sync_dns_status(store, dns, &computed).await?;
    Ok(computed.degraded_held)
}

async fn finalize<S: ObjectStore>(
    dns: &ClusterDns,
    ctx: &Context<S>,
) -> FleetOperatorResult<Reconciled> {
    let (store, params) = (&ctx.store, &ctx.params);
    let dns_name = dns.name_any();
    let mut steps = StepErrors::new();

    steps.record(
        "ca-bundles",
        ensure::delete_ca_copies(store, params, &dns_name).await,
    );
    steps.record(
        "legacy-node-resolver",
        ensure::remove_legacy_node_resolver(store, params, &dns_name).await,
    );
    steps.record(
        "daemonset",
        ensure::delete_daemonset(store, params, &dns_name).await,
    );
    steps.into_result()?;

    finalizer::remove(store, dns).await?;
    info!("removed finalizer");
    Ok(Reconciled::Finalized)
}

/// Controller entry point for the cluster DNS.
pub async fn reconcile<S: ObjectStore>(
    dns: Arc<ClusterDns>,
    ctx: Arc<Context<S>>,
) -> FleetOperatorResult<Action> {
    let outcome = reconcile_dns(&dns.name_any(), &ctx).await?;
    let action = match outcome {
        Reconciled::Converged { recheck: true } => {
            let wait = ctx.params.degraded_toleration.to_std().unwrap_or(ERROR_REQUEUE);
            Action::requeue(wait)
        }
        Reconciled::Converged { recheck: false } => Action::requeue(RESYNC_INTERVAL),
        Reconciled::FinalizerAdded => Action::requeue(Duration::from_secs(1)),
        Reconciled::Absent | Reconciled::Ignored | Reconciled::Finalized => Action::await_change(),
    };
    Ok(action)
}

pub fn on_error<S: ObjectStore>(
    dns: Arc<ClusterDns>,
    error: &FleetOperatorError,
    _ctx: Arc<Context<S>>,
) -> Action {
    error!(dns = %dns.name_any(), error = %error, "DNS reconciliation failed");
    Action::requeue(ERROR_REQUEUE)
}

/// Controller entry point for the `dns` cluster operator.
#[instrument(skip_all, fields(name = names::CLUSTER_OPERATOR_NAME))]
pub async fn reconcile_cluster_operator<S: ObjectStore>(
    _operator: Arc<ClusterOperator>,
    ctx: Arc<Context<S>>,
) -> FleetOperatorResult<Action> {
    let status =
        cluster_status::sync_cluster_operator(&ctx.store, &ctx.params, ctx.clock.as_ref()).await?;
    let progressing = status
        .conditions
        .iter()
        .any(|c| c.type_ == super::conditions::PROGRESSING && c.is_true());
    Ok(Action::requeue(if progressing {
        ROLLOUT_POLL_INTERVAL
    } else {
        RESYNC_INTERVAL
    }))
}

pub fn on_cluster_operator_error<S: ObjectStore>(
    _operator: Arc<ClusterOperator>,
    error: &FleetOperatorError,
    _ctx: Arc<Context<S>>,
) -> Action {
    error!(error = %error, "cluster operator status sync failed");
    Action::requeue(ERROR_REQUEUE)
}
