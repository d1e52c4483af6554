pub mod cluster_status;
pub mod conditions;
pub mod crd;
pub mod ensure;
pub mod finalizer;
pub mod reconcile;
pub mod status;
pub mod versions;

use std::sync::Arc;

use crd::{ClusterDns, ClusterOperator};
use dnsfleet_common::settings::Settings;
use dnsfleet_common::LogLevelHandle;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::controller::Controller;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config;
use kube::{Api, Client};
use reconcile::Context;
use tracing::{error, info};

use crate::clock::SystemClock;
use crate::error::FleetOperatorResult;
use crate::k8s::names::{CLUSTER_OPERATOR_NAME, DEFAULT_DNS_NAME};
use crate::params::RuntimeParams;
use crate::store::KubeStore;

/// Runs the DNS controller and the cluster operator status controller until
/// the process is signalled.
pub async fn operator(settings: &Settings, log_level: Option<LogLevelHandle>) -> FleetOperatorResult<()> {
    let params = RuntimeParams::from_settings(settings)?;
    let client = Client::try_default().await?;

    let mut context = Context::new(KubeStore::new(client.clone()), params.clone(), Arc::new(SystemClock));
    if let Some(handle) = log_level {
        context = context.with_log_level(handle);
    }
    let context = Arc::new(context);

    // The status controller only reacts to an existing object.
    cluster_status::ensure_cluster_operator(&context.store).await?;

    let operand_ns = params.operand_namespace.as_str();
    let dns_api: Api<ClusterDns> = Api::all(client.clone());
    let dns_controller = Controller::new(dns_api.clone(), Config::default())
        .owns(
            Api::<DaemonSet>::namespaced(client.clone(), operand_ns),
            Config::default(),
        )
        .owns(
            Api::<Service>::namespaced(client.clone(), operand_ns),
            Config::default(),
        )
        .owns(
            Api::<ConfigMap>::namespaced(client.clone(), operand_ns),
            Config::default(),
        )
        .watches(
            Api::<ConfigMap>::namespaced(client.clone(), &params.config_namespace),
            Config::default(),
            |_| Some(ObjectRef::<ClusterDns>::new(DEFAULT_DNS_NAME)),
        )
        .shutdown_on_signal()
        .run(reconcile::reconcile, reconcile::on_error, context.clone())
        .for_each(|result| async move {
            match result {
                Ok((dns, _action)) => info!(dns = %dns.name, "reconciled DNS"),
                Err(err) => error!(error = %err, "DNS controller error"),
            }
        });

    let operator_api: Api<ClusterOperator> = Api::all(client.clone());
    let status_controller = Controller::new(
        operator_api,
        Config::default().fields(&format!("metadata.name={}", CLUSTER_OPERATOR_NAME)),
    )
    .watches(dns_api, Config::default(), |_| {
        Some(ObjectRef::<ClusterOperator>::new(CLUSTER_OPERATOR_NAME))
    })
    .watches(
        Api::<DaemonSet>::namespaced(client.clone(), operand_ns),
        Config::default(),
        |_| Some(ObjectRef::<ClusterOperator>::new(CLUSTER_OPERATOR_NAME)),
    )
    .shutdown_on_signal()
    .run(
        reconcile::reconcile_cluster_operator,
        reconcile::on_cluster_operator_error,
        context,
    )
    .for_each(|result| async move {
        if let Err(err) = result {
            error!(error = %err, "cluster operator controller error");
        }
    });

    info!(namespace = operand_ns, "starting controllers");
    tokio::join!(dns_controller, status_controller);
    info!("controllers stopped");
    Ok(())
}
