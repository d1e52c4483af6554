//! Desired-state generators and their diff functions, one module per kind.
//!
//! Every `*_changed(current, desired)` returns `None` when the live object
//! already matches on the fields the operator manages, or a copy of `current`
//! with just those fields taken from `desired`. Feeding that copy back in
//! returns `None`.

pub mod ca_bundle;
pub mod compare;
pub mod configmap;
pub mod corefile;
pub mod daemonset;
pub mod manifests;
pub mod names;
pub mod network_policy;
pub mod ownership;
pub mod rbac;
pub mod service;
pub mod service_monitor;

#[cfg(test)]
pub(crate) mod testing;
