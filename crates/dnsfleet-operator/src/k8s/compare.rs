//! Field comparisons that tolerate values the API server fills in.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Probe, Toleration, Volume};

const DEFAULT_MODE: i32 = 0o644;

/// `None` and an empty list are the same thing on the wire.
pub fn list_eq<T: PartialEq>(a: &Option<Vec<T>>, b: &Option<Vec<T>>) -> bool {
    a.as_deref().unwrap_or_default() == b.as_deref().unwrap_or_default()
}

pub fn map_eq(a: &Option<BTreeMap<String, String>>, b: &Option<BTreeMap<String, String>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        (Some(m), None) | (None, Some(m)) => m.is_empty(),
        (None, None) => true,
    }
}

fn toleration_eq(a: &Toleration, b: &Toleration) -> bool {
    let operator = |t: &Toleration| t.operator.clone().unwrap_or_else(|| "Equal".to_string());
    let empty = |value: &Option<String>| value.clone().unwrap_or_default();

    if empty(&a.key) != empty(&b.key)
        || operator(a) != operator(b)
        || empty(&a.value) != empty(&b.value)
        || empty(&a.effect) != empty(&b.effect)
    {
        return false;
    }
    // tolerationSeconds only means something for NoExecute.
    a.effect.as_deref() != Some("NoExecute") || a.toleration_seconds == b.toleration_seconds
}

/// Order-insensitive multiset comparison.
pub fn tolerations_eq(a: &Option<Vec<Toleration>>, b: &Option<Vec<Toleration>>) -> bool {
    let a = a.as_deref().unwrap_or_default();
    let b = b.as_deref().unwrap_or_default();
    if a.len() != b.len() {
        return false;
    }
    let mut matched = vec![false; b.len()];
    a.iter().all(|wanted| {
        let found = b
            .iter()
            .enumerate()
            .find(|(i, candidate)| !matched[*i] && toleration_eq(wanted, candidate));
        match found {
            Some((i, _)) => {
                matched[i] = true;
                true
            }
            None => false,
        }
    })
}

fn normalize_probe(probe: &Probe) -> Probe {
    let mut probe = probe.clone();
    probe.timeout_seconds.get_or_insert(1);
    probe.period_seconds.get_or_insert(10);
    probe.success_threshold.get_or_insert(1);
    probe.failure_threshold.get_or_insert(3);
    if let Some(http) = probe.http_get.as_mut() {
        http.scheme.get_or_insert_with(|| "HTTP".to_string());
    }
    probe
}

pub fn probe_eq(a: &Option<Probe>, b: &Option<Probe>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => normalize_probe(a) == normalize_probe(b),
        (None, None) => true,
        _ => false,
    }
}

fn normalize_volume(volume: &Volume) -> Volume {
    let mut volume = volume.clone();
    if let Some(config_map) = volume.config_map.as_mut() {
        config_map.default_mode.get_or_insert(DEFAULT_MODE);
        if config_map.items.as_ref().map_or(false, Vec::is_empty) {
            config_map.items = None;
        }
    }
    if let Some(secret) = volume.secret.as_mut() {
        secret.default_mode.get_or_insert(DEFAULT_MODE);
        if secret.items.as_ref().map_or(false, Vec::is_empty) {
            secret.items = None;
        }
    }
    if let Some(host_path) = volume.host_path.as_mut() {
        host_path.type_.get_or_insert_with(String::new);
    }
    volume
}

pub fn volumes_eq(a: &Option<Vec<Volume>>, b: &Option<Vec<Volume>>) -> bool {
    let a = a.as_deref().unwrap_or_default();
    let b = b.as_deref().unwrap_or_default();
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(a, b)| normalize_volume(a) == normalize_volume(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMapVolumeSource, HTTPGetAction};
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    fn toleration(key: &str, effect: &str, seconds: Option<i64>) -> Toleration {
        Toleration {
            key: Some(key.to_string()),
            operator: Some("Exists".to_string()),
            effect: Some(effect.to_string()),
            toleration_seconds: seconds,
            ..Default::default()
        }
    }

    #[test]
    fn test_nil_and_empty_are_equal() {
        assert!(list_eq::<String>(&None, &Some(vec![])));
        assert!(map_eq(&None, &Some(BTreeMap::new())));
        assert!(tolerations_eq(&None, &Some(vec![])));
        assert!(volumes_eq(&Some(vec![]), &None));
        assert!(!list_eq(&None, &Some(vec!["a".to_string()])));
    }

    #[test]
    fn test_tolerations_ignore_order() {
        let a = Some(vec![
            toleration("a", "NoSchedule", None),
            toleration("b", "NoSchedule", None),
        ]);
        let b = Some(vec![
            toleration("b", "NoSchedule", None),
            toleration("a", "NoSchedule", None),
        ]);
        assert!(tolerations_eq(&a, &b));

        let duplicated = Some(vec![
            toleration("a", "NoSchedule", None),
            toleration("a", "NoSchedule", None),
        ]);
        assert!(!tolerations_eq(&a, &duplicated));
    }

    #[test]
    fn test_toleration_seconds_only_matter_for_no_execute() {
        assert!(tolerations_eq(
            &Some(vec![toleration("a", "NoSchedule", Some(30))]),
            &Some(vec![toleration("a", "NoSchedule", None)]),
        ));
        assert!(!tolerations_eq(
            &Some(vec![toleration("a", "NoExecute", Some(30))]),
            &Some(vec![toleration("a", "NoExecute", None)]),
        ));
    }

    #[test]
    fn test_probe_defaults() {
        let bare = Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/ready".to_string()),
                port: IntOrString::Int(8181),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut defaulted = bare.clone();
        defaulted.timeout_seconds = Some(1);
        defaulted.period_seconds = Some(10);
        defaulted.success_threshold = Some(1);
        defaulted.failure_threshold = Some(3);
        defaulted.http_get.as_mut().unwrap().scheme = Some("HTTP".to_string());
        assert!(probe_eq(&Some(bare.clone()), &Some(defaulted.clone())));

        defaulted.period_seconds = Some(3);
        assert!(!probe_eq(&Some(bare), &Some(defaulted)));
    }

    #[test]
    fn test_volume_default_mode() {
        let volume = |mode| Volume {
            name: "config-volume".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: "dns-default".to_string(),
                default_mode: mode,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(volumes_eq(&Some(vec![volume(None)]), &Some(vec![volume(Some(420))])));
        assert!(!volumes_eq(&Some(vec![volume(None)]), &Some(vec![volume(Some(0o600))])));
    }
}
