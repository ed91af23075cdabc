use tracing::debug;

use super::filter::should_skip;
use super::info::PolicyInfo;
use crate::metrics::{
    CLUSTER_NAMESPACE_SENTINEL, MetricsSink, PolicyChangeType, PolicyChangesLabels, PolicyType,
};
use crate::policy::AnyPolicy;

/// Emits one policy change event for `policy` unless its namespace is filtered.
pub fn register_policy(sink: &dyn MetricsSink, policy: &AnyPolicy, change: PolicyChangeType) {
    let info = PolicyInfo::extract(policy);
    let config = sink.config();
    if should_skip(&info.namespace, config.include_namespaces(), config.exclude_namespaces()) {
        debug!(
            policy = %info.name,
            namespace = %info.namespace,
            change = change.as_str(),
            "skipping policy changes metric, namespace filtered by metrics config"
        );
        return;
    }

    let namespace = match info.policy_type {
        PolicyType::Cluster => CLUSTER_NAMESPACE_SENTINEL.to_string(),
        PolicyType::Namespaced => info.namespace,
    };

    sink.record_policy_changes(PolicyChangesLabels {
        policy_validation_mode: info.validation_mode.as_str(),
        policy_type: info.policy_type.as_str(),
        policy_background_mode: info.background_mode.as_str(),
        policy_namespace: namespace,
        policy_name: info.name,
        policy_change_type: change.as_str(),
    });
}

/// Emits `updated` for the old label set when the spec changed, and again for
/// the new label set when a label dimension (background, validation mode) moved.
pub fn register_update(sink: &dyn MetricsSink, old: &AnyPolicy, new: &AnyPolicy) {
    let (old_spec, new_spec) = (old.spec(), new.spec());
    if old_spec == new_spec {
        return;
    }

    register_policy(sink, old, PolicyChangeType::Updated);

    if old_spec.background_processing_enabled() != new_spec.background_processing_enabled()
        || old_spec.validation_failure_action() != new_spec.validation_failure_action()
    {
        register_policy(sink, new, PolicyChangeType::Updated);
    }
}
