use tracing::debug;

use super::filter::should_skip;
use super::info::PolicyInfo;
use super::RecorderError;
use crate::metrics::{
    CLUSTER_NAMESPACE_SENTINEL, MetricsSink, PolicyChangeType, PolicyRuleInfoLabels, PolicyType,
};
use crate::policy::autogen::compute_rules;
use crate::policy::{AnyPolicy, Rule};

fn register_policy_rule_info_metric(
    sink: &dyn MetricsSink,
    info: &PolicyInfo,
    rule: &Rule,
    ready: bool,
    change: PolicyChangeType,
) -> Result<(), RecorderError> {
    let value = match change {
        PolicyChangeType::Created => 1.0,
        PolicyChangeType::Deleted => 0.0,
        other => return Err(RecorderError::InconsistentChangeKind(other.as_str())),
    };

    let config = sink.config();
    if should_skip(&info.namespace, config.include_namespaces(), config.exclude_namespaces()) {
        debug!(
            policy = %info.name,
            namespace = %info.namespace,
            rule = %rule.name,
            "skipping rule info metric, namespace filtered by metrics config"
        );
        return Ok(());
    }

    let namespace = match info.policy_type {
        PolicyType::Cluster => CLUSTER_NAMESPACE_SENTINEL.to_string(),
        PolicyType::Namespaced => info.namespace.clone(),
    };

    sink.record_policy_rule_info(
        PolicyRuleInfoLabels::new(
            info.validation_mode,
            info.policy_type,
            info.background_mode,
            namespace,
            info.name.clone(),
            rule.name.clone(),
            rule.rule_type(),
            ready,
        ),
        value,
    );
    Ok(())
}

fn register_rules(
    sink: &dyn MetricsSink,
    policy: &AnyPolicy,
    change: PolicyChangeType,
) -> Result<(), RecorderError> {
    let info = PolicyInfo::extract(policy);
    let ready = policy.is_ready();
    for rule in compute_rules(policy) {
        register_policy_rule_info_metric(sink, &info, &rule, ready, change)?;
    }
    Ok(())
}

/// Marks every rule of `policy` as present.
pub fn add_policy(sink: &dyn MetricsSink, policy: &AnyPolicy) -> Result<(), RecorderError> {
    register_rules(sink, policy, PolicyChangeType::Created)
}

/// Marks every rule of `policy` as gone by emitting zero at the same label set.
pub fn remove_policy(sink: &dyn MetricsSink, policy: &AnyPolicy) -> Result<(), RecorderError> {
    register_rules(sink, policy, PolicyChangeType::Deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::RecordingSink;
    use crate::policy::testing::*;
    use crate::policy::Spec;

    fn spec_with(rules: &[&str]) -> Spec {
        let mut rules: Vec<Rule> = rules.iter().map(|n| validate_rule(n)).collect();
        // keep autogen out of the way
        for rule in &mut rules {
            rule.match_resources.resources.kinds = vec!["Namespace".to_string()];
        }
        Spec {
            rules,
            ..Default::default()
        }
    }

    #[test]
    fn test_add_then_remove_is_symmetric() {
        let sink = RecordingSink::default();
        let policy: AnyPolicy =
            namespaced_policy("team-a", "require-labels", spec_with(&["a", "b"]), true).into();

        add_policy(&sink, &policy).unwrap();
        remove_policy(&sink, &policy).unwrap();

        let records = sink.rule_info();
        assert_eq!(records.len(), 4);
        let (added, removed) = records.split_at(2);
        for ((add_labels, add_value), (rm_labels, rm_value)) in added.iter().zip(removed) {
            assert_eq!(add_labels, rm_labels);
            assert_eq!(*add_value, 1.0);
            assert_eq!(*rm_value, 0.0);
        }
        assert_eq!(added[0].0.rule_name, "a");
        assert_eq!(added[1].0.rule_name, "b");
        assert_eq!(added[0].0.policy_namespace, "team-a");
        assert_eq!(added[0].0.status, "true");
        assert_eq!(added[0].0.rule_type, "validate");
    }

    #[test]
    fn test_cluster_policy_uses_sentinel_namespace() {
        // "-" in the exclude list must not suppress cluster policies
        let sink = RecordingSink::with_namespaces(&["team-a"], &["-"]);
        let policy: AnyPolicy = cluster_policy("require-labels", spec_with(&["a"]), false).into();

        add_policy(&sink, &policy).unwrap();

        let records = sink.rule_info();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0.policy_namespace, "-");
        assert_eq!(records[0].0.policy_type, "cluster");
        assert_eq!(records[0].0.status, "false");
    }

    #[test]
    fn test_filtered_namespace_emits_nothing() {
        let sink = RecordingSink::with_namespaces(&[], &["team-a"]);
        let policy: AnyPolicy =
            namespaced_policy("team-a", "require-labels", spec_with(&["a"]), true).into();

        add_policy(&sink, &policy).unwrap();
        remove_policy(&sink, &policy).unwrap();

        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_autogen_rules_are_registered() {
        let sink = RecordingSink::default();
        let spec = Spec {
            rules: vec![validate_rule("check-labels")],
            ..Default::default()
        };
        add_policy(&sink, &cluster_policy("require-labels", spec, true).into()).unwrap();

        let names: Vec<String> = sink.rule_info().into_iter().map(|(l, _)| l.rule_name).collect();
        assert_eq!(
            names,
            vec!["check-labels", "autogen-check-labels", "autogen-cronjob-check-labels"]
        );
    }

    #[test]
    fn test_updated_change_kind_is_rejected() {
        let sink = RecordingSink::default();
        let policy: AnyPolicy = cluster_policy("p", spec_with(&["a"]), true).into();
        let info = PolicyInfo::extract(&policy);

        let err = register_policy_rule_info_metric(
            &sink,
            &info,
            &policy.spec().rules[0],
            true,
            PolicyChangeType::Updated,
        )
        .unwrap_err();

        assert!(matches!(err, RecorderError::InconsistentChangeKind("updated")));
        assert!(sink.records().is_empty());
    }
}
