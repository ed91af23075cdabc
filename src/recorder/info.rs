use crate::metrics::{PolicyBackgroundMode, PolicyType, PolicyValidationMode};
use crate::policy::AnyPolicy;

/// Label dimensions shared by every policy metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyInfo {
    pub name: String,
    pub namespace: String,
    pub policy_type: PolicyType,
    pub background_mode: PolicyBackgroundMode,
    pub validation_mode: PolicyValidationMode,
}

impl PolicyInfo {
    pub fn extract(policy: &AnyPolicy) -> Self {
        let namespace = policy.namespace();
        let policy_type = if namespace.is_empty() {
            PolicyType::Cluster
        } else {
            PolicyType::Namespaced
        };
        let spec = policy.spec();
        Self {
            name: policy.name(),
            namespace,
            policy_type,
            background_mode: spec.background_processing_enabled().into(),
            validation_mode: spec.validation_failure_action().into(),
        }
    }
}
