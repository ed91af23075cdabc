use std::time::Duration;

use kube::core::DynamicObject;

use crate::policy::{AnyPolicy, RuleType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStatus {
    Pass,
    Fail,
    Warn,
    Error,
    Skip,
}

/// Outcome of one rule, with the raw JSON patch operations it produced.
#[derive(Debug, Clone)]
pub struct RuleResponse {
    pub name: String,
    pub rule_type: RuleType,
    pub status: RuleStatus,
    pub message: String,
    pub patches: Vec<Vec<u8>>,
    pub duration: Duration,
}

impl RuleResponse {
    pub fn new(name: impl Into<String>, rule_type: RuleType, status: RuleStatus) -> Self {
        Self {
            name: name.into(),
            rule_type,
            status,
            message: String::new(),
            patches: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn with_patches(mut self, patches: Vec<Vec<u8>>) -> Self {
        self.patches = patches;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicyResponse {
    pub rules: Vec<RuleResponse>,
}

/// Result of applying one policy to one resource.
#[derive(Debug, Clone)]
pub struct EngineResponse {
    pub policy: AnyPolicy,
    pub policy_response: PolicyResponse,
    pub patched_resource: DynamicObject,
}

impl EngineResponse {
    pub fn new(policy: AnyPolicy, patched_resource: DynamicObject) -> Self {
        Self {
            policy,
            policy_response: PolicyResponse::default(),
            patched_resource,
        }
    }

    pub fn with_rules(mut self, rules: Vec<RuleResponse>) -> Self {
        self.policy_response.rules = rules;
        self
    }

    /// False as soon as one rule failed or errored.
    pub fn is_successful(&self) -> bool {
        !self
            .policy_response
            .rules
            .iter()
            .any(|r| matches!(r.status, RuleStatus::Fail | RuleStatus::Error))
    }
}

#[cfg(test)]
mod tests {
    use kube::core::{ApiResource, GroupVersionKind};

    use super::*;
    use crate::policy::testing::*;
    use crate::policy::Spec;

    fn response(statuses: &[RuleStatus]) -> EngineResponse {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "Pod"));
        EngineResponse::new(
            cluster_policy("p", Spec::default(), true).into(),
            DynamicObject::new("nginx", &ar),
        )
        .with_rules(
            statuses
                .iter()
                .enumerate()
                .map(|(i, s)| RuleResponse::new(format!("r{i}"), RuleType::Mutate, *s))
                .collect(),
        )
    }

    #[test]
    fn test_is_successful() {
        assert!(response(&[]).is_successful());
        assert!(response(&[RuleStatus::Pass, RuleStatus::Skip, RuleStatus::Warn]).is_successful());
        assert!(!response(&[RuleStatus::Pass, RuleStatus::Fail]).is_successful());
        assert!(!response(&[RuleStatus::Error]).is_successful());
    }
}
