pub mod autogen;

use std::collections::BTreeMap;
use std::ops::Deref;

use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Validation failure action declared on a policy spec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationFailureAction {
    #[serde(alias = "enforce")]
    Enforce,
    #[default]
    #[serde(alias = "audit")]
    Audit,
}

impl ValidationFailureAction {
    pub fn enforce(self) -> bool {
        matches!(self, ValidationFailureAction::Enforce)
    }
}

/// Spec shared by `ClusterPolicy` and `Policy`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub validation_failure_action: ValidationFailureAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<bool>,
    /// Spec fields not interpreted here (failurePolicy, webhookTimeoutSeconds,
    /// admission, ...). Kept so spec equality covers the whole object.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Spec {
    /// Background scans are on unless explicitly disabled.
    pub fn background_processing_enabled(&self) -> bool {
        self.background.unwrap_or(true)
    }

    pub fn validation_failure_action(&self) -> ValidationFailureAction {
        self.validation_failure_action
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,
    #[serde(rename = "match", default)]
    pub match_resources: MatchResources,
    #[serde(rename = "exclude", default, skip_serializing_if = "Option::is_none")]
    pub exclude_resources: Option<MatchResources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutate: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_images: Option<Value>,
    /// preconditions, context, celPreconditions and the like.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchResources {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<ResourceFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<ResourceFilter>,
    #[serde(default)]
    pub resources: ResourceDescription,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceFilter {
    #[serde(default)]
    pub resources: ResourceDescription,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescription {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl MatchResources {
    pub fn descriptions(&self) -> impl Iterator<Item = &ResourceDescription> {
        std::iter::once(&self.resources)
            .chain(self.any.iter().map(|f| &f.resources))
            .chain(self.all.iter().map(|f| &f.resources))
    }
}

/// Rule categories; a rule falls into exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleType {
    Validate,
    Mutate,
    Generate,
    ImageVerify,
    Empty,
}

impl RuleType {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleType::Validate => "validate",
            RuleType::Mutate => "mutate",
            RuleType::Generate => "generate",
            RuleType::ImageVerify => "imageVerify",
            RuleType::Empty => "-",
        }
    }
}

impl Rule {
    pub fn rule_type(&self) -> RuleType {
        if self.validate.is_some() {
            RuleType::Validate
        } else if self.mutate.is_some() {
            RuleType::Mutate
        } else if self.generate.is_some() {
            RuleType::Generate
        } else if self.verify_images.is_some() {
            RuleType::ImageVerify
        } else {
            RuleType::Empty
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyStatus {
    #[serde(default)]
    pub ready: bool,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "kyverno.io",
    version = "v1",
    kind = "ClusterPolicy",
    status = "PolicyStatus",
    derive = "PartialEq",
    schema = "disabled"
)]
pub struct ClusterPolicySpec {
    #[serde(flatten)]
    pub inner: Spec,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "kyverno.io",
    version = "v1",
    kind = "Policy",
    namespaced,
    status = "PolicyStatus",
    derive = "PartialEq",
    schema = "disabled"
)]
pub struct PolicySpec {
    #[serde(flatten)]
    pub inner: Spec,
}

impl Deref for ClusterPolicySpec {
    type Target = Spec;

    fn deref(&self) -> &Spec {
        &self.inner
    }
}

impl Deref for PolicySpec {
    type Target = Spec;

    fn deref(&self) -> &Spec {
        &self.inner
    }
}

impl From<Spec> for ClusterPolicySpec {
    fn from(inner: Spec) -> Self {
        Self { inner }
    }
}

impl From<Spec> for PolicySpec {
    fn from(inner: Spec) -> Self {
        Self { inner }
    }
}

/// A policy of either scope, exposing the accessors metrics need.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyPolicy {
    Cluster(ClusterPolicy),
    Namespaced(Policy),
}

impl AnyPolicy {
    pub fn name(&self) -> String {
        match self {
            AnyPolicy::Cluster(p) => p.name_any(),
            AnyPolicy::Namespaced(p) => p.name_any(),
        }
    }

    /// Empty for cluster-scoped policies.
    pub fn namespace(&self) -> String {
        match self {
            AnyPolicy::Cluster(_) => String::new(),
            AnyPolicy::Namespaced(p) => p.namespace().unwrap_or_default(),
        }
    }

    pub fn spec(&self) -> &Spec {
        match self {
            AnyPolicy::Cluster(p) => &p.spec.inner,
            AnyPolicy::Namespaced(p) => &p.spec.inner,
        }
    }

    pub fn is_ready(&self) -> bool {
        let status = match self {
            AnyPolicy::Cluster(p) => p.status.as_ref(),
            AnyPolicy::Namespaced(p) => p.status.as_ref(),
        };
        status.is_some_and(|s| s.ready)
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        match self {
            AnyPolicy::Cluster(p) => p.annotations(),
            AnyPolicy::Namespaced(p) => p.annotations(),
        }
    }
}

impl From<ClusterPolicy> for AnyPolicy {
    fn from(policy: ClusterPolicy) -> Self {
        AnyPolicy::Cluster(policy)
    }
}

impl From<Policy> for AnyPolicy {
    fn from(policy: Policy) -> Self {
        AnyPolicy::Namespaced(policy)
    }
}
