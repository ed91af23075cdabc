use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tokio::sync::watch;
use tracing::info;

use crate::config::MetricsConfig;
use crate::policy::{RuleType, ValidationFailureAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyValidationMode {
    Enforce,
    Audit,
}

impl PolicyValidationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyValidationMode::Enforce => "enforce",
            PolicyValidationMode::Audit => "audit",
        }
    }
}

impl From<ValidationFailureAction> for PolicyValidationMode {
    fn from(action: ValidationFailureAction) -> Self {
        if action.enforce() {
            PolicyValidationMode::Enforce
        } else {
            PolicyValidationMode::Audit
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyType {
    Cluster,
    Namespaced,
}

impl PolicyType {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyType::Cluster => "cluster",
            PolicyType::Namespaced => "namespaced",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyBackgroundMode {
    True,
    False,
}

impl PolicyBackgroundMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyBackgroundMode::True => "true",
            PolicyBackgroundMode::False => "false",
        }
    }
}

impl From<bool> for PolicyBackgroundMode {
    fn from(enabled: bool) -> Self {
        if enabled {
            PolicyBackgroundMode::True
        } else {
            PolicyBackgroundMode::False
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyChangeType {
    Created,
    Updated,
    Deleted,
}

impl PolicyChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyChangeType::Created => "created",
            PolicyChangeType::Updated => "updated",
            PolicyChangeType::Deleted => "deleted",
        }
    }
}

/// Namespace label reported for cluster-scoped policies.
pub const CLUSTER_NAMESPACE_SENTINEL: &str = "-";

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, EncodeLabelSet)]
pub struct PolicyRuleInfoLabels {
    pub policy_validation_mode: &'static str,
    pub policy_type: &'static str,
    pub policy_background_mode: &'static str,
    pub policy_namespace: String,
    pub policy_name: String,
    pub rule_name: String,
    pub rule_type: &'static str,
    pub status: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, EncodeLabelSet)]
pub struct PolicyChangesLabels {
    pub policy_validation_mode: &'static str,
    pub policy_type: &'static str,
    pub policy_background_mode: &'static str,
    pub policy_namespace: String,
    pub policy_name: String,
    pub policy_change_type: &'static str,
}

impl PolicyRuleInfoLabels {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        validation_mode: PolicyValidationMode,
        policy_type: PolicyType,
        background_mode: PolicyBackgroundMode,
        namespace: String,
        policy_name: String,
        rule_name: String,
        rule_type: RuleType,
        ready: bool,
    ) -> Self {
        Self {
            policy_validation_mode: validation_mode.as_str(),
            policy_type: policy_type.as_str(),
            policy_background_mode: background_mode.as_str(),
            policy_namespace: namespace,
            policy_name,
            rule_name,
            rule_type: rule_type.as_str(),
            status: if ready { "true" } else { "false" },
        }
    }
}

/// Destination of policy metric emissions.
pub trait MetricsSink: Send + Sync {
    fn record_policy_rule_info(&self, labels: PolicyRuleInfoLabels, value: f64);

    fn record_policy_changes(&self, labels: PolicyChangesLabels);

    fn config(&self) -> &MetricsConfig;
}

pub struct KyvernoMetrics {
    pub policy_rule_info: Family<PolicyRuleInfoLabels, Gauge<f64, AtomicU64>>,
    pub policy_changes: Family<PolicyChangesLabels, Counter>,
    config: MetricsConfig,
}

impl KyvernoMetrics {
    pub fn new(registry: &mut Registry, config: MetricsConfig) -> Self {
        let policy_rule_info = Family::<PolicyRuleInfoLabels, Gauge<f64, AtomicU64>>::default();
        registry.register(
            "kyverno_policy_rule_info_total",
            "Info of the rules or policies present in the cluster: 0 means the rule doesn't exist \
             and has been deleted, 1 means the rule is currently existent in the cluster",
            policy_rule_info.clone(),
        );

        let policy_changes = Family::<PolicyChangesLabels, Counter>::default();
        registry.register(
            "kyverno_policy_changes",
            "Changes associated with the policies present on the cluster such as creation, \
             updates and deletions",
            policy_changes.clone(),
        );

        Self {
            policy_rule_info,
            policy_changes,
            config,
        }
    }

    pub fn reset(&self) {
        self.policy_rule_info.clear();
        self.policy_changes.clear();
    }
}

impl MetricsSink for KyvernoMetrics {
    fn record_policy_rule_info(&self, labels: PolicyRuleInfoLabels, value: f64) {
        self.policy_rule_info.get_or_create(&labels).set(value);
    }

    fn record_policy_changes(&self, labels: PolicyChangesLabels) {
        self.policy_changes.get_or_create(&labels).inc();
    }

    fn config(&self) -> &MetricsConfig {
        &self.config
    }
}

/// Clears all policy metrics every `interval` until shutdown.
pub async fn run_periodic_refresh(
    metrics: Arc<KyvernoMetrics>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<()>,
) {
    info!(interval_secs = interval.as_secs(), "configuring periodic metrics refresh");
    let mut ticker = tokio::time::interval(interval);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                info!("resetting the metrics as per their periodic refresh");
                metrics.reset();
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}
