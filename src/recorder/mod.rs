pub mod filter;
pub mod info;
pub mod policy_changes;
pub mod rule_info;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::informer::{DeleteEvent, EventHandler};
use crate::metrics::{MetricsSink, PolicyChangeType};
use crate::policy::{AnyPolicy, ClusterPolicy, Policy};

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("failed to decode last known state of '{key}': {source}")]
    Extraction {
        key: String,
        source: serde_json::Error,
    },
    #[error("inconsistent change kind '{0}' for rule info metric")]
    InconsistentChangeKind(&'static str),
}

/// A unit of metric work, executed off the informer callback.
#[derive(Debug)]
pub enum Emission {
    RuleInfoAdd(AnyPolicy),
    RuleInfoRemove(AnyPolicy),
    RuleInfoUpdate { old: AnyPolicy, new: AnyPolicy },
    PolicyChange(AnyPolicy, PolicyChangeType),
    PolicyChangeUpdate { old: AnyPolicy, new: AnyPolicy },
}

impl Emission {
    fn kind(&self) -> &'static str {
        match self {
            Emission::RuleInfoAdd(_) => "rule_info_add",
            Emission::RuleInfoRemove(_) => "rule_info_remove",
            Emission::RuleInfoUpdate { .. } => "rule_info_update",
            Emission::PolicyChange(..) => "policy_change",
            Emission::PolicyChangeUpdate { .. } => "policy_change_update",
        }
    }

    fn execute(self, sink: &dyn MetricsSink) {
        let result = match self {
            Emission::RuleInfoAdd(policy) => rule_info::add_policy(sink, &policy),
            Emission::RuleInfoRemove(policy) => rule_info::remove_policy(sink, &policy),
            Emission::RuleInfoUpdate { old, new } => {
                rule_info::remove_policy(sink, &old).and_then(|_| rule_info::add_policy(sink, &new))
            }
            Emission::PolicyChange(policy, change) => {
                policy_changes::register_policy(sink, &policy, change);
                Ok(())
            }
            Emission::PolicyChangeUpdate { old, new } => {
                policy_changes::register_update(sink, &old, &new);
                Ok(())
            }
        };
        if let Err(e) = result {
            error!("error occurred while registering kyverno_policy_rule_info_total metrics: {e}");
        }
    }
}

/// Receives policy informer callbacks and hands metric work to the worker pool
/// without blocking the caller.
pub struct PolicyMetricsController {
    queue: mpsc::Sender<Emission>,
}

pub struct EmissionWorker {
    queue: mpsc::Receiver<Emission>,
    sink: Arc<dyn MetricsSink>,
}

impl PolicyMetricsController {
    pub fn new(sink: Arc<dyn MetricsSink>, capacity: usize) -> (Self, EmissionWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { queue: tx }, EmissionWorker { queue: rx, sink })
    }

    fn submit(&self, emission: Emission) {
        let kind = emission.kind();
        if let Err(e) = self.queue.try_send(emission) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "queue closed",
            };
            warn!(emission = kind, reason, "dropping policy metric emission");
        }
    }

    fn added(&self, policy: AnyPolicy) {
        self.submit(Emission::RuleInfoAdd(policy.clone()));
        self.submit(Emission::PolicyChange(policy, PolicyChangeType::Created));
    }

    fn updated(&self, old: AnyPolicy, new: AnyPolicy) {
        self.submit(Emission::RuleInfoUpdate {
            old: old.clone(),
            new: new.clone(),
        });
        self.submit(Emission::PolicyChangeUpdate { old, new });
    }

    fn deleted(&self, policy: AnyPolicy) {
        self.submit(Emission::RuleInfoRemove(policy.clone()));
        self.submit(Emission::PolicyChange(policy, PolicyChangeType::Deleted));
    }

    fn unwrap_deleted<K>(event: DeleteEvent<K>) -> Option<K>
    where
        K: serde::de::DeserializeOwned,
    {
        match event.into_object() {
            Ok(obj) => Some(obj),
            Err(e) => {
                error!("failed to unwrap deleted policy: {e}");
                None
            }
        }
    }

    pub fn add_cluster_policy(&self, policy: ClusterPolicy) {
        self.added(policy.into());
    }

    pub fn update_cluster_policy(&self, old: ClusterPolicy, new: ClusterPolicy) {
        self.updated(old.into(), new.into());
    }

    pub fn delete_cluster_policy(&self, event: DeleteEvent<ClusterPolicy>) {
        if let Some(policy) = Self::unwrap_deleted(event) {
            self.deleted(policy.into());
        }
    }

    pub fn add_policy(&self, policy: Policy) {
        self.added(policy.into());
    }

    pub fn update_policy(&self, old: Policy, new: Policy) {
        self.updated(old.into(), new.into());
    }

    pub fn delete_policy(&self, event: DeleteEvent<Policy>) {
        if let Some(policy) = Self::unwrap_deleted(event) {
            self.deleted(policy.into());
        }
    }
}

impl EventHandler<ClusterPolicy> for PolicyMetricsController {
    fn on_add(&self, obj: ClusterPolicy) {
        self.add_cluster_policy(obj);
    }

    fn on_update(&self, old: ClusterPolicy, new: ClusterPolicy) {
        self.update_cluster_policy(old, new);
    }

    fn on_delete(&self, event: DeleteEvent<ClusterPolicy>) {
        self.delete_cluster_policy(event);
    }
}

impl EventHandler<Policy> for PolicyMetricsController {
    fn on_add(&self, obj: Policy) {
        self.add_policy(obj);
    }

    fn on_update(&self, old: Policy, new: Policy) {
        self.update_policy(old, new);
    }

    fn on_delete(&self, event: DeleteEvent<Policy>) {
        self.delete_policy(event);
    }
}

impl EmissionWorker {
    /// Drains the queue with `workers` concurrent tasks until every
    /// controller handle has been dropped.
    pub async fn run(self, workers: usize) {
        let queue = Arc::new(Mutex::new(self.queue));
        let mut tasks = JoinSet::new();

        for _ in 0..workers.max(1) {
            let queue = queue.clone();
            let sink = self.sink.clone();
            tasks.spawn(async move {
                loop {
                    let next = queue.lock().await.recv().await;
                    match next {
                        Some(emission) => emission.execute(sink.as_ref()),
                        None => break,
                    }
                }
            });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("metrics worker terminated abnormally: {e}");
            }
        }
    }
}
