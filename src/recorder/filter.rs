use crate::metrics::CLUSTER_NAMESPACE_SENTINEL;

/// Decides whether metrics for a policy in `namespace` are suppressed by the
/// configured include/exclude lists. Cluster-scoped policies are never skipped.
pub fn should_skip(namespace: &str, include: &[String], exclude: &[String]) -> bool {
    if namespace.is_empty() || namespace == CLUSTER_NAMESPACE_SENTINEL {
        return false;
    }
    if exclude.iter().any(|ns| ns == namespace) {
        return true;
    }
    !include.is_empty() && !include.iter().any(|ns| ns == namespace)
}
