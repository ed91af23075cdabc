use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::debug;

use super::{AnyPolicy, MatchResources, ResourceDescription, Rule, Spec};

pub const AUTOGEN_CONTROLLERS_ANNOTATION: &str = "pod-policies.kyverno.io/autogen-controllers";

const POD_CONTROLLERS: [&str; 7] = [
    "DaemonSet",
    "Deployment",
    "Job",
    "StatefulSet",
    "ReplicaSet",
    "ReplicationController",
    "CronJob",
];

const CRONJOB: &str = "CronJob";
const AUTOGEN_PREFIX: &str = "autogen";
const AUTOGEN_CRONJOB_PREFIX: &str = "autogen-cronjob";
const MAX_RULE_NAME_LEN: usize = 63;

/// Returns the rule set a policy is effectively evaluated with: declared rules
/// followed by the rules synthesized for pod controllers.
pub fn compute_rules(policy: &AnyPolicy) -> Vec<Rule> {
    let spec = policy.spec();
    let annotation = policy.annotations().get(AUTOGEN_CONTROLLERS_ANNOTATION);
    let Some(controllers) = controllers_for(spec, annotation) else {
        return spec.rules.clone();
    };

    let generated = generate_rules(&spec.rules, &controllers);
    if generated.is_empty() {
        return spec.rules.clone();
    }

    spec.rules
        .iter()
        .filter(|rule| !is_autogen_rule_name(&rule.name))
        .cloned()
        .chain(generated)
        .collect()
}

pub fn is_autogen_rule_name(name: &str) -> bool {
    name.starts_with("autogen-")
}

fn controllers_for(spec: &Spec, annotation: Option<&String>) -> Option<BTreeSet<String>> {
    if !can_auto_gen(spec) {
        return None;
    }
    let controllers: BTreeSet<String> = match annotation.map(|a| a.trim()) {
        None => POD_CONTROLLERS.iter().map(|c| c.to_string()).collect(),
        Some("none") | Some("") => return None,
        Some(list) => list
            .split(',')
            .map(|c| c.trim())
            .filter(|c| POD_CONTROLLERS.contains(c))
            .map(str::to_string)
            .collect(),
    };
    (!controllers.is_empty()).then_some(controllers)
}

fn can_auto_gen(spec: &Spec) -> bool {
    let mut needed = false;
    for rule in &spec.rules {
        if rule.generate.is_some() || has_json6902_patches(rule) {
            return false;
        }
        let descriptions = rule
            .match_resources
            .descriptions()
            .chain(rule.exclude_resources.iter().flat_map(|e| e.descriptions()));
        for desc in descriptions {
            if !desc.name.is_empty()
                || !desc.names.is_empty()
                || desc.selector.is_some()
                || desc.annotations.is_some()
                || (desc.kinds.len() > 1 && desc.kinds.iter().any(|k| k == "Pod"))
            {
                debug!(rule = %rule.name, "skip generating rule on pod controllers");
                return false;
            }
            needed |= desc
                .kinds
                .iter()
                .any(|k| k == "Pod" || POD_CONTROLLERS.contains(&k.as_str()));
        }
    }
    needed
}

fn has_json6902_patches(rule: &Rule) -> bool {
    let Some(mutate) = &rule.mutate else {
        return false;
    };
    let non_empty = |v: Option<&Value>| v.and_then(Value::as_str).is_some_and(|s| !s.is_empty());
    non_empty(mutate.get("patchesJson6902"))
        || mutate
            .get("foreach")
            .and_then(Value::as_array)
            .is_some_and(|items| items.iter().any(|f| non_empty(f.get("patchesJson6902"))))
}

fn matches_pod(rule: &Rule) -> bool {
    rule.match_resources
        .descriptions()
        .any(|desc| desc.kinds.iter().any(|k| k == "Pod"))
}

fn generate_rules(rules: &[Rule], controllers: &BTreeSet<String>) -> Vec<Rule> {
    let standard: Vec<String> = controllers
        .iter()
        .filter(|c| c.as_str() != CRONJOB)
        .cloned()
        .collect();
    let mut generated = Vec::new();

    for rule in rules.iter().filter(|r| !is_autogen_rule_name(&r.name) && matches_pod(r)) {
        if !standard.is_empty() {
            generated.push(convert_rule(rule, AUTOGEN_PREFIX, &standard, &["spec", "template"]));
        }
        if controllers.contains(CRONJOB) {
            generated.push(convert_rule(
                rule,
                AUTOGEN_CRONJOB_PREFIX,
                &[CRONJOB.to_string()],
                &["spec", "jobTemplate", "spec", "template"],
            ));
        }
    }
    generated
}

fn autogen_rule_name(prefix: &str, name: &str) -> String {
    let mut full = format!("{prefix}-{name}");
    if full.len() > MAX_RULE_NAME_LEN {
        let mut end = MAX_RULE_NAME_LEN;
        while !full.is_char_boundary(end) {
            end -= 1;
        }
        full.truncate(end);
    }
    full
}

fn convert_rule(rule: &Rule, prefix: &str, kinds: &[String], nest_under: &[&str]) -> Rule {
    Rule {
        name: autogen_rule_name(prefix, &rule.name),
        match_resources: replace_kinds(&rule.match_resources, kinds),
        exclude_resources: rule.exclude_resources.as_ref().map(|e| replace_kinds(e, kinds)),
        validate: rule.validate.as_ref().map(|v| {
            nest_fields(v, &["pattern", "anyPattern"], nest_under)
        }),
        mutate: rule.mutate.as_ref().map(|m| {
            nest_fields(m, &["patchStrategicMerge"], nest_under)
        }),
        generate: None,
        verify_images: rule.verify_images.clone(),
        extra: rule.extra.clone(),
    }
}

fn replace_kinds(resources: &MatchResources, kinds: &[String]) -> MatchResources {
    let swap = |desc: &ResourceDescription| {
        let mut desc = desc.clone();
        if desc.kinds.iter().any(|k| k == "Pod") {
            desc.kinds = kinds.to_vec();
        }
        desc
    };
    let mut out = resources.clone();
    out.resources = swap(&resources.resources);
    for filter in out.any.iter_mut().chain(out.all.iter_mut()) {
        filter.resources = swap(&filter.resources);
    }
    out
}

/// Wraps the named fields of `body` so a Pod-shaped pattern applies to the
/// pod template of a controller.
fn nest_fields(body: &Value, fields: &[&str], nest_under: &[&str]) -> Value {
    let mut body = body.clone();
    if let Some(obj) = body.as_object_mut() {
        for field in fields {
            if let Some(value) = obj.remove(*field) {
                let nested = match value {
                    Value::Array(items) => {
                        Value::Array(items.into_iter().map(|v| nest(v, nest_under)).collect())
                    }
                    other => nest(other, nest_under),
                };
                obj.insert(field.to_string(), nested);
            }
        }
    }
    body
}

fn nest(value: Value, path: &[&str]) -> Value {
    path.iter().rev().fold(value, |inner, key| {
        let mut map = Map::new();
        map.insert(key.to_string(), inner);
        Value::Object(map)
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::policy::testing::*;
    use crate::policy::ClusterPolicy;

    fn policy_with(rules: Vec<Rule>, annotation: Option<&str>) -> AnyPolicy {
        let mut policy: ClusterPolicy = cluster_policy(
            "require-labels",
            Spec {
                rules,
                ..Default::default()
            },
            true,
        );
        if let Some(value) = annotation {
            policy.metadata.annotations = Some(
                [(AUTOGEN_CONTROLLERS_ANNOTATION.to_string(), value.to_string())]
                    .into_iter()
                    .collect(),
            );
        }
        policy.into()
    }

    fn names(rules: &[Rule]) -> Vec<&str> {
        rules.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_pod_rule_expands_to_controllers() {
        let rules = compute_rules(&policy_with(vec![validate_rule("check-labels")], None));
        assert_eq!(
            names(&rules),
            vec!["check-labels", "autogen-check-labels", "autogen-cronjob-check-labels"]
        );

        let kinds = &rules[1].match_resources.resources.kinds;
        assert!(kinds.contains(&"Deployment".to_string()));
        assert!(!kinds.contains(&"CronJob".to_string()));
        assert_eq!(rules[2].match_resources.resources.kinds, vec!["CronJob"]);

        assert_eq!(
            rules[1].validate.as_ref().unwrap()["pattern"],
            json!({"spec": {"template": {"metadata": {"labels": {"app": "?*"}}}}})
        );
        assert_eq!(
            rules[2].validate.as_ref().unwrap()["pattern"],
            json!({"spec": {"jobTemplate": {"spec": {"template": {"metadata": {"labels": {"app": "?*"}}}}}}})
        );
    }

    #[test]
    fn test_annotation_none_disables_autogen() {
        let rules = compute_rules(&policy_with(vec![validate_rule("check-labels")], Some("none")));
        assert_eq!(names(&rules), vec!["check-labels"]);
    }

    #[test]
    fn test_annotation_selects_controllers() {
        let rules = compute_rules(&policy_with(
            vec![validate_rule("check-labels")],
            Some("Deployment,StatefulSet"),
        ));
        assert_eq!(names(&rules), vec!["check-labels", "autogen-check-labels"]);
        assert_eq!(
            rules[1].match_resources.resources.kinds,
            vec!["Deployment", "StatefulSet"]
        );
    }

    #[test]
    fn test_generate_rule_disables_autogen() {
        let mut generate = validate_rule("gen");
        generate.validate = None;
        generate.generate = Some(json!({"kind": "ConfigMap"}));
        let rules = compute_rules(&policy_with(vec![validate_rule("check-labels"), generate], None));
        assert_eq!(names(&rules), vec!["check-labels", "gen"]);
    }

    #[test]
    fn test_selector_disables_autogen() {
        let mut rule = validate_rule("check-labels");
        rule.match_resources.resources.selector = Some(json!({"matchLabels": {"app": "web"}}));
        let rules = compute_rules(&policy_with(vec![rule], None));
        assert_eq!(names(&rules), vec!["check-labels"]);
    }

    #[test]
    fn test_annotations_disable_autogen() {
        let mut rule = validate_rule("check-labels");
        rule.match_resources.resources.annotations =
            Some([("team".to_string(), "a".to_string())].into_iter().collect());
        let rules = compute_rules(&policy_with(vec![rule], None));
        assert_eq!(names(&rules), vec!["check-labels"]);
    }

    #[test]
    fn test_generated_rules_keep_preconditions() {
        let mut rule = validate_rule("check-labels");
        let preconditions = json!({"all": [{"key": "{{ request.operation }}", "operator": "Equals", "value": "CREATE"}]});
        rule.extra.insert("preconditions".to_string(), preconditions.clone());
        let rules = compute_rules(&policy_with(vec![rule], Some("Deployment")));
        assert_eq!(names(&rules), vec!["check-labels", "autogen-check-labels"]);
        assert_eq!(rules[1].extra["preconditions"], preconditions);
    }

    #[test]
    fn test_mixed_kinds_disable_autogen() {
        let mut rule = validate_rule("check-labels");
        rule.match_resources.resources.kinds = vec!["Pod".to_string(), "Deployment".to_string()];
        let rules = compute_rules(&policy_with(vec![rule], None));
        assert_eq!(names(&rules), vec!["check-labels"]);
    }

    #[test]
    fn test_json6902_mutation_disables_autogen() {
        let mut rule = validate_rule("patch");
        rule.validate = None;
        rule.mutate = Some(json!({"patchesJson6902": "- op: add\n  path: /x\n  value: y"}));
        let rules = compute_rules(&policy_with(vec![rule], None));
        assert_eq!(names(&rules), vec!["patch"]);
    }

    #[test]
    fn test_stale_autogen_rules_are_replaced() {
        let rules = compute_rules(&policy_with(
            vec![validate_rule("check-labels"), validate_rule("autogen-check-labels")],
            Some("Deployment"),
        ));
        assert_eq!(names(&rules), vec!["check-labels", "autogen-check-labels"]);
        assert_eq!(rules[1].match_resources.resources.kinds, vec!["Deployment"]);
    }

    #[test]
    fn test_non_pod_rule_is_untouched() {
        let mut rule = validate_rule("check-ns");
        rule.match_resources.resources.kinds = vec!["Namespace".to_string()];
        let rules = compute_rules(&policy_with(vec![rule], None));
        assert_eq!(names(&rules), vec!["check-ns"]);
    }

    #[test]
    fn test_autogen_rule_name_is_truncated() {
        let name = autogen_rule_name(AUTOGEN_CRONJOB_PREFIX, &"x".repeat(80));
        assert_eq!(name.len(), MAX_RULE_NAME_LEN);
        assert!(name.starts_with("autogen-cronjob-x"));
    }
}
