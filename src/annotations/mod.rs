pub mod patch;

use std::collections::BTreeMap;

use json_patch::Patch;
use serde_json::Value;
use tracing::{debug, error};

use crate::engine::EngineResponse;

use self::patch::{Op, RawPatch};

pub const LAST_APPLIED_PATCHES_ANNOTATION: &str = "policies.kyverno.io/last-applied-patches";
pub const DEPRECATED_PATCHES_ANNOTATION: &str = "policies.kyverno.io/patches";

#[derive(Debug, Clone, PartialEq, Eq)]
struct RulePatch {
    rule_name: String,
    op: Op,
    path: String,
}

fn rule_patches(response: &EngineResponse) -> Vec<RulePatch> {
    let mut out = Vec::new();
    for rule in &response.policy_response.rules {
        for raw in rule.patches.iter().filter(|raw| !raw.is_empty()) {
            match RawPatch::parse(raw) {
                Ok(RawPatch { op, path }) => out.push(RulePatch {
                    rule_name: rule.name.clone(),
                    op,
                    path,
                }),
                Err(e) => error!(
                    rule = %rule.name,
                    patch = %String::from_utf8_lossy(raw),
                    "failed to parse JSON patch: {e}"
                ),
            }
        }
    }
    out
}

/// Builds the patch operations that record, on the patched resource, which rule
/// changed which path. Returns `None` when no successful rule patched anything.
///
/// Entries are keyed by rule and policy, so when a rule patches several paths
/// only the last one is kept.
pub fn generate_annotation_patches(responses: &[EngineResponse]) -> Option<Patch> {
    let mut annotations: BTreeMap<String, String> = responses
        .iter()
        .find_map(|r| r.patched_resource.metadata.annotations.clone())
        .unwrap_or_default();

    let mut content = BTreeMap::new();
    for response in responses {
        if !response.is_successful() {
            debug!(policy = %response.policy.name(), "skipping annotation for failed policy response");
            continue;
        }
        let policy_name = response.policy.name();
        for p in rule_patches(response) {
            content.insert(
                format!("{}.{policy_name}.kyverno.io", p.rule_name),
                format!("{} {}", p.op.past_tense(), p.path),
            );
        }
    }

    if content.is_empty() {
        return None;
    }

    let value = match serde_yaml::to_string(&content) {
        Ok(v) => v,
        Err(e) => {
            error!("failed to serialize annotation content: {e}");
            return None;
        }
    };

    let mut ops = Vec::new();
    if annotations.contains_key(LAST_APPLIED_PATCHES_ANNOTATION) {
        remove_deprecated(&mut annotations, &mut ops);
        ops.push(patch::replace(
            patch::annotation_path(LAST_APPLIED_PATCHES_ANNOTATION),
            Value::String(value),
        ));
    } else if !annotations.is_empty() {
        remove_deprecated(&mut annotations, &mut ops);
        ops.push(patch::add(
            patch::annotation_path(LAST_APPLIED_PATCHES_ANNOTATION),
            Value::String(value),
        ));
    } else {
        let mut entry = serde_json::Map::new();
        entry.insert(LAST_APPLIED_PATCHES_ANNOTATION.to_string(), Value::String(value));
        ops.push(patch::add(patch::annotations_path(), Value::Object(entry)));
    }

    Some(Patch(ops))
}

fn remove_deprecated(
    annotations: &mut BTreeMap<String, String>,
    ops: &mut Vec<json_patch::PatchOperation>,
) {
    if annotations.remove(DEPRECATED_PATCHES_ANNOTATION).is_some() {
        ops.push(patch::remove(patch::annotation_path(DEPRECATED_PATCHES_ANNOTATION)));
    }
}
