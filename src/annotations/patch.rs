use json_patch::jsonptr::PointerBuf;
use json_patch::{AddOperation, PatchOperation, RemoveOperation, ReplaceOperation};
use serde::Deserialize;
use serde_json::Value;

/// JSON patch verbs as they appear in raw rule patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Add,
    Remove,
    Replace,
    Move,
    Copy,
    Test,
}

impl Op {
    pub fn past_tense(self) -> &'static str {
        match self {
            Op::Add => "added",
            Op::Remove => "removed",
            Op::Replace => "replaced",
            Op::Move => "moved",
            Op::Copy => "copied",
            Op::Test => "tested",
        }
    }
}

/// The parts of a raw patch operation that annotations report.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawPatch {
    pub op: Op,
    pub path: String,
}

impl RawPatch {
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

pub fn annotations_path() -> PointerBuf {
    PointerBuf::from_tokens(["metadata", "annotations"])
}

/// Pointer to a single annotation; `/` in the key is escaped as `~1`.
pub fn annotation_path(key: &str) -> PointerBuf {
    PointerBuf::from_tokens(["metadata", "annotations", key])
}

pub fn add(path: PointerBuf, value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation { path, value })
}

pub fn replace(path: PointerBuf, value: Value) -> PatchOperation {
    PatchOperation::Replace(ReplaceOperation { path, value })
}

pub fn remove(path: PointerBuf) -> PatchOperation {
    PatchOperation::Remove(RemoveOperation { path })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_raw_patch() {
        let patch = RawPatch::parse(
            br#"{"op":"replace","path":"/spec/containers/0/imagePullPolicy","value":"IfNotPresent"}"#,
        )
        .unwrap();
        assert_eq!(patch.op, Op::Replace);
        assert_eq!(patch.path, "/spec/containers/0/imagePullPolicy");
    }

    #[test]
    fn test_parse_rejects_unknown_op() {
        assert!(RawPatch::parse(br#"{"op":"merge","path":"/a"}"#).is_err());
        assert!(RawPatch::parse(b"not json").is_err());
    }

    #[test]
    fn test_past_tense() {
        let cases = [
            (Op::Add, "added"),
            (Op::Remove, "removed"),
            (Op::Replace, "replaced"),
            (Op::Move, "moved"),
            (Op::Copy, "copied"),
            (Op::Test, "tested"),
        ];
        for (op, expected) in cases {
            assert_eq!(op.past_tense(), expected);
        }
    }

    #[test]
    fn test_annotation_path_escapes_slash() {
        assert_eq!(
            annotation_path("policies.kyverno.io/patches").to_string(),
            "/metadata/annotations/policies.kyverno.io~1patches"
        );
        assert_eq!(annotations_path().to_string(), "/metadata/annotations");
    }

    #[test]
    fn test_operations_serialize_as_rfc6902() {
        let ops = vec![
            remove(annotation_path("a/b")),
            replace(annotation_path("c"), json!("v")),
            add(annotations_path(), json!({"k": "v"})),
        ];
        assert_eq!(
            serde_json::to_value(&ops).unwrap(),
            json!([
                {"op": "remove", "path": "/metadata/annotations/a~1b"},
                {"op": "replace", "path": "/metadata/annotations/c", "value": "v"},
                {"op": "add", "path": "/metadata/annotations", "value": {"k": "v"}},
            ])
        );
    }
}
