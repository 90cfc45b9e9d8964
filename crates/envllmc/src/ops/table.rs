//! Declarative operation definitions.
//!
//! An op table maps op names to typed keyword signatures, capability
//! requirements, and result kinds. Tables load from JSON files
//! (`{ "version": .., "ops": [..] }`) or from the static module bundle.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::value::{Kind, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub kw: String,
    /// Absent for untyped (any-kind) and enum parameters.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<Kind>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<String>,
}

impl Param {
    pub fn typed(kw: &str, ty: Kind) -> Self {
        Self {
            kw: kw.to_string(),
            ty: Some(ty),
            variants: Vec::new(),
        }
    }

    pub fn untyped(kw: &str) -> Self {
        Self {
            kw: kw.to_string(),
            ty: None,
            variants: Vec::new(),
        }
    }

    pub fn enumerated(kw: &str, variants: &[&str]) -> Self {
        Self {
            kw: kw.to_string(),
            ty: None,
            variants: variants.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpDef {
    pub name: String,
    pub capabilities: Vec<String>,
    pub result_type: Kind,
    pub signature: Vec<Param>,
    pub into: bool,
}

impl OpDef {
    /// Canonical statement template used in lint hints.
    pub fn canonical_template(&self) -> String {
        let mut out = self.name.clone();
        for p in &self.signature {
            out.push(' ');
            out.push_str(&p.kw);
            out.push_str(" <expr>");
        }
        if self.into {
            out.push_str(" INTO <ident>");
            out.push_str(": ");
            out.push_str(self.result_type.as_str());
        }
        out
    }

    pub fn is_pure(&self) -> bool {
        self.capabilities
            .iter()
            .all(|c| c == envllm_contracts::CAP_PURE)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    pub version: String,
    ops: BTreeMap<String, OpDef>,
}

#[derive(Debug, Deserialize)]
struct TableFile {
    version: String,
    ops: Vec<OpDef>,
}

impl Table {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            ops: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let data = std::fs::read(path)
            .map_err(|e| format!("read op table {}: {e}", path.display()))?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &[u8]) -> Result<Self, String> {
        let raw: TableFile =
            serde_json::from_slice(data).map_err(|e| format!("parse op table: {e}"))?;
        let mut table = Table::new(&raw.version);
        for op in raw.ops {
            table.insert(op);
        }
        Ok(table)
    }

    pub fn insert(&mut self, op: OpDef) {
        self.ops.insert(op.name.clone(), op);
    }

    pub fn get(&self, name: &str) -> Option<&OpDef> {
        self.ops.get(name)
    }

    pub fn ops(&self) -> impl Iterator<Item = &OpDef> {
        self.ops.values()
    }

    /// Checks evaluated keyword arguments against an op's declared signature:
    /// keyword spelling by position, value kind, and enum membership.
    pub fn validate_signature(
        &self,
        name: &str,
        args: &[(String, Value)],
    ) -> Result<&OpDef, String> {
        let op = self
            .ops
            .get(name)
            .ok_or_else(|| format!("unknown operation: {name}"))?;

        if args.len() != op.signature.len() {
            return Err(format!(
                "{name}: expected {} arguments, got {}",
                op.signature.len(),
                args.len()
            ));
        }

        for (i, param) in op.signature.iter().enumerate() {
            let (keyword, value) = &args[i];
            if keyword != &param.kw {
                return Err(format!(
                    "{name}: argument {i} keyword mismatch: expected {}, got {keyword}",
                    param.kw
                ));
            }

            if let Some(ty) = param.ty {
                if value.kind() != ty {
                    return Err(format!(
                        "{name}: argument {} type mismatch: expected {ty}, got {}",
                        param.kw,
                        value.kind()
                    ));
                }
            }

            if !param.variants.is_empty() {
                let Some(s) = value.as_str() else {
                    return Err(format!(
                        "{name}: argument {} must be a string for enum check",
                        param.kw
                    ));
                };
                if !param.variants.iter().any(|v| v == s) {
                    return Err(format!(
                        "{name}: argument {} invalid enum value: {s}",
                        param.kw
                    ));
                }
            }
        }

        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        let mut t = Table::new("envllm.ops@0.1.0");
        t.insert(OpDef {
            name: "FIND_TEXT".into(),
            capabilities: vec!["pure".into()],
            result_type: Kind::Offset,
            signature: vec![
                Param::typed("SOURCE", Kind::Text),
                Param::typed("NEEDLE", Kind::Text),
                Param::enumerated("MODE", &["FIRST", "LAST"]),
                Param::typed("IGNORE_CASE", Kind::Bool),
            ],
            into: true,
        });
        t
    }

    #[test]
    fn rejects_unknown_op_and_bad_arity() {
        let t = sample_table();
        assert!(t.validate_signature("NOPE", &[]).is_err());
        let err = t
            .validate_signature("FIND_TEXT", &[("SOURCE".into(), Value::Null)])
            .unwrap_err();
        assert!(err.contains("expected 4 arguments"), "{err}");
    }

    #[test]
    fn rejects_keyword_out_of_order() {
        let t = sample_table();
        let h = crate::value::TextHandle {
            id: "t:x".into(),
            bytes: 1,
            preview: None,
            preview_bytes: None,
        };
        let err = t
            .validate_signature(
                "FIND_TEXT",
                &[
                    ("NEEDLE".into(), Value::Text(h.clone())),
                    ("SOURCE".into(), Value::Text(h)),
                    ("MODE".into(), Value::Str("FIRST".into())),
                    ("IGNORE_CASE".into(), Value::Bool(false)),
                ],
            )
            .unwrap_err();
        assert!(err.contains("keyword mismatch"), "{err}");
    }

    #[test]
    fn rejects_enum_value_outside_variants() {
        let t = sample_table();
        let h = crate::value::TextHandle {
            id: "t:x".into(),
            bytes: 1,
            preview: None,
            preview_bytes: None,
        };
        let err = t
            .validate_signature(
                "FIND_TEXT",
                &[
                    ("SOURCE".into(), Value::Text(h.clone())),
                    ("NEEDLE".into(), Value::Text(h)),
                    ("MODE".into(), Value::Str("MIDDLE".into())),
                    ("IGNORE_CASE".into(), Value::Bool(false)),
                ],
            )
            .unwrap_err();
        assert!(err.contains("invalid enum value"), "{err}");
    }

    #[test]
    fn table_round_trips_through_json() {
        let t = sample_table();
        let file = serde_json::json!({
            "version": t.version,
            "ops": t.ops().collect::<Vec<_>>(),
        });
        let parsed = Table::from_json(file.to_string().as_bytes()).unwrap();
        assert_eq!(parsed.get("FIND_TEXT"), t.get("FIND_TEXT"));
    }

    #[test]
    fn canonical_template_lists_clauses_in_order() {
        let t = sample_table();
        assert_eq!(
            t.get("FIND_TEXT").unwrap().canonical_template(),
            "FIND_TEXT SOURCE <expr> NEEDLE <expr> MODE <expr> IGNORE_CASE <expr> INTO <ident>: OFFSET"
        );
    }
}
