//! Filesystem module. Every handler validates the path against the policy
//! whitelist before touching the filesystem.

use serde_json::json;

use crate::error::ExecError;
use crate::ops::pure::text_of;
use crate::ops::registry::{Handler, Module};
use crate::ops::table::{OpDef, Param};
use crate::session::Session;
use crate::value::{Kind, Value};

pub struct FsModule;

impl Module for FsModule {
    fn id(&self) -> &'static str {
        "fs"
    }

    fn operations(&self) -> Vec<OpDef> {
        vec![
            OpDef {
                name: "READ_FILE".to_string(),
                capabilities: vec!["fs_read".to_string()],
                result_type: Kind::Text,
                signature: vec![Param::typed("PATH", Kind::Text)],
                into: true,
            },
            OpDef {
                name: "WRITE_FILE".to_string(),
                capabilities: vec!["fs_write".to_string()],
                result_type: Kind::Bool,
                signature: vec![
                    Param::typed("PATH", Kind::Text),
                    Param::typed("SOURCE", Kind::Text),
                ],
                into: true,
            },
            OpDef {
                name: "LIST_DIR".to_string(),
                capabilities: vec!["fs_read".to_string()],
                result_type: Kind::Json,
                signature: vec![Param::typed("PATH", Kind::Text)],
                into: true,
            },
        ]
    }

    fn handlers(&self) -> Vec<(&'static str, Handler)> {
        vec![
            ("READ_FILE", read_file),
            ("WRITE_FILE", write_file),
            ("LIST_DIR", list_dir),
        ]
    }
}

fn read_file(s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let path = text_of(s, &args[0])?;
    s.policy()
        .validate_path(&path, false)
        .map_err(ExecError::runtime)?;

    let data = std::fs::read_to_string(&path)
        .map_err(|e| ExecError::runtime(format!("READ_FILE failed: {e}")))?;
    let handle = s.store_mut().add(&data);
    Ok(Value::Text(handle))
}

fn write_file(s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let path = text_of(s, &args[0])?;
    let body = text_of(s, &args[1])?;
    s.policy()
        .validate_path(&path, true)
        .map_err(ExecError::runtime)?;

    std::fs::write(&path, body.as_bytes())
        .map_err(|e| ExecError::runtime(format!("WRITE_FILE failed: {e}")))?;
    Ok(Value::Bool(true))
}

fn list_dir(s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let path = text_of(s, &args[0])?;
    s.policy()
        .validate_path(&path, false)
        .map_err(ExecError::runtime)?;

    let entries = std::fs::read_dir(&path)
        .map_err(|e| ExecError::runtime(format!("LIST_DIR failed: {e}")))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ExecError::runtime(format!("LIST_DIR failed: {e}")))?;
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    names.sort();
    Ok(Value::Json(json!(names)))
}
