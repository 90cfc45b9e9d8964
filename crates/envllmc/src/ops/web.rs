//! Web module. Only the dispatch and capability contract is specified for
//! these operations; the handlers acknowledge without side effects and a
//! host embeds real browser plumbing behind the same definitions.

use crate::error::ExecError;
use crate::ops::registry::{Handler, Module};
use crate::ops::table::{OpDef, Param};
use crate::session::Session;
use crate::value::{Kind, Value};

pub struct WebModule;

impl Module for WebModule {
    fn id(&self) -> &'static str {
        "web"
    }

    fn operations(&self) -> Vec<OpDef> {
        vec![
            OpDef {
                name: "NAVIGATE".to_string(),
                capabilities: vec!["web.navigate".to_string()],
                result_type: Kind::Bool,
                signature: vec![Param::typed("URL", Kind::Text)],
                into: true,
            },
            OpDef {
                name: "CLICK".to_string(),
                capabilities: vec!["web.dom.query".to_string()],
                result_type: Kind::Bool,
                signature: vec![Param::typed("SELECTOR", Kind::Text)],
                into: true,
            },
            OpDef {
                name: "TYPE".to_string(),
                capabilities: vec!["web.dom.query".to_string()],
                result_type: Kind::Bool,
                signature: vec![
                    Param::typed("SELECTOR", Kind::Text),
                    Param::typed("TEXT", Kind::Text),
                ],
                into: true,
            },
        ]
    }

    fn handlers(&self) -> Vec<(&'static str, Handler)> {
        vec![
            ("NAVIGATE", acknowledge),
            ("CLICK", acknowledge),
            ("TYPE", acknowledge),
        ]
    }
}

fn acknowledge(_s: &mut Session, _args: &[Value]) -> Result<Value, ExecError> {
    Ok(Value::Bool(true))
}
