//! Row operations: projection, filtering, and grouped aggregation over
//! field-map lists.

use std::collections::BTreeMap;

use serde_json::{json, Value as Json};

use crate::error::ExecError;
use crate::session::Session;
use crate::value::{Row, Value};

fn rows_of(value: &Value, op: &str) -> Result<Vec<Row>, ExecError> {
    match value {
        Value::Rows(rows) => Ok(rows.clone()),
        other => Err(ExecError::runtime(format!(
            "{op}: SOURCE must be ROWS, got {}",
            other.kind()
        ))),
    }
}

pub fn select_fields(_s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let rows = rows_of(&args[0], "SELECT_FIELDS")?;

    let Value::List(items) = &args[1] else {
        return Err(ExecError::runtime(format!(
            "SELECT_FIELDS: FIELDS must be LIST, got {}",
            args[1].kind()
        )));
    };
    let mut fields = Vec::with_capacity(items.len());
    for item in items {
        match item.as_str() {
            Some(name) => fields.push(name.to_string()),
            None => {
                return Err(ExecError::runtime(
                    "SELECT_FIELDS: FIELDS entries must be strings",
                ))
            }
        }
    }

    let projected: Vec<Row> = rows
        .into_iter()
        .map(|row| {
            fields
                .iter()
                .filter_map(|f| row.get(f).map(|v| (f.clone(), v.clone())))
                .collect()
        })
        .collect();

    Ok(Value::Rows(projected))
}

pub fn filter_rows(_s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let rows = rows_of(&args[0], "FILTER_ROWS")?;
    let key = args[1]
        .as_str()
        .ok_or_else(|| ExecError::runtime("FILTER_ROWS: KEY must be STRING"))?
        .to_string();
    let op = args[2].as_str().unwrap_or("EQ").to_string();
    let needle = value_as_json(&args[3]);

    let kept: Vec<Row> = rows
        .into_iter()
        .filter(|row| {
            let Some(cell) = row.get(&key) else {
                return false;
            };
            match op.as_str() {
                "EQ" => json_eq(cell, &needle),
                "NE" => !json_eq(cell, &needle),
                "GT" => num_of(cell).zip(num_of(&needle)).is_some_and(|(a, b)| a > b),
                "LT" => num_of(cell).zip(num_of(&needle)).is_some_and(|(a, b)| a < b),
                _ => false,
            }
        })
        .collect();

    Ok(Value::Rows(kept))
}

pub fn aggregate_rows(_s: &mut Session, args: &[Value]) -> Result<Value, ExecError> {
    let rows = rows_of(&args[0], "AGGREGATE_ROWS")?;
    let group_by = args[1]
        .as_str()
        .ok_or_else(|| ExecError::runtime("AGGREGATE_ROWS: GROUP_BY must be STRING"))?
        .to_string();
    let compute = args[2].as_str().unwrap_or("COUNT").to_string();

    let mut groups: BTreeMap<String, Vec<Row>> = BTreeMap::new();
    for row in rows {
        let key = row
            .get(&group_by)
            .map(render_json)
            .unwrap_or_else(|| "null".to_string());
        groups.entry(key).or_default().push(row);
    }

    let mut out = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        let mut row = Row::new();
        row.insert(group_by.clone(), json!(key));
        if compute == "COUNT" {
            row.insert("count".to_string(), json!(members.len()));
        }
        out.push(row);
    }

    Ok(Value::Rows(out))
}

fn value_as_json(value: &Value) -> Json {
    match value {
        Value::Int(i) | Value::Offset(i) | Value::Cost(i) => json!(i),
        Value::Bool(b) => json!(b),
        Value::Str(s) => json!(s),
        Value::Json(j) => j.clone(),
        Value::Null => Json::Null,
        other => json!(other.display_string()),
    }
}

fn json_eq(a: &Json, b: &Json) -> bool {
    if let (Some(x), Some(y)) = (num_of(a), num_of(b)) {
        return x == y;
    }
    a == b
}

fn num_of(v: &Json) -> Option<f64> {
    v.as_f64()
}

fn render_json(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Policy;

    fn row(pairs: &[(&str, Json)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn sample_rows() -> Value {
        Value::Rows(vec![
            row(&[("name", json!("a")), ("score", json!(3))]),
            row(&[("name", json!("b")), ("score", json!(7))]),
            row(&[("name", json!("a")), ("score", json!(9))]),
        ])
    }

    #[test]
    fn select_projects_named_fields() {
        let mut s = Session::new(Policy::permissive());
        let fields = Value::List(vec![Value::Str("name".into())]);
        let out = select_fields(&mut s, &[sample_rows(), fields]).unwrap();
        let Value::Rows(rows) = out else { panic!() };
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.len() == 1 && r.contains_key("name")));
    }

    #[test]
    fn filter_compares_numerically() {
        let mut s = Session::new(Policy::permissive());
        let out = filter_rows(
            &mut s,
            &[
                sample_rows(),
                Value::Str("score".into()),
                Value::Str("GT".into()),
                Value::Int(5),
            ],
        )
        .unwrap();
        let Value::Rows(rows) = out else { panic!() };
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn aggregate_counts_groups() {
        let mut s = Session::new(Policy::permissive());
        let out = aggregate_rows(
            &mut s,
            &[
                sample_rows(),
                Value::Str("name".into()),
                Value::Str("COUNT".into()),
            ],
        )
        .unwrap();
        let Value::Rows(rows) = out else { panic!() };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("count"), Some(&json!(2)));
        assert_eq!(rows[1].get("count"), Some(&json!(1)));
    }
}
