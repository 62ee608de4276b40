//! Reconstruction of the nested result from flat statement rows.
//!
//! Statements are folded deepest first. Each non-root statement's rows are
//! turned into objects and grouped by the value they link on; a parent row
//! then picks up the group matching its own key. Nodes absorbed by LEFT JOIN
//! are built from the same row as their parent, after a presence check on
//! the join key. Linkage-only fields are pruned at the end.

use std::collections::{BTreeMap, HashMap};

use tracing::trace;

use crate::error::{Result, WeaveError};
use crate::plan::{DataNode, DataNodeId, Plan};
use crate::value::{NodeValue, Row, Value};

type Groups = HashMap<Value, Vec<NodeValue>>;

/// Fold the rows of every statement (indexed by query node id) into the
/// shape requested for the plan's root.
pub fn fold(plan: &Plan, rows: &[Vec<Row>]) -> Result<NodeValue> {
    if rows.len() != plan.queries.len() {
        return Err(WeaveError::internal(format!(
            "{} row sets for {} statements",
            rows.len(),
            plan.queries.len()
        )));
    }

    let mut groups: Vec<Groups> = vec![Groups::new(); plan.queries.len()];
    for query in plan.queries.iter().skip(1).rev() {
        let root = plan.data_node(query.root)?;
        let key_alias = root.link_alias()?;
        let mut grouped = Groups::new();
        for row in &rows[query.id] {
            let Some(key) = row.get(&key_alias).filter(|v| !v.is_null()) else {
                continue;
            };
            let object = build_object(plan, root, row, &groups)?;
            grouped.entry(key.clone()).or_default().push(object);
        }
        trace!(query = query.id, groups = grouped.len(), "folded statement");
        groups[query.id] = grouped;
    }

    let root = plan.root();
    let mut objects = rows[0]
        .iter()
        .map(|row| build_object(plan, root, row, &groups))
        .collect::<Result<Vec<_>>>()?;

    let mut result = if root.is_plural {
        NodeValue::List(objects)
    } else if objects.is_empty() {
        NodeValue::Absent
    } else {
        objects.swap_remove(0)
    };
    prune(plan, root.id, &mut result);
    Ok(result)
}

/// Object for `node` out of `row`, with every child attached.
fn build_object(plan: &Plan, node: &DataNode, row: &Row, groups: &[Groups]) -> Result<NodeValue> {
    let mut object = BTreeMap::new();
    for field in &node.fields.select {
        let alias = node.fields.alias(field)?;
        let value = row.get(alias).cloned().unwrap_or(Value::Null);
        object.insert(field.clone(), NodeValue::Scalar(value));
    }

    for (name, child_id) in &node.children {
        let child = plan.data_node(*child_id)?;
        let parent_key = parent_key(node, child, row)?;

        let value = if plan.is_absorbed(*child_id) {
            if is_present(child, row, parent_key)? {
                build_object(plan, child, row, groups)?
            } else {
                NodeValue::Absent
            }
        } else {
            let matches = parent_key
                .and_then(|key| groups[plan.owner[*child_id]].get(key))
                .map(Vec::as_slice)
                .unwrap_or_default();
            if child.is_plural {
                NodeValue::List(matches.to_vec())
            } else {
                matches.first().cloned().unwrap_or(NodeValue::Absent)
            }
        };
        object.insert(name.clone(), value);
    }

    Ok(NodeValue::Object(object))
}

/// The parent's value for `child`'s link, if not null.
fn parent_key<'r>(node: &DataNode, child: &DataNode, row: &'r Row) -> Result<Option<&'r Value>> {
    let link = child
        .link
        .as_ref()
        .ok_or_else(|| WeaveError::internal(format!("`{}` has no link", child.path)))?;
    let alias = node.fields.alias(&link.parent_field)?;
    Ok(row.get(alias).filter(|v| !v.is_null()))
}

/// A LEFT JOIN matched iff the child's own link column is non-null and equal
/// to the parent's key. A matched row with null data fields is still present.
fn is_present(child: &DataNode, row: &Row, parent_key: Option<&Value>) -> Result<bool> {
    let Some(parent_key) = parent_key else {
        return Ok(false);
    };
    let own = row.get(&child.link_alias()?);
    Ok(matches!(own, Some(v) if !v.is_null() && v == parent_key))
}

/// Strip linkage-only fields from every object produced for `node`.
fn prune(plan: &Plan, node: DataNodeId, value: &mut NodeValue) {
    match value {
        NodeValue::List(items) => {
            for item in items {
                prune(plan, node, item);
            }
        }
        NodeValue::Object(object) => {
            let Some(data) = plan.data.get(node) else {
                return;
            };
            for field in &data.fields.linkage_only {
                object.remove(field);
            }
            for (name, child) in &data.children {
                if let Some(nested) = object.get_mut(name) {
                    prune(plan, *child, nested);
                }
            }
        }
        NodeValue::Scalar(_) | NodeValue::Absent => {}
    }
}
