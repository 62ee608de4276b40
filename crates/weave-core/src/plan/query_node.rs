//! Partitioning of data nodes into statements.

use super::data_node::{DataNode, DataNodeId};

pub type QueryNodeId = usize;

/// One SQL statement: a query-opening data node plus the singular
/// descendants absorbed into it by LEFT JOIN.
#[derive(Debug, Clone)]
pub struct QueryNode {
    pub id: QueryNodeId,
    /// The data node that opened this statement.
    pub root: DataNodeId,
    /// Owned data nodes in pre-order, `root` first.
    pub members: Vec<DataNodeId>,
    pub parent: Option<QueryNodeId>,
    pub children: Vec<QueryNodeId>,
    /// Number of pagination boundaries above this statement.
    pub depth: usize,
}

impl QueryNode {
    /// Owned data nodes other than the root, in join order.
    pub fn absorbed(&self) -> &[DataNodeId] {
        &self.members[1..]
    }
}

/// Group `data` into query nodes. Returns the query nodes and, indexed by
/// data node id, the query node owning each data node.
///
/// Relies on `data` being in pre-order: a parent is always assigned before
/// its children, and query ids come out in pre-order too.
pub fn partition(data: &[DataNode]) -> (Vec<QueryNode>, Vec<QueryNodeId>) {
    let mut queries: Vec<QueryNode> = Vec::new();
    let mut owner: Vec<QueryNodeId> = Vec::with_capacity(data.len());

    for node in data {
        let parent_query = node.parent.map(|p| owner[p]);
        let opens_query = node.parent.is_none() || node.is_plural;

        if opens_query {
            let id = queries.len();
            let depth = parent_query.map(|p| queries[p].depth + 1).unwrap_or(0);
            queries.push(QueryNode {
                id,
                root: node.id,
                members: vec![node.id],
                parent: parent_query,
                children: Vec::new(),
                depth,
            });
            if let Some(p) = parent_query {
                queries[p].children.push(id);
            }
            owner.push(id);
        } else if let Some(q) = parent_query {
            queries[q].members.push(node.id);
            owner.push(q);
        }
    }

    (queries, owner)
}
