//! Query planning: request tree -> data nodes -> query nodes.

pub mod cache;
pub mod data_node;
pub mod query_node;

pub use cache::PlanCache;
pub use data_node::{build_data_nodes, DataNode, DataNodeId, FieldsInfo, Link};
pub use query_node::{partition, QueryNode, QueryNodeId};

use std::fmt::Write as _;

use tracing::instrument;

use crate::catalog::Catalog;
use crate::error::{Result, WeaveError};
use crate::request::RequestNode;

/// The planned shape of one request. Immutable once built, so it can be
/// shared between executions and cached.
#[derive(Debug, Clone)]
pub struct Plan {
    pub data: Vec<DataNode>,
    pub queries: Vec<QueryNode>,
    /// Owning query node, indexed by data node id.
    pub owner: Vec<QueryNodeId>,
}

impl Plan {
    #[instrument(skip(catalog, request))]
    pub fn build(
        catalog: &dyn Catalog,
        root_format: &str,
        is_plural: bool,
        request: &RequestNode,
    ) -> Result<Self> {
        let data = build_data_nodes(catalog, root_format, is_plural, request)?;
        let (queries, owner) = partition(&data);
        Ok(Plan {
            data,
            queries,
            owner,
        })
    }

    /// A copy of this plan carrying the filters, sorts and pages of
    /// `request`, which must have the fields, relations and pagination
    /// this plan was built from.
    pub fn rebind(&self, request: &RequestNode) -> Result<Plan> {
        let mut plan = self.clone();
        plan.bind(0, request)?;
        Ok(plan)
    }

    fn bind(&mut self, id: DataNodeId, request: &RequestNode) -> Result<()> {
        let node = self
            .data
            .get_mut(id)
            .ok_or_else(|| WeaveError::internal(format!("no data node {id}")))?;
        request.query().validate(&node.format, node.is_plural, &node.path)?;
        node.request = request.clone();

        for (name, child) in &request.relations {
            let child_id = *self.data[id].children.get(name).ok_or_else(|| {
                WeaveError::internal(format!("request relation `{name}` is not in the plan"))
            })?;
            self.bind(child_id, child)?;
        }
        Ok(())
    }

    pub fn root(&self) -> &DataNode {
        &self.data[0]
    }

    pub fn data_node(&self, id: DataNodeId) -> Result<&DataNode> {
        self.data
            .get(id)
            .ok_or_else(|| WeaveError::internal(format!("no data node {id}")))
    }

    pub fn query(&self, id: QueryNodeId) -> Result<&QueryNode> {
        self.queries
            .get(id)
            .ok_or_else(|| WeaveError::internal(format!("no query node {id}")))
    }

    /// The data node a query node was opened by.
    pub fn query_root(&self, id: QueryNodeId) -> Result<&DataNode> {
        self.data_node(self.query(id)?.root)
    }

    /// Whether `child` is joined into the same statement as its parent.
    pub fn is_absorbed(&self, child: DataNodeId) -> bool {
        match self.data.get(child).and_then(|n| n.parent) {
            Some(parent) => self.owner[child] == self.owner[parent],
            None => false,
        }
    }

    /// Query nodes grouped by depth, each level in id order.
    pub fn levels(&self) -> Vec<Vec<QueryNodeId>> {
        let mut levels: Vec<Vec<QueryNodeId>> = Vec::new();
        for q in &self.queries {
            if levels.len() <= q.depth {
                levels.resize_with(q.depth + 1, Vec::new);
            }
            levels[q.depth].push(q.id);
        }
        levels
    }

    /// Indented outline of statements and the data nodes they own.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for q in &self.queries {
            let pad = "  ".repeat(q.depth);
            let members = q
                .members
                .iter()
                .map(|id| {
                    let node = &self.data[*id];
                    format!("{}#{} ({})", node.path, node.id, node.format.name())
                })
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(out, "{pad}- query {}: {members}", q.id);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldRef, Format, Relation, Schema};
    use crate::request::Filter;

    #[test]
    fn test_build_and_summary() -> Result<()> {
        let mut schema = Schema::new()
            .with_format(Format::new("user", "users").field("id", "id").field("name", "name"))?
            .with_format(
                Format::new("article", "article")
                    .field("id", "id")
                    .field("authorId", "author_id"),
            )?;
        schema.relate(
            Relation::one_to_many(FieldRef::new("user", "id"), FieldRef::new("article", "authorId")),
            Some("articles"),
            Some("author"),
        )?;

        let request = RequestNode::new().relation(
            "articles",
            RequestNode::new().relation("author", RequestNode::new()),
        );
        let plan = Plan::build(&schema, "user", true, &request)?;

        assert_eq!(plan.queries.len(), 2);
        assert!(plan.is_absorbed(2));
        assert!(!plan.is_absorbed(1));
        assert_eq!(plan.levels(), vec![vec![0], vec![1]]);
        assert_eq!(
            plan.summary(),
            "- query 0: user#0 (user)\n  - query 1: user.articles#1 (article), user.articles.author#2 (user)\n"
        );
        Ok(())
    }

    #[test]
    fn test_rebind_swaps_values_and_keeps_structure() -> Result<()> {
        let mut schema = Schema::new()
            .with_format(Format::new("user", "users").field("id", "id").field("name", "name"))?
            .with_format(
                Format::new("article", "article")
                    .field("id", "id")
                    .field("title", "title")
                    .field("authorId", "author_id"),
            )?;
        schema.relate(
            Relation::one_to_many(FieldRef::new("user", "id"), FieldRef::new("article", "authorId")),
            Some("articles"),
            None,
        )?;
        let request = |id: i64, title: &str| {
            RequestNode::new().filter(Filter::eq("id", id)).relation(
                "articles",
                RequestNode::new().filter(Filter::eq("title", title)).page(1, 5),
            )
        };
        let plan = Plan::build(&schema, "user", true, &request(1, "a"))?;

        let rebound = plan.rebind(&request(2, "b"))?;
        assert_eq!(rebound.queries.len(), plan.queries.len());
        assert_eq!(rebound.root().request.filter, Some(Filter::eq("id", 2)));
        assert_eq!(rebound.data[1].request.filter, Some(Filter::eq("title", "b")));
        // the original plan is untouched
        assert_eq!(plan.root().request.filter, Some(Filter::eq("id", 1)));

        let bad = RequestNode::new()
            .filter(Filter::eq("missing", 1))
            .relation("articles", RequestNode::new().page(1, 5));
        assert!(plan.rebind(&bad).unwrap_err().is_configuration());
        Ok(())
    }
}
