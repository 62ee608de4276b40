//! Memoized statements for a prepared plan.

use std::sync::Arc;

use crate::error::{Result, WeaveError};
use crate::plan::{Plan, QueryNodeId};
use crate::request::{Filter, RootQuery};
use crate::value::Value;

use super::fragment::Fragment;
use super::synth::{self, Shape};

/// SQL text and bound values ready for the execution port.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl From<Fragment> for Statement {
    fn from(f: Fragment) -> Self {
        Statement {
            sql: f.sql,
            params: f.params,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Head,
    Joins,
    Filter,
    LinkedKey,
    OrderBy,
    Pagination,
    LateralClose,
}

#[derive(Debug, Clone)]
struct Cached {
    start: usize,
    fragment: Fragment,
}

/// The statement of one query node, rebuilt piecewise.
///
/// Each segment is cached together with the placeholder index it was
/// rendered at. A new batch of parent values only re-renders the linked-key
/// predicate; a new root query re-renders filter, sort and window. Segments
/// with placeholders are re-rendered when their start index moves.
///
/// Mutation goes through `&mut self`: concurrent executions of one plan
/// each need their own `QueryNodeSql`.
#[derive(Debug, Clone)]
pub struct QueryNodeSql {
    plan: Arc<Plan>,
    query: QueryNodeId,
    lateral: bool,
    state: RootQuery,
    batch: Vec<Value>,
    segments: Vec<Segment>,
    cache: Vec<Option<Cached>>,
    built: Option<Statement>,
    renders: usize,
}

impl QueryNodeSql {
    pub fn new(plan: Arc<Plan>, query: QueryNodeId) -> Result<Self> {
        let shape = Shape::new(&plan, query)?;
        let lateral = shape.is_lateral();
        let root = shape.root;
        let state = root.request.query();

        let segments = if lateral {
            vec![
                Segment::Head,
                Segment::Filter,
                Segment::OrderBy,
                Segment::Pagination,
                Segment::LateralClose,
                Segment::Joins,
                Segment::LinkedKey,
                Segment::OrderBy,
            ]
        } else if root.is_root() {
            vec![
                Segment::Head,
                Segment::Joins,
                Segment::Filter,
                Segment::OrderBy,
                Segment::Pagination,
            ]
        } else {
            vec![
                Segment::Head,
                Segment::Joins,
                Segment::Filter,
                Segment::LinkedKey,
                Segment::OrderBy,
            ]
        };
        let cache = vec![None; segments.len()];

        Ok(QueryNodeSql {
            plan,
            query,
            lateral,
            state,
            batch: Vec::new(),
            segments,
            cache,
            built: None,
            renders: 0,
        })
    }

    pub fn query(&self) -> QueryNodeId {
        self.query
    }

    pub fn is_lateral(&self) -> bool {
        self.lateral
    }

    pub fn batch(&self) -> &[Value] {
        &self.batch
    }

    pub fn root_query(&self) -> &RootQuery {
        &self.state
    }

    /// Number of segment renders so far.
    pub fn renders(&self) -> usize {
        self.renders
    }

    /// Bind the distinct link values of the parent statement.
    pub fn set_batch(&mut self, batch: Vec<Value>) {
        if batch != self.batch {
            self.batch = batch;
            self.invalidate(&[Segment::LinkedKey]);
        }
    }

    /// Replace the filter of the statement's root node.
    pub fn set_filter(&mut self, filter: Option<Filter>) -> Result<()> {
        let query = RootQuery {
            filter,
            ..self.state.clone()
        };
        self.set_query(query)
    }

    /// Replace filter, sort and pagination of the statement's root node.
    pub fn set_query(&mut self, query: RootQuery) -> Result<()> {
        let root = self.plan.query_root(self.query)?;
        query.validate(&root.format, root.is_plural, &root.path)?;
        if self.lateral && !query.is_paginated() {
            return Err(WeaveError::config(format!(
                "`{}` is planned per parent row and must stay paginated",
                root.path
            )));
        }
        if query != self.state {
            self.state = query;
            self.invalidate(&[
                Segment::Filter,
                Segment::OrderBy,
                Segment::Pagination,
                Segment::LinkedKey,
            ]);
        }
        Ok(())
    }

    /// The current statement, re-rendering only stale segments.
    pub fn statement(&mut self) -> Result<Statement> {
        if let Some(built) = &self.built {
            return Ok(built.clone());
        }

        let shape = Shape::new(&self.plan, self.query)?;
        let mut out = Fragment::default();
        let mut start = 1;
        for (segment, slot) in self.segments.iter().zip(self.cache.iter_mut()) {
            // a fragment without placeholders is valid at any start index
            let fresh = matches!(
                slot,
                Some(cached) if cached.start == start || cached.fragment.params.is_empty()
            );
            if !fresh {
                let fragment = render(*segment, &shape, &self.state, &self.batch, start)?;
                self.renders += 1;
                *slot = Some(Cached { start, fragment });
            }
            if let Some(cached) = slot {
                start = cached.fragment.next_index(start);
                out.sql.push_str(&cached.fragment.sql);
                out.params.extend(cached.fragment.params.iter().cloned());
            }
        }

        let statement = Statement::from(out);
        self.built = Some(statement.clone());
        Ok(statement)
    }

    fn invalidate(&mut self, stale: &[Segment]) {
        for (segment, slot) in self.segments.iter().zip(self.cache.iter_mut()) {
            if stale.contains(segment) {
                *slot = None;
            }
        }
        self.built = None;
    }
}

fn render(
    segment: Segment,
    shape: &Shape<'_>,
    state: &RootQuery,
    batch: &[Value],
    start: usize,
) -> Result<Fragment> {
    match segment {
        Segment::Head => synth::head(shape).map(Fragment::text),
        Segment::Joins => synth::joins(shape, start),
        Segment::Filter => {
            let lead = if shape.is_lateral() { " AND" } else { " WHERE" };
            synth::filter(shape, lead, state.filter.as_ref(), start)
        }
        Segment::LinkedKey => {
            let lead = if !shape.is_lateral() && state.filter.is_some() {
                " AND"
            } else {
                " WHERE"
            };
            synth::linked_key(shape, lead, batch, start)
        }
        Segment::OrderBy => synth::order_by(shape, &state.sort).map(Fragment::text),
        Segment::Pagination => Ok(synth::pagination(state, start)),
        Segment::LateralClose => Ok(Fragment::text(synth::lateral_close(shape))),
    }
}
