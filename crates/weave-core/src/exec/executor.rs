//! Breadth-first execution of a plan's statements.

use std::collections::HashMap;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use indexmap::IndexSet;
use tracing::{debug, error, instrument, warn};
use weave_shared::QueryMetrics;

use super::{ExecutionOptions, ExecutionPort, FailurePolicy};
use crate::error::{Result, WeaveError};
use crate::plan::{Plan, QueryNodeId};
use crate::sql::{QueryNodeSql, Statement};
use crate::value::{Row, Value};

/// Flat rows of every statement, indexed by query node id.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub rows: Vec<Vec<Row>>,
    /// Statements not issued because the parent produced no link values.
    pub skipped: Vec<QueryNodeId>,
    /// Statements that failed and were folded as empty.
    pub degraded: Vec<QueryNodeId>,
}

impl ExecutionOutcome {
    /// Number of statements sent to the database.
    pub fn statements_issued(&self) -> usize {
        self.rows.len() - self.skipped.len()
    }
}

struct Job {
    query: QueryNodeId,
    depth: usize,
    single: bool,
    statement: Statement,
}

/// Run every statement of `plan`, level by level.
///
/// The root runs first with no batch. Each following level binds the
/// distinct link values fetched by its parent statement and runs its
/// statements concurrently, at most `max_concurrency` at a time. A statement
/// whose parent produced no values is skipped. Returns only once every
/// statement has finished.
#[instrument(skip_all, fields(queries = plan.queries.len()))]
pub async fn execute_plan(
    plan: &Plan,
    statements: &mut [QueryNodeSql],
    port: &dyn ExecutionPort,
    options: &ExecutionOptions,
) -> Result<ExecutionOutcome> {
    if statements.len() != plan.queries.len() {
        return Err(WeaveError::internal(format!(
            "{} statements prepared for {} query nodes",
            statements.len(),
            plan.queries.len()
        )));
    }

    let mut outcome = ExecutionOutcome {
        rows: vec![Vec::new(); plan.queries.len()],
        ..Default::default()
    };

    for level in plan.levels() {
        // distinct values per (parent statement, link column), shared by siblings
        let mut batches: HashMap<(QueryNodeId, String), Vec<Value>> = HashMap::new();
        let mut jobs = Vec::with_capacity(level.len());

        for id in level {
            let query = plan.query(id)?;
            if let Some(parent_query) = query.parent {
                let alias = parent_link_alias(plan, id)?;
                let batch = batches
                    .entry((parent_query, alias))
                    .or_insert_with_key(|(_, alias)| {
                        distinct_values(&outcome.rows[parent_query], alias)
                    })
                    .clone();
                if batch.is_empty() {
                    debug!(query = id, "no parent values, skipping statement");
                    QueryMetrics::statement_skipped();
                    outcome.skipped.push(id);
                    continue;
                }
                statements[id].set_batch(batch);
            }

            jobs.push(Job {
                query: id,
                depth: query.depth,
                single: query.parent.is_none() && !plan.root().is_plural,
                statement: statements[id].statement()?,
            });
        }

        let results: Vec<(Job, Result<Vec<Row>>)> = stream::iter(jobs)
            .map(|job| run(port, job))
            .buffered(options.max_concurrency.max(1))
            .collect()
            .await;

        for (job, result) in results {
            match result {
                Ok(rows) => outcome.rows[job.query] = rows,
                Err(err) => {
                    let failure = WeaveError::QueryExecutionError {
                        query: job.query,
                        sql: job.statement.sql.clone(),
                        message: err.to_string(),
                    };
                    let is_root = job.query == 0;
                    if is_root || options.failure_policy == FailurePolicy::Strict {
                        error!(
                            query = job.query,
                            error = %err,
                            plan = %plan.summary(),
                            "statement failed"
                        );
                        return Err(failure);
                    }
                    warn!(
                        query = job.query,
                        error = %err,
                        "statement failed, folding branch as empty"
                    );
                    QueryMetrics::branch_degraded();
                    outcome.degraded.push(job.query);
                }
            }
        }
    }

    Ok(outcome)
}

async fn run(port: &dyn ExecutionPort, job: Job) -> (Job, Result<Vec<Row>>) {
    let Statement { sql, params } = &job.statement;
    debug!(query = job.query, params = params.len(), sql = %sql, "executing statement");

    let started = Instant::now();
    let result = if job.single {
        port.execute_one(sql, params)
            .await
            .map(|row| row.into_iter().collect())
    } else {
        port.execute(sql, params).await
    };

    match &result {
        Ok(rows) => QueryMetrics::statement_executed(job.depth, rows.len(), started.elapsed()),
        Err(_) => QueryMetrics::statement_failed(job.depth),
    }
    (job, result)
}

/// Alias, in the parent statement's rows, of the value a query node links on.
fn parent_link_alias(plan: &Plan, query: QueryNodeId) -> Result<String> {
    let root = plan.query_root(query)?;
    let (Some(parent), Some(link)) = (root.parent, &root.link) else {
        return Err(WeaveError::internal(format!(
            "statement {query} has a parent statement but its root has no link"
        )));
    };
    plan.data_node(parent)?
        .fields
        .alias(&link.parent_field)
        .map(str::to_string)
}

/// Distinct non-null values of `alias`, in first-seen order.
pub(crate) fn distinct_values(rows: &[Row], alias: &str) -> Vec<Value> {
    rows.iter()
        .filter_map(|row| row.get(alias))
        .filter(|v| !v.is_null())
        .cloned()
        .collect::<IndexSet<Value>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldRef, Format, Relation, Schema};
    use crate::exec::MockExecutionPort;
    use crate::request::RequestNode;
    use std::sync::Arc;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn plan(is_plural: bool) -> Result<Arc<Plan>> {
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
            Some("author"),
        )?;
        let request = RequestNode::new()
            .fields(["name"])
            .relation("articles", RequestNode::new().fields(["title"]));
        Ok(Arc::new(Plan::build(&schema, "user", is_plural, &request)?))
    }

    fn statements(plan: &Arc<Plan>) -> Result<Vec<QueryNodeSql>> {
        (0..plan.queries.len())
            .map(|q| QueryNodeSql::new(plan.clone(), q))
            .collect()
    }

    fn users() -> Vec<Row> {
        vec![
            row(&[("0.id", Value::Int(1)), ("0.name", "Ann".into())]),
            row(&[("0.id", Value::Int(2)), ("0.name", "Bob".into())]),
            row(&[("0.id", Value::Int(1)), ("0.name", "Ann".into())]),
        ]
    }

    #[test]
    fn test_distinct_values_skips_nulls_and_keeps_order() {
        let rows = vec![
            row(&[("k", Value::Int(3))]),
            row(&[("k", Value::Null)]),
            row(&[("k", Value::Int(1))]),
            row(&[("k", Value::Int(3))]),
            row(&[]),
        ];
        assert_eq!(distinct_values(&rows, "k"), vec![Value::Int(3), Value::Int(1)]);
    }

    #[tokio::test]
    async fn test_child_batch_is_one_statement() -> Result<()> {
        let plan = plan(true)?;
        let mut stmts = statements(&plan)?;

        let mut port = MockExecutionPort::new();
        port.expect_execute()
            .withf(|sql, _| sql.contains("FROM \"users\""))
            .times(1)
            .returning(|_, _| Ok(users()));
        port.expect_execute()
            .withf(|sql, params| {
                sql.contains("= ANY (VALUES ($1),($2))")
                    && params.to_vec() == vec![Value::Int(1), Value::Int(2)]
            })
            .times(1)
            .returning(|_, _| {
                Ok(vec![row(&[
                    ("1.title", "A".into()),
                    ("1.authorId", Value::Int(1)),
                ])])
            });

        let outcome = execute_plan(&plan, &mut stmts, &port, &ExecutionOptions::default()).await?;
        assert_eq!(outcome.rows[0].len(), 3);
        assert_eq!(outcome.rows[1].len(), 1);
        assert_eq!(outcome.statements_issued(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_parent_skips_child() -> Result<()> {
        let plan = plan(true)?;
        let mut stmts = statements(&plan)?;

        let mut port = MockExecutionPort::new();
        port.expect_execute().times(1).returning(|_, _| Ok(vec![]));

        let outcome = execute_plan(&plan, &mut stmts, &port, &ExecutionOptions::default()).await?;
        assert_eq!(outcome.skipped, vec![1]);
        assert_eq!(outcome.statements_issued(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_singular_root_uses_execute_one() -> Result<()> {
        let plan = plan(false)?;
        let mut stmts = statements(&plan)?;

        let mut port = MockExecutionPort::new();
        port.expect_execute_one()
            .times(1)
            .returning(|_, _| Ok(Some(row(&[("0.id", Value::Int(1)), ("0.name", "Ann".into())]))));
        port.expect_execute()
            .withf(|sql, _| sql.ends_with("\"1\".\"author_id\" = $1"))
            .times(1)
            .returning(|_, _| Ok(vec![]));

        let outcome = execute_plan(&plan, &mut stmts, &port, &ExecutionOptions::default()).await?;
        assert_eq!(outcome.rows[0].len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_root_failure_propagates() -> Result<()> {
        let plan = plan(true)?;
        let mut stmts = statements(&plan)?;

        let mut port = MockExecutionPort::new();
        port.expect_execute()
            .times(1)
            .returning(|_, _| Err(WeaveError::DatabaseError("connection reset".into())));

        let err = execute_plan(&plan, &mut stmts, &port, &ExecutionOptions::default())
            .await
            .unwrap_err();
        match err {
            WeaveError::QueryExecutionError { query, sql, message } => {
                assert_eq!(query, 0);
                assert!(sql.starts_with("SELECT"));
                assert!(message.contains("connection reset"));
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_child_failure_policies() -> Result<()> {
        let plan = plan(true)?;

        let failing_port = || {
            let mut port = MockExecutionPort::new();
            port.expect_execute()
                .withf(|sql, _| sql.contains("FROM \"users\""))
                .returning(|_, _| Ok(users()));
            port.expect_execute()
                .withf(|sql, _| sql.contains("FROM \"article\""))
                .returning(|_, _| Err(WeaveError::DatabaseError("timeout".into())));
            port
        };

        let mut stmts = statements(&plan)?;
        let outcome = execute_plan(&plan, &mut stmts, &failing_port(), &ExecutionOptions::default())
            .await?;
        assert_eq!(outcome.degraded, vec![1]);
        assert!(outcome.rows[1].is_empty());

        let mut stmts = statements(&plan)?;
        let err = execute_plan(&plan, &mut stmts, &failing_port(), &ExecutionOptions::strict())
            .await
            .unwrap_err();
        assert!(matches!(err, WeaveError::QueryExecutionError { query: 1, .. }));
        Ok(())
    }
}
