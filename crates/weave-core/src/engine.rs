//! Entry points: plan, prepare, execute, fold.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};
use weave_shared::{PerfTimer, WeaveConfig};

use crate::catalog::Catalog;
use crate::error::Result;
use crate::exec::{execute_plan, ExecutionOptions, ExecutionPort};
use crate::fold::fold;
use crate::plan::{Plan, PlanCache, QueryNodeId};
use crate::request::{Filter, RequestNode, RootQuery};
use crate::sql::QueryNodeSql;
use crate::value::{NodeValue, Value};

/// Plan `request` against `catalog`, run it through `port` and fold the
/// result. A plural root yields a list; a singular root an object, or
/// [`NodeValue::Absent`] when nothing matched.
pub async fn plan_and_execute(
    catalog: &dyn Catalog,
    root_format: &str,
    is_plural: bool,
    request: &RequestNode,
    port: &dyn ExecutionPort,
) -> Result<NodeValue> {
    let plan = Arc::new(Plan::build(catalog, root_format, is_plural, request)?);
    PreparedPlan::new(plan, ExecutionOptions::default())?
        .execute(port)
        .await
}

/// One statement as it would currently be sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainedStatement {
    pub query: QueryNodeId,
    pub parent: Option<QueryNodeId>,
    /// Dotted path of the data node that opened the statement.
    pub path: String,
    pub lateral: bool,
    pub sql: String,
    pub params: Vec<Value>,
}

/// A plan with its own statement memo, ready to run repeatedly.
///
/// The plan is shared; the statements are not. Running the same plan
/// concurrently takes one `PreparedPlan` per execution.
#[derive(Debug, Clone)]
pub struct PreparedPlan {
    plan: Arc<Plan>,
    statements: Vec<QueryNodeSql>,
    options: ExecutionOptions,
}

impl PreparedPlan {
    pub fn new(plan: Arc<Plan>, options: ExecutionOptions) -> Result<Self> {
        let statements = (0..plan.queries.len())
            .map(|q| QueryNodeSql::new(plan.clone(), q))
            .collect::<Result<Vec<_>>>()?;
        Ok(PreparedPlan {
            plan,
            statements,
            options,
        })
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Replace the root filter. Only the root statement's filter-dependent
    /// segments are rebuilt.
    pub fn modify_root_filter(&mut self, filter: Option<Filter>) -> Result<()> {
        self.root_statement()?.set_filter(filter)
    }

    /// Replace the root filter, sort and pagination.
    pub fn modify_root_query(&mut self, query: RootQuery) -> Result<()> {
        self.root_statement()?.set_query(query)
    }

    #[instrument(skip_all, fields(root = %self.plan.root().path, queries = self.plan.queries.len()))]
    pub async fn execute(&mut self, port: &dyn ExecutionPort) -> Result<NodeValue> {
        let _timer = PerfTimer::new("weave_plan_duration_seconds")
            .with_label("root", self.plan.root().format.name());

        let outcome = execute_plan(&self.plan, &mut self.statements, port, &self.options).await?;
        let result = fold(&self.plan, &outcome.rows)?;

        info!(
            statements = outcome.statements_issued(),
            skipped = outcome.skipped.len(),
            degraded = outcome.degraded.len(),
            "plan executed"
        );
        Ok(result)
    }

    /// The statements as they would be sent now. Statements below the root
    /// show their last bound batch, or a single placeholder before the
    /// first execution.
    pub fn explain(&self) -> Result<Vec<ExplainedStatement>> {
        self.statements
            .iter()
            .map(|statement| {
                let mut statement = statement.clone();
                let query = self.plan.query(statement.query())?;
                if query.parent.is_some() && statement.batch().is_empty() {
                    statement.set_batch(vec![Value::Null]);
                }
                let rendered = statement.statement()?;
                Ok(ExplainedStatement {
                    query: query.id,
                    parent: query.parent,
                    path: self.plan.query_root(query.id)?.path.clone(),
                    lateral: statement.is_lateral(),
                    sql: rendered.sql,
                    params: rendered.params,
                })
            })
            .collect()
    }

    fn root_statement(&mut self) -> Result<&mut QueryNodeSql> {
        self.statements
            .first_mut()
            .ok_or_else(|| crate::error::WeaveError::internal("plan has no statements"))
    }
}

/// Catalogue, database port, options and plan cache bundled together.
pub struct Engine {
    catalog: Arc<dyn Catalog>,
    port: Arc<dyn ExecutionPort>,
    options: ExecutionOptions,
    cache: Option<PlanCache>,
}

impl Engine {
    pub fn new(catalog: Arc<dyn Catalog>, port: Arc<dyn ExecutionPort>) -> Self {
        Engine {
            catalog,
            port,
            options: ExecutionOptions::default(),
            cache: None,
        }
    }

    /// Options and plan caching from configuration.
    pub fn from_config(
        catalog: Arc<dyn Catalog>,
        port: Arc<dyn ExecutionPort>,
        config: &WeaveConfig,
    ) -> Self {
        let engine = Engine::new(catalog, port).with_options(ExecutionOptions::from(&config.execution));
        if config.planner.cache_plans {
            engine.with_plan_cache()
        } else {
            engine
        }
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_plan_cache(mut self) -> Self {
        self.cache = Some(PlanCache::new());
        self
    }

    pub fn plan_cache(&self) -> Option<&PlanCache> {
        self.cache.as_ref()
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn prepare(
        &self,
        root_format: &str,
        is_plural: bool,
        request: &RequestNode,
    ) -> Result<PreparedPlan> {
        let plan = match &self.cache {
            Some(cache) => cache.get_or_build(self.catalog.as_ref(), root_format, is_plural, request)?,
            None => Arc::new(Plan::build(self.catalog.as_ref(), root_format, is_plural, request)?),
        };
        PreparedPlan::new(plan, self.options.clone())
    }

    pub async fn query(
        &self,
        root_format: &str,
        is_plural: bool,
        request: &RequestNode,
    ) -> Result<NodeValue> {
        self.prepare(root_format, is_plural, request)?
            .execute(self.port.as_ref())
            .await
    }

    /// Run a prepared plan through this engine's port.
    pub async fn execute(&self, prepared: &mut PreparedPlan) -> Result<NodeValue> {
        prepared.execute(self.port.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldRef, Format, Relation, Schema};
    use crate::exec::MockExecutionPort;
    use crate::request::Sort;
    use crate::value::Row;
    use serde_json::json;

    fn schema() -> Result<Arc<Schema>> {
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
        Ok(Arc::new(schema))
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn request() -> RequestNode {
        RequestNode::new()
            .fields(["name"])
            .filter(Filter::eq("id", 1))
            .relation("articles", RequestNode::new().fields(["title"]))
    }

    #[tokio::test]
    async fn test_plan_and_execute() -> Result<()> {
        let schema = schema()?;
        let mut port = MockExecutionPort::new();
        port.expect_execute()
            .withf(|sql, _| sql.contains("FROM \"users\""))
            .times(1)
            .returning(|_, _| Ok(vec![row(&[("0.id", Value::Int(1)), ("0.name", "Ann".into())])]));
        port.expect_execute()
            .withf(|sql, _| sql.contains("FROM \"article\""))
            .times(1)
            .returning(|_, _| {
                Ok(vec![
                    row(&[("1.title", "A".into()), ("1.authorId", Value::Int(1))]),
                    row(&[("1.title", "B".into()), ("1.authorId", Value::Int(1))]),
                ])
            });

        let result = plan_and_execute(schema.as_ref(), "user", true, &request(), &port).await?;
        assert_eq!(
            result.to_json(),
            json!([{"name": "Ann", "articles": [{"title": "A"}, {"title": "B"}]}])
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_modify_root_filter_between_runs() -> Result<()> {
        let schema = schema()?;
        let plan = Arc::new(Plan::build(schema.as_ref(), "user", true, &request())?);
        let mut prepared = PreparedPlan::new(plan, ExecutionOptions::default())?;

        let mut port = MockExecutionPort::new();
        port.expect_execute()
            .withf(|sql, params| {
                sql.ends_with("WHERE (\"0\".\"id\" = $1)") && params.to_vec() == vec![Value::Int(2)]
            })
            .times(1)
            .returning(|_, _| Ok(vec![]));

        prepared.modify_root_filter(Some(Filter::eq("id", 2)))?;
        assert_eq!(prepared.execute(&port).await?, NodeValue::List(vec![]));

        assert!(prepared
            .modify_root_filter(Some(Filter::eq("missing", 2)))
            .unwrap_err()
            .is_configuration());
        Ok(())
    }

    #[tokio::test]
    async fn test_cached_plan_runs_each_requests_values() -> Result<()> {
        let mut port = MockExecutionPort::new();
        for id in [1, 2] {
            port.expect_execute()
                .withf(move |sql, params| {
                    sql.contains("FROM \"users\"") && params.to_vec() == vec![Value::Int(id)]
                })
                .times(1)
                .returning(move |_, _| {
                    Ok(vec![row(&[("0.id", Value::Int(id)), ("0.name", format!("user {id}").into())])])
                });
        }
        port.expect_execute()
            .withf(|sql, _| sql.contains("FROM \"article\""))
            .times(2)
            .returning(|_, _| Ok(vec![]));

        let engine = Engine::new(schema()?, Arc::new(port)).with_plan_cache();
        let by_id = |id: i64| request().filter(Filter::eq("id", id));

        let first = engine.query("user", true, &by_id(1)).await?;
        let second = engine.query("user", true, &by_id(2)).await?;
        assert_eq!(first.to_json(), json!([{"name": "user 1", "articles": []}]));
        assert_eq!(second.to_json(), json!([{"name": "user 2", "articles": []}]));
        assert_eq!(engine.plan_cache().map(PlanCache::len), Some(1));
        Ok(())
    }

    #[test]
    fn test_explain() -> Result<()> {
        let schema = schema()?;
        let request = RequestNode::new().fields(["name"]).relation(
            "articles",
            RequestNode::new().sort(Sort::desc("title")).page(1, 2),
        );
        let engine = Engine::new(schema, Arc::new(MockExecutionPort::new())).with_plan_cache();
        let mut prepared = engine.prepare("user", true, &request)?;
        prepared.modify_root_query(RootQuery {
            page: Some(1),
            page_size: Some(50),
            ..Default::default()
        })?;

        let explained = prepared.explain()?;
        assert_eq!(explained.len(), 2);
        assert!(explained[0].sql.ends_with("LIMIT $1 OFFSET $2"));
        assert_eq!(explained[0].params, vec![Value::Int(50), Value::Int(0)]);
        assert!(explained[1].lateral);
        assert_eq!(explained[1].parent, Some(0));
        assert_eq!(explained[1].path, "user.articles");
        assert!(explained[1].sql.contains("WHERE \"_parent\".\"id\" = $3"));

        engine.prepare("user", true, &request)?;
        assert_eq!(engine.plan_cache().map(PlanCache::len), Some(1));
        Ok(())
    }
}
