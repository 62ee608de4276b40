use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;
use tracing::debug;
use weave_shared::QueryMetrics;

use super::Plan;
use crate::catalog::Catalog;
use crate::error::Result;
use crate::request::RequestNode;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PlanKey {
    root_format: String,
    is_plural: bool,
    shape: String,
}

/// The parts of a request the plan's structure depends on: selected fields,
/// relations in order, and which nodes are paginated. Filter values, sort
/// keys and page numbers are left out so they cannot grow the cache.
fn shape(request: &RequestNode) -> serde_json::Value {
    let relations: Vec<serde_json::Value> = request
        .relations
        .iter()
        .map(|(name, child)| json!([name, shape(child)]))
        .collect();
    json!({
        "fields": request.fields,
        "paginated": request.page_size.is_some(),
        "relations": relations,
    })
}

/// Plans keyed by request shape. Plans are immutable, so a cached plan can
/// back any number of concurrent executions, each with its own statements.
/// A request matching a cached shape gets a copy rebound to its own values.
#[derive(Debug, Default)]
pub struct PlanCache {
    plans: DashMap<PlanKey, Arc<Plan>>,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(
        &self,
        catalog: &dyn Catalog,
        root_format: &str,
        is_plural: bool,
        request: &RequestNode,
    ) -> Result<Arc<Plan>> {
        let key = PlanKey {
            root_format: root_format.to_string(),
            is_plural,
            shape: shape(request).to_string(),
        };

        let cached = self.plans.get(&key).map(|plan| plan.clone());
        if let Some(plan) = cached {
            QueryMetrics::plan_cache(true);
            if plan.root().request == *request {
                return Ok(plan);
            }
            return Ok(Arc::new(plan.rebind(request)?));
        }
        QueryMetrics::plan_cache(false);

        let plan = Arc::new(Plan::build(catalog, root_format, is_plural, request)?);
        debug!(root = root_format, queries = plan.queries.len(), "caching plan");
        Ok(self.plans.entry(key).or_insert(plan).clone())
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn clear(&self) {
        self.plans.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Format, Schema};
    use crate::request::Filter;

    #[test]
    fn test_reuses_plans_per_shape() -> Result<()> {
        let schema = Schema::new()
            .with_format(Format::new("user", "users").field("id", "id").field("name", "name"))?;
        let cache = PlanCache::new();
        let request = RequestNode::new().fields(["name"]);

        let a = cache.get_or_build(&schema, "user", true, &request)?;
        let b = cache.get_or_build(&schema, "user", true, &request)?;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);

        cache.get_or_build(&schema, "user", false, &request)?;
        cache.get_or_build(&schema, "user", true, &request.clone().page(1, 10))?;
        assert_eq!(cache.len(), 3);

        // failed builds are not cached
        assert!(cache.get_or_build(&schema, "ghost", true, &request).is_err());
        assert_eq!(cache.len(), 3);

        cache.clear();
        assert!(cache.is_empty());
        Ok(())
    }

    #[test]
    fn test_filter_values_share_one_entry() -> Result<()> {
        let schema = Schema::new()
            .with_format(Format::new("user", "users").field("id", "id").field("name", "name"))?;
        let cache = PlanCache::new();
        let by_id = |id: i64| RequestNode::new().fields(["name"]).filter(Filter::eq("id", id));

        for id in 1..=50 {
            let plan = cache.get_or_build(&schema, "user", true, &by_id(id))?;
            assert_eq!(plan.root().request.filter, Some(Filter::eq("id", id)));
        }
        let in_list = RequestNode::new()
            .fields(["name"])
            .filter(Filter::is_in("id", [1, 2, 3]));
        let plan = cache.get_or_build(&schema, "user", true, &in_list)?;
        assert_eq!(plan.root().request, in_list);
        assert_eq!(cache.len(), 1);

        // values are still validated against the cached shape
        let bad = RequestNode::new().fields(["name"]).filter(Filter::eq("missing", 1));
        assert!(cache
            .get_or_build(&schema, "user", true, &bad)
            .unwrap_err()
            .is_configuration());
        Ok(())
    }
}
