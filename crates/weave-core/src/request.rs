//! The caller's request tree: field selection, nested relations, filters,
//! sorting and pagination.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::catalog::Format;
use crate::error::{Result, WeaveError};
use crate::value::Value;

/// One node of the request tree.
///
/// ```json
/// {
///   "fields": ["name"],
///   "relations": {
///     "articles": { "fields": ["title"], "sort": [{"field": "title", "direction": "desc"}],
///                   "page": 1, "pageSize": 2 }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RequestNode {
    /// Fields to return. `None` returns every field of the format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,

    /// Nested relations, in request order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub relations: IndexMap<String, RequestNode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<Sort>,

    /// 1-based page number. Defaults to 1 when only `page_size` is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,
}

impl RequestNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn relation(mut self, name: impl Into<String>, node: RequestNode) -> Self {
        self.relations.insert(name.into(), node);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn page(mut self, page: u64, page_size: u64) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The filter/sort/pagination part of this node.
    pub fn query(&self) -> RootQuery {
        RootQuery {
            filter: self.filter.clone(),
            sort: self.sort.clone(),
            page: self.page,
            page_size: self.page_size,
        }
    }
}

/// Filter, sort and pagination of a single node, replaceable on a prepared plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RootQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<Sort>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,
}

impl RootQuery {
    pub fn is_paginated(&self) -> bool {
        self.page_size.is_some()
    }

    /// `(limit, offset)` for a paginated node.
    pub fn window(&self) -> Option<(u64, u64)> {
        self.page_size.map(|size| {
            let page = self.page.unwrap_or(1).max(1);
            (size, (page - 1).saturating_mul(size))
        })
    }

    /// Check this query against the node it applies to. `path` names the node
    /// in error messages.
    pub fn validate(&self, format: &Format, is_plural: bool, path: &str) -> Result<()> {
        if !is_plural && (!self.sort.is_empty() || self.page.is_some() || self.page_size.is_some())
        {
            return Err(WeaveError::config(format!(
                "`{path}` is a single record: only `filter` is allowed"
            )));
        }
        match (self.page, self.page_size) {
            (Some(_), None) => {
                return Err(WeaveError::config(format!(
                    "`{path}`: `page` requires `pageSize`"
                )))
            }
            (Some(0), _) => {
                return Err(WeaveError::config(format!("`{path}`: pages start at 1")))
            }
            (_, Some(0)) => {
                return Err(WeaveError::config(format!(
                    "`{path}`: `pageSize` must be positive"
                )))
            }
            _ => {}
        }
        if let (Some(size), page) = (self.page_size, self.page.unwrap_or(1)) {
            let offset = (page - 1).checked_mul(size);
            let fits = |n: u64| i64::try_from(n).is_ok();
            if !fits(size) || !offset.is_some_and(fits) {
                return Err(WeaveError::config(format!(
                    "`{path}`: page {page} of size {size} is out of range"
                )));
            }
        }
        for sort in &self.sort {
            if !format.has_field(&sort.field) {
                return Err(WeaveError::config(format!(
                    "`{path}`: cannot sort by unknown field `{}`",
                    sort.field
                )));
            }
        }
        if let Some(filter) = &self.filter {
            filter.validate(format, path)?;
        }
        Ok(())
    }
}

/// A predicate over the fields of one node.
///
/// Serialized externally tagged: `{"eq": {"field": "id", "value": 1}}`,
/// `{"and": [...]}`, `{"not": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Lt { field: String, value: Value },
    Lte { field: String, value: Value },
    Gt { field: String, value: Value },
    Gte { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    IsNull { field: String },
    IsNotNull { field: String },
    Like { field: String, pattern: String },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Filter::IsNull { field: field.into() }
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut all) => {
                all.push(other);
                Filter::And(all)
            }
            this => Filter::And(vec![this, other]),
        }
    }

    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// Every field name the filter mentions.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::Eq { field, .. }
            | Filter::Ne { field, .. }
            | Filter::Lt { field, .. }
            | Filter::Lte { field, .. }
            | Filter::Gt { field, .. }
            | Filter::Gte { field, .. }
            | Filter::In { field, .. }
            | Filter::IsNull { field }
            | Filter::IsNotNull { field }
            | Filter::Like { field, .. } => out.push(field),
            Filter::And(all) | Filter::Or(all) => {
                for f in all {
                    f.collect_fields(out);
                }
            }
            Filter::Not(inner) => inner.collect_fields(out),
        }
    }

    pub fn validate(&self, format: &Format, path: &str) -> Result<()> {
        match self.fields().into_iter().find(|f| !format.has_field(f)) {
            Some(field) => Err(WeaveError::config(format!(
                "`{path}`: cannot filter on unknown field `{field}`"
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Sort {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Sort {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Sort {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn article() -> Format {
        Format::new("article", "article")
            .field("id", "id")
            .field("title", "title")
            .field("authorId", "author_id")
    }

    #[test]
    fn test_request_from_json_keeps_relation_order() -> anyhow::Result<()> {
        let req = RequestNode::from_json(
            r#"{
                "fields": ["name"],
                "relations": {
                    "profile": {},
                    "articles": {
                        "fields": ["title"],
                        "filter": {"like": {"field": "title", "pattern": "A%"}},
                        "sort": [{"field": "title", "direction": "desc"}],
                        "page": 1,
                        "pageSize": 2
                    }
                }
            }"#,
        )?;
        let names: Vec<_> = req.relations.keys().cloned().collect();
        assert_eq!(names, vec!["profile", "articles"]);

        let articles = &req.relations["articles"];
        assert_eq!(articles.sort, vec![Sort::desc("title")]);
        assert_eq!(articles.query().window(), Some((2, 0)));
        assert_eq!(articles.filter, Some(Filter::like("title", "A%")));
        Ok(())
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(RequestNode::from_json(r#"{"feilds": ["x"]}"#).is_err());
    }

    #[test]
    fn test_filter_json_shape() -> anyhow::Result<()> {
        let filter = Filter::eq("id", 1).and(Filter::is_null("title").negate());
        let value = serde_json::to_value(&filter)?;
        assert_eq!(
            value,
            json!({"and": [
                {"eq": {"field": "id", "value": 1}},
                {"not": {"isNull": {"field": "title"}}}
            ]})
        );
        assert_eq!(serde_json::from_value::<Filter>(value)?, filter);
        Ok(())
    }

    #[test]
    fn test_window() {
        let q = RootQuery {
            page: Some(3),
            page_size: Some(10),
            ..Default::default()
        };
        assert_eq!(q.window(), Some((10, 20)));

        let q = RootQuery {
            page_size: Some(5),
            ..Default::default()
        };
        assert_eq!(q.window(), Some((5, 0)));
        assert_eq!(RootQuery::default().window(), None);
    }

    #[test]
    fn test_pages_beyond_bigint_rejected() {
        let format = article();
        let query = |page: u64, size: u64| RequestNode::new().page(page, size).query();

        let huge_size = query(1, i64::MAX as u64 + 1);
        assert!(huge_size
            .validate(&format, true, "article")
            .unwrap_err()
            .is_configuration());

        // offset overflows i64 but not u64
        assert!(query(3, i64::MAX as u64 / 2 + 1)
            .validate(&format, true, "article")
            .is_err());
        // offset overflows u64
        assert!(query(u64::MAX, 2).validate(&format, true, "article").is_err());

        assert!(query(1, i64::MAX as u64).validate(&format, true, "article").is_ok());
        assert!(query(2, 1 << 40).validate(&format, true, "article").is_ok());
    }

    #[test]
    fn test_validate() {
        let format = article();
        let ok = RequestNode::new()
            .filter(Filter::gt("id", 3))
            .sort(Sort::asc("title"))
            .page(1, 5)
            .query();
        assert!(ok.validate(&format, true, "article").is_ok());

        // sort on a single record
        assert!(ok.validate(&format, false, "article").is_err());

        let bad_sort = RequestNode::new().sort(Sort::asc("body")).query();
        assert!(bad_sort.validate(&format, true, "article").is_err());

        let bad_filter = RequestNode::new().filter(Filter::eq("body", "x")).query();
        let err = bad_filter.validate(&format, true, "article").unwrap_err();
        assert!(err.is_configuration());

        let page_only = RootQuery {
            page: Some(2),
            ..Default::default()
        };
        assert!(page_only.validate(&format, true, "article").is_err());

        let page_zero = RequestNode::new().page(0, 5).query();
        assert!(page_zero.validate(&format, true, "article").is_err());
    }
}
