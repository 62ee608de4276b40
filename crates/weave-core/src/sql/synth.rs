//! SQL synthesis for one query node, one clause at a time.
//!
//! Every renderer takes the placeholder index it starts at and returns a
//! [`Fragment`]; the statement memo in [`super::statement`] stitches them
//! together left to right.

use crate::catalog::Format;
use crate::error::{Result, WeaveError};
use crate::plan::{DataNode, Plan, QueryNode, QueryNodeId};
use crate::request::{Filter, RootQuery, Sort};
use crate::value::Value;

use super::filter::{render_filter, render_sort};
use super::fragment::Fragment;
use super::helpers::{placeholder, qualified, quote_ident, typed_placeholder};
use super::selector::Selector;

pub(crate) const PARENT_ALIAS: &str = "_parent";
const LOCAL_COLUMN: &str = "#local";
const FOREIGN_COLUMN: &str = "#foreign";

/// Everything the renderers need to know about one query node.
pub(crate) struct Shape<'a> {
    pub plan: &'a Plan,
    pub query: &'a QueryNode,
    pub root: &'a DataNode,
    /// Set when each parent row gets its own paginated window of children.
    pub lateral: Option<LateralParent<'a>>,
}

pub(crate) struct LateralParent<'a> {
    pub node: &'a DataNode,
    /// `"_parent"."{column}"`
    pub key: String,
}

/// `(table, local column, foreign column)` of a many-to-many root.
type JunctionColumns<'a> = (&'a str, &'a str, &'a str);

impl<'a> Shape<'a> {
    pub fn new(plan: &'a Plan, query: QueryNodeId) -> Result<Self> {
        let query = plan.query(query)?;
        let root = plan.data_node(query.root)?;

        let paginated = root.request.page_size.is_some();
        let lateral = match (root.parent, &root.link) {
            (Some(parent), Some(link)) if root.is_plural && paginated => {
                let node = plan.data_node(parent)?;
                let column = node.format.require_column(&link.parent_field)?;
                Some(LateralParent {
                    node,
                    key: qualified(PARENT_ALIAS, column),
                })
            }
            _ => None,
        };

        Ok(Shape {
            plan,
            query,
            root,
            lateral,
        })
    }

    pub fn is_lateral(&self) -> bool {
        self.lateral.is_some()
    }

    fn format(&self) -> &Format {
        &self.root.format
    }

    fn junction(&self) -> Option<JunctionColumns<'a>> {
        self.root
            .link
            .as_ref()
            .filter(|link| link.is_many_to_many())
            .and_then(|link| link.relation.junction_columns())
    }

    /// `"{root}"."{column}"` of the root's own link field.
    fn own_link_column(&self) -> Result<String> {
        let link = self
            .root
            .link
            .as_ref()
            .ok_or_else(|| WeaveError::internal("the root statement has no link"))?;
        Ok(qualified(
            &self.root.alias(),
            self.format().require_column(&link.field)?,
        ))
    }

    /// Column the parent's batch of link values is matched against.
    fn linked_key_column(&self) -> Result<String> {
        if let Some(lateral) = &self.lateral {
            return Ok(lateral.key.clone());
        }
        match self.junction() {
            Some((_, local, _)) => Ok(qualified(&self.root.junction_alias(), local)),
            None => self.own_link_column(),
        }
    }

    /// Declared type of the linked values. They were read from the parent's
    /// link field, falling back to the root's own link field.
    fn linked_key_type(&self) -> Option<&'a str> {
        let link = self.root.link.as_ref()?;
        let parent = self.root.parent.and_then(|id| self.plan.data.get(id));
        parent
            .and_then(|node| node.format.sql_type_of(&link.parent_field))
            .or_else(|| self.root.format.sql_type_of(&link.field))
    }

    /// `"{table}" AS "{root}"`, or the junction join for many-to-many.
    fn source(&self) -> Result<String> {
        let alias = self.root.alias();
        let table = format!("{} AS {}", quote_ident(self.format().table()), quote_ident(&alias));
        match self.junction() {
            Some((junction, _, foreign)) => {
                let junction_alias = self.root.junction_alias();
                Ok(format!(
                    "{} AS {} JOIN {table} ON {} = {}",
                    quote_ident(junction),
                    quote_ident(&junction_alias),
                    self.own_link_column()?,
                    qualified(&junction_alias, foreign),
                ))
            }
            None => Ok(table),
        }
    }

    fn projection(&self) -> Result<String> {
        let mut cols = Vec::new();
        for id in &self.query.members {
            let node = self.plan.data_node(*id)?;
            let alias = node.alias();
            for field in &node.fields.select {
                let column = node.format.require_column(field)?;
                cols.push(
                    Selector::new(column)
                        .set_source(&alias)
                        .set_alias(node.fields.alias(field)?)
                        .to_sql()?,
                );
            }
        }

        if let Some((_, local, foreign)) = self.junction() {
            let root = self.root;
            let (source, local, foreign) = if self.is_lateral() {
                (root.alias(), LOCAL_COLUMN, FOREIGN_COLUMN)
            } else {
                (root.junction_alias(), local, foreign)
            };
            cols.push(
                Selector::new(local)
                    .set_source(&source)
                    .set_alias(&root.junction_local_alias())
                    .to_sql()?,
            );
            cols.push(
                Selector::new(foreign)
                    .set_source(&source)
                    .set_alias(&root.junction_foreign_alias())
                    .to_sql()?,
            );
        }
        Ok(cols.join(", "))
    }
}

/// The fixed opening of the statement.
///
/// Plain: `SELECT ... FROM "t" AS "n"`.
/// Lateral: `SELECT ... FROM "p" AS "_parent" JOIN LATERAL (SELECT "n".* FROM "t" AS "n"
/// WHERE "n"."link" = "_parent"."key"`, left open for the filter, sort and window.
pub(crate) fn head(shape: &Shape<'_>) -> Result<String> {
    let projection = shape.projection()?;
    let Some(lateral) = &shape.lateral else {
        return Ok(format!("SELECT {projection} FROM {}", shape.source()?));
    };

    let root = shape.root;
    let mut inner = vec![Selector::wildcard(&root.alias()).to_sql()?];
    let link_column = match shape.junction() {
        Some((_, local, foreign)) => {
            let junction_alias = root.junction_alias();
            inner.push(
                Selector::new(local)
                    .set_source(&junction_alias)
                    .set_alias(LOCAL_COLUMN)
                    .to_sql()?,
            );
            inner.push(
                Selector::new(foreign)
                    .set_source(&junction_alias)
                    .set_alias(FOREIGN_COLUMN)
                    .to_sql()?,
            );
            qualified(&junction_alias, local)
        }
        None => shape.own_link_column()?,
    };

    Ok(format!(
        "SELECT {projection} FROM {} AS {} JOIN LATERAL (SELECT {} FROM {} WHERE {link_column} = {}",
        quote_ident(lateral.node.format.table()),
        quote_ident(PARENT_ALIAS),
        inner.join(", "),
        shape.source()?,
        lateral.key,
    ))
}

/// Closes the lateral subquery opened by [`head`].
pub(crate) fn lateral_close(shape: &Shape<'_>) -> String {
    format!(") AS {} ON true", quote_ident(&shape.root.alias()))
}

/// `LEFT JOIN` for every absorbed singular node, each with its own filter.
pub(crate) fn joins(shape: &Shape<'_>, start: usize) -> Result<Fragment> {
    let mut out = Fragment::default();
    let mut next = start;
    for id in shape.query.absorbed() {
        let node = shape.plan.data_node(*id)?;
        let (Some(parent), Some(link)) = (node.parent, &node.link) else {
            return Err(WeaveError::internal(format!(
                "absorbed node `{}` has no parent",
                node.path
            )));
        };
        let parent = shape.plan.data_node(parent)?;
        let alias = node.alias();

        out.push_str(&format!(
            " LEFT JOIN {} AS {} ON {} = {}",
            quote_ident(node.format.table()),
            quote_ident(&alias),
            qualified(&alias, node.format.require_column(&link.field)?),
            parent.fields.qualified(&link.parent_field)?,
        ));
        if let Some(filter) = &node.request.filter {
            let rendered = render_filter(filter, &alias, &node.format, next)?;
            next = rendered.next_index(next);
            out.push_str(&format!(" AND ({})", rendered.sql));
            out.params.extend(rendered.params);
        }
    }
    Ok(out)
}

/// `{lead} ({filter})` on the root node, or nothing.
pub(crate) fn filter(
    shape: &Shape<'_>,
    lead: &str,
    filter: Option<&Filter>,
    start: usize,
) -> Result<Fragment> {
    match filter {
        Some(filter) => {
            let rendered = render_filter(filter, &shape.root.alias(), shape.format(), start)?;
            Ok(Fragment::new(format!("{lead} ({})", rendered.sql), rendered.params))
        }
        None => Ok(Fragment::default()),
    }
}

/// Binds the statement to its parent's distinct link values:
/// `col = $n` for one value, `col = ANY (VALUES ($n),($m))` for more.
pub(crate) fn linked_key(
    shape: &Shape<'_>,
    lead: &str,
    batch: &[Value],
    start: usize,
) -> Result<Fragment> {
    let column = shape.linked_key_column()?;
    let sql_type = shape.linked_key_type();
    match batch {
        [] => Err(WeaveError::internal(format!(
            "statement for `{}` has no parent values to bind",
            shape.root.path
        ))),
        [one] => Ok(Fragment::new(
            format!("{lead} {column} = {}", typed_placeholder(start, sql_type)),
            vec![one.clone()],
        )),
        many => {
            let values = (start..start + many.len())
                .map(|i| format!("({})", typed_placeholder(i, sql_type)))
                .collect::<Vec<_>>()
                .join(",");
            Ok(Fragment::new(
                format!("{lead} {column} = ANY (VALUES {values})"),
                many.to_vec(),
            ))
        }
    }
}

pub(crate) fn order_by(shape: &Shape<'_>, sort: &[Sort]) -> Result<String> {
    let sql = render_sort(sort, &shape.root.alias(), shape.format())?;
    if sql.is_empty() {
        Ok(sql)
    } else {
        Ok(format!(" ORDER BY {sql}"))
    }
}

/// ` LIMIT $n OFFSET $m` for a paginated query, or nothing.
pub(crate) fn pagination(query: &RootQuery, start: usize) -> Fragment {
    match query.window() {
        Some((limit, offset)) => Fragment::new(
            format!(" LIMIT {} OFFSET {}", placeholder(start), placeholder(start + 1)),
            vec![Value::from(limit), Value::from(offset)],
        ),
        None => Fragment::default(),
    }
}
