//! Rendering of [`Filter`] trees into parameterized predicates.

use crate::catalog::Format;
use crate::error::Result;
use crate::request::{Direction, Filter, Sort};
use crate::value::Value;

use super::fragment::Fragment;
use super::helpers::{placeholder, qualified, typed_placeholder};

/// Render `filter` against the table aliased `alias`, numbering placeholders
/// from `start`.
pub fn render_filter(filter: &Filter, alias: &str, format: &Format, start: usize) -> Result<Fragment> {
    let column = |field: &str| -> Result<String> {
        Ok(qualified(alias, format.require_column(field)?))
    };
    let compare = |field: &str, op: &str, value: &Value| -> Result<Fragment> {
        let param = typed_placeholder(start, format.sql_type_of(field));
        Ok(Fragment::new(
            format!("{} {op} {param}", column(field)?),
            vec![value.clone()],
        ))
    };

    match filter {
        Filter::Eq { field, value } if value.is_null() => {
            Ok(Fragment::text(format!("{} IS NULL", column(field)?)))
        }
        Filter::Ne { field, value } if value.is_null() => {
            Ok(Fragment::text(format!("{} IS NOT NULL", column(field)?)))
        }
        Filter::Eq { field, value } => compare(field, "=", value),
        Filter::Ne { field, value } => compare(field, "<>", value),
        Filter::Lt { field, value } => compare(field, "<", value),
        Filter::Lte { field, value } => compare(field, "<=", value),
        Filter::Gt { field, value } => compare(field, ">", value),
        Filter::Gte { field, value } => compare(field, ">=", value),
        // patterns stay text whatever the column type
        Filter::Like { field, pattern } => Ok(Fragment::new(
            format!("{} LIKE {}", column(field)?, placeholder(start)),
            vec![Value::Text(pattern.clone())],
        )),
        Filter::IsNull { field } => Ok(Fragment::text(format!("{} IS NULL", column(field)?))),
        Filter::IsNotNull { field } => {
            Ok(Fragment::text(format!("{} IS NOT NULL", column(field)?)))
        }
        Filter::In { values, .. } if values.is_empty() => Ok(Fragment::text("FALSE")),
        Filter::In { field, values } => {
            let sql_type = format.sql_type_of(field);
            let list = (start..start + values.len())
                .map(|i| typed_placeholder(i, sql_type))
                .collect::<Vec<_>>()
                .join(", ");
            Ok(Fragment::new(
                format!("{} IN ({list})", column(field)?),
                values.clone(),
            ))
        }
        Filter::And(all) => combine(all, " AND ", "TRUE", alias, format, start),
        Filter::Or(any) => combine(any, " OR ", "FALSE", alias, format, start),
        Filter::Not(inner) => {
            let inner = render_filter(inner, alias, format, start)?;
            Ok(Fragment::new(format!("NOT ({})", inner.sql), inner.params))
        }
    }
}

fn combine(
    filters: &[Filter],
    joiner: &str,
    empty: &str,
    alias: &str,
    format: &Format,
    start: usize,
) -> Result<Fragment> {
    if filters.is_empty() {
        return Ok(Fragment::text(empty));
    }
    let mut next = start;
    let mut parts = Vec::with_capacity(filters.len());
    let mut params = Vec::new();
    for filter in filters {
        let part = render_filter(filter, alias, format, next)?;
        next = part.next_index(next);
        parts.push(part.sql);
        params.extend(part.params);
    }
    Ok(Fragment::new(format!("({})", parts.join(joiner)), params))
}

/// `"alias"."col" ASC, ...`, or an empty string for no sort.
pub fn render_sort(sort: &[Sort], alias: &str, format: &Format) -> Result<String> {
    let mut parts = Vec::with_capacity(sort.len());
    for s in sort {
        let dir = match s.direction {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        };
        parts.push(format!("{} {dir}", qualified(alias, format.require_column(&s.field)?)));
    }
    Ok(parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article() -> Format {
        Format::new("article", "article")
            .field("id", "id")
            .field("title", "title")
            .field("authorId", "author_id")
    }

    #[test]
    fn test_comparisons() -> Result<()> {
        let f = render_filter(&Filter::eq("authorId", 7), "1", &article(), 3)?;
        assert_eq!(f.sql, "\"1\".\"author_id\" = $3");
        assert_eq!(f.params, vec![Value::Int(7)]);

        let f = render_filter(&Filter::like("title", "A%"), "0", &article(), 1)?;
        assert_eq!(f.sql, "\"0\".\"title\" LIKE $1");
        Ok(())
    }

    #[test]
    fn test_null_comparisons_render_is_null() -> Result<()> {
        let f = render_filter(&Filter::eq("title", Value::Null), "0", &article(), 1)?;
        assert_eq!(f.sql, "\"0\".\"title\" IS NULL");
        assert!(f.params.is_empty());

        let f = render_filter(&Filter::ne("title", Value::Null), "0", &article(), 1)?;
        assert_eq!(f.sql, "\"0\".\"title\" IS NOT NULL");
        Ok(())
    }

    #[test]
    fn test_in_list() -> Result<()> {
        let f = render_filter(&Filter::is_in("id", [1, 2, 3]), "0", &article(), 2)?;
        assert_eq!(f.sql, "\"0\".\"id\" IN ($2, $3, $4)");
        assert_eq!(f.next_index(2), 5);

        let empty: Vec<i64> = Vec::new();
        let f = render_filter(&Filter::is_in("id", empty), "0", &article(), 2)?;
        assert_eq!(f.sql, "FALSE");
        Ok(())
    }

    #[test]
    fn test_nested_indexes_run_left_to_right() -> Result<()> {
        let filter = Filter::Or(vec![
            Filter::gt("id", 10),
            Filter::eq("title", "x").and(Filter::lt("id", 3)).negate(),
        ]);
        let f = render_filter(&filter, "0", &article(), 1)?;
        assert_eq!(
            f.sql,
            "(\"0\".\"id\" > $1 OR NOT ((\"0\".\"title\" = $2 AND \"0\".\"id\" < $3)))"
        );
        assert_eq!(
            f.params,
            vec![Value::Int(10), Value::Text("x".into()), Value::Int(3)]
        );
        assert_eq!(render_filter(&Filter::And(vec![]), "0", &article(), 1)?.sql, "TRUE");
        Ok(())
    }

    #[test]
    fn test_typed_columns_cast_their_params() -> Result<()> {
        let device = Format::new("device", "device")
            .typed_field("id", "id", "uuid")
            .typed_field("seenAt", "seen_at", "timestamptz")
            .field("label", "label");
        let id = "6f1c0e5a-3b7d-4c1e-9a55-0d2f1e8b7c01";

        let f = render_filter(&Filter::eq("id", id), "0", &device, 1)?;
        assert_eq!(f.sql, "\"0\".\"id\" = $1::uuid");
        assert_eq!(f.params, vec![Value::Text(id.into())]);

        let f = render_filter(&Filter::gt("seenAt", "2024-01-01T00:00:00Z"), "0", &device, 2)?;
        assert_eq!(f.sql, "\"0\".\"seen_at\" > $2::timestamptz");

        let f = render_filter(&Filter::is_in("id", [id, id]), "0", &device, 1)?;
        assert_eq!(f.sql, "\"0\".\"id\" IN ($1::uuid, $2::uuid)");

        let f = render_filter(&Filter::like("label", "a%"), "0", &device, 1)?;
        assert_eq!(f.sql, "\"0\".\"label\" LIKE $1");
        Ok(())
    }

    #[test]
    fn test_unknown_field() {
        let err = render_filter(&Filter::eq("body", 1), "0", &article(), 1).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_sort() -> Result<()> {
        let sql = render_sort(&[Sort::desc("title"), Sort::asc("id")], "1", &article())?;
        assert_eq!(sql, "\"1\".\"title\" DESC, \"1\".\"id\" ASC");
        assert_eq!(render_sort(&[], "1", &article())?, "");
        Ok(())
    }
}
