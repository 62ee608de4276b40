use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Very simple identifier guard: letters, digits, underscore only.
pub(crate) fn validate_ident(ident: &str) -> Result<()> {
    static SEG: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));
    if ident.is_empty() {
        bail!("invalid identifier: empty");
    }
    if !SEG.is_match(ident) {
        bail!("invalid identifier `{ident}`");
    }
    Ok(())
}

/// Guard for declared column types: a type name, optionally multi-word
/// (`double precision`), optionally an array (`uuid[]`).
pub(crate) fn validate_sql_type(sql_type: &str) -> Result<()> {
    static TYPE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*( [A-Za-z_][A-Za-z0-9_]*)*(\[\])?$")
            .expect("type pattern")
    });
    if !TYPE.is_match(sql_type) {
        bail!("invalid column type `{sql_type}`");
    }
    Ok(())
}

/// Double-quote an identifier, doubling any embedded quote.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `"source"."column"`
pub(crate) fn qualified(source: &str, column: &str) -> String {
    format!("{}.{}", quote_ident(source), quote_ident(column))
}

/// Positional parameter in the PostgreSQL dialect.
pub(crate) fn placeholder(index: usize) -> String {
    format!("${index}")
}

/// Placeholder cast to the column's declared type, so values decoded as
/// text (uuids, timestamps) compare against typed columns.
pub(crate) fn typed_placeholder(index: usize, sql_type: Option<&str>) -> String {
    match sql_type {
        Some(ty) => format!("${index}::{ty}"),
        None => placeholder(index),
    }
}
