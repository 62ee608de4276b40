use std::sync::Arc;

use anyhow::{bail, Result};

use super::helpers::quote_ident;

/// One projected column: `"source"."column" AS "alias"` or `"source".*`.
///
/// Identifiers are quoted, not validated: catalogue names are checked when
/// registered, while node aliases (`0`, `1_j`) and column aliases
/// (`1.title`, `2.#local`) are generated.
#[derive(Clone)]
pub struct Selector {
    source: Option<Arc<str>>,
    column: Arc<str>,
    alias: Option<Arc<str>>,
}

impl Selector {
    pub fn new(column: &str) -> Self {
        Selector {
            source: None,
            column: Arc::from(column),
            alias: None,
        }
    }

    /// `"source".*`
    pub fn wildcard(source: &str) -> Self {
        Selector::new("*").set_source(source)
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn set_source(mut self, source: &str) -> Self {
        self.source = Some(Arc::from(source));
        self
    }

    pub fn set_alias(mut self, alias: &str) -> Self {
        self.alias = Some(Arc::from(alias));
        self
    }

    pub fn to_sql(&self) -> Result<String> {
        if &*self.column == "*" {
            if self.alias.is_some() {
                bail!("cannot alias a wildcard selector");
            }
            return Ok(match &self.source {
                Some(src) => format!("{}.*", quote_ident(src)),
                None => "*".to_string(),
            });
        }
        if self.column.is_empty() {
            bail!("empty column in selector");
        }

        let expr = match &self.source {
            Some(src) => format!("{}.{}", quote_ident(src), quote_ident(&self.column)),
            None => quote_ident(&self.column),
        };
        match &self.alias {
            Some(alias) => Ok(format!("{expr} AS {}", quote_ident(alias))),
            None => Ok(expr),
        }
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("source", &self.source.as_deref())
            .field("column", &self.column)
            .field("alias", &self.alias.as_deref())
            .finish()
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_sql()
            .map_err(|_| std::fmt::Error)
            .and_then(|s| f.write_str(&s))
    }
}
