//! PostgreSQL synthesis for query nodes.

pub mod filter;
pub mod fragment;
pub(crate) mod helpers;
pub mod selector;
pub mod statement;
pub(crate) mod synth;

pub use filter::{render_filter, render_sort};
pub use fragment::Fragment;
pub use selector::Selector;
pub use statement::{QueryNodeSql, Statement};
