//! `weave`: convenience façade that re-exports `weave-core`, `weave-shared`
//! and, with the `postgres` feature, `weave-postgres`.

#![deny(missing_docs)]

/// Re-export **everything** from weave-core at the crate root, so users can `use weave::*;`.
#[doc(inline)]
pub use weave_core::*;

/// Also expose weave-core as a nested module for `weave::core::...` paths.
pub use weave_core as core;

/// Configuration, observability and retry utilities.
pub use weave_shared as shared;

pub use weave_shared::{ObservabilitySystem, WeaveConfig};

/// The PostgreSQL execution port.
#[cfg(feature = "postgres")]
#[doc(inline)]
pub use weave_postgres::PgExecutionPort;

/// Connect to PostgreSQL and build an [`Engine`] from `config`.
#[cfg(feature = "postgres")]
pub async fn connect(
    catalog: std::sync::Arc<dyn Catalog>,
    config: &WeaveConfig,
) -> Result<Engine> {
    let port = PgExecutionPort::connect(&config.database).await?;
    Ok(Engine::from_config(catalog, std::sync::Arc::new(port), config))
}
