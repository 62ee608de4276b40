//! Statement execution: the database port and the plan executor.

pub mod executor;

pub use executor::{execute_plan, ExecutionOutcome};
pub use weave_shared::FailurePolicy;

use async_trait::async_trait;
use weave_shared::ExecutionConfig;

use crate::error::Result;
use crate::value::{Row, Value};

/// The database as seen by the executor.
///
/// Placeholders are PostgreSQL positional parameters (`$1`, `$2`, ...) and
/// `params[i]` binds `$i+1`. Rows are keyed by column alias.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionPort: Send + Sync {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    async fn execute_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>>;
}

/// Execution knobs, usually taken from [`ExecutionConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOptions {
    pub failure_policy: FailurePolicy,
    /// Upper bound on sibling statements in flight.
    pub max_concurrency: usize,
}

impl ExecutionOptions {
    pub fn strict() -> Self {
        ExecutionOptions {
            failure_policy: FailurePolicy::Strict,
            ..Self::default()
        }
    }
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        ExecutionOptions::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for ExecutionOptions {
    fn from(config: &ExecutionConfig) -> Self {
        ExecutionOptions {
            failure_policy: config.failure_policy,
            max_concurrency: config.max_concurrency.max(1),
        }
    }
}
