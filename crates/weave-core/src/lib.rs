//! Core planning, SQL synthesis, execution and folding for weave

pub mod catalog;
pub mod engine;
pub mod error;
pub mod exec;
pub mod fold;
pub mod plan;
pub mod request;
pub mod sql;
pub mod value;

pub use catalog::{
    Catalog, Field, FieldRef, Format, Junction, Relation, RelationKind, ResolvedRelation, Schema,
    Side,
};
pub use engine::{plan_and_execute, Engine, ExplainedStatement, PreparedPlan};
pub use error::*;
pub use exec::{execute_plan, ExecutionOptions, ExecutionOutcome, ExecutionPort, FailurePolicy};
pub use fold::fold;
pub use plan::{DataNode, DataNodeId, Plan, PlanCache, QueryNode, QueryNodeId};
pub use request::{Direction, Filter, RequestNode, RootQuery, Sort};
pub use sql::{QueryNodeSql, Statement};
pub use value::{NodeValue, Row, Value};
