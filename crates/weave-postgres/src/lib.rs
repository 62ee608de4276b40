//! PostgreSQL execution port for weave

pub mod decode;
pub mod port;

pub use decode::{decode_row, decode_value};
pub use port::PgExecutionPort;
