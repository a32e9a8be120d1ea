pub mod error;
pub mod ids;
pub mod query;

pub use error::{Error, Result};
pub use ids::{new_checkpoint_id, new_session_id};
pub use query::{AgentQueryOptions, OutputFormat, QueryFunction, QueryMessage, QueryStream, ResultMessage};
