pub mod error;
pub mod query;
pub mod session;
pub mod store;

pub use error::{DatabaseError, DbResult};
pub use query::{Filter, Pipeline, SortOrder, Stage};
pub use session::ClientSession;
pub use store::DocumentStore;
