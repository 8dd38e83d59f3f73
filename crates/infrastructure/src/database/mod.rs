pub mod manager;
pub mod memory;
pub mod postgres;

pub use manager::{DatabaseManager, DatabasePool};
pub use memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;
