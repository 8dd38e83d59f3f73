pub mod postgres_job_store;

pub use postgres_job_store::PostgresJobStore;
