//! `PostgresChitterDatabase`: the SQL-backed `ChatService` implementation.
//! Bit-exact schema in `migrations/0001_init.sql`. Every multi-row mutation
//! runs inside a transaction; any error path rolls back via `Transaction`'s
//! `Drop` or an explicit `rollback()`.

mod rows;
mod service;

pub use service::PostgresChitterDatabase;
