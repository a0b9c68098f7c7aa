//! Row sources backed by real databases.

mod postgres;

pub use postgres::{PgRowSource, PgRowSourceFactory};
