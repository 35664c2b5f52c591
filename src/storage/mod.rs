pub mod database;
#[cfg(feature = "sqlite")]
pub mod sqlite;
