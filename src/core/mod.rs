pub mod config;
pub mod error;
pub mod logbuf;
pub mod runtime;
pub mod settings;
