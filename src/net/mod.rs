pub mod client;
pub mod codec;
pub mod handler;
pub mod listener;
