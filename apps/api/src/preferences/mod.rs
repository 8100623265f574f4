pub mod handlers;
pub mod kv;
pub mod store;
