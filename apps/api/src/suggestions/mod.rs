pub mod documents;
pub mod handlers;
pub mod prompts;
pub mod requestor;
pub mod service;
