pub mod field;
pub mod profile;
pub mod suggestion;
