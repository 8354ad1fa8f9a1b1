pub mod matcher;
pub mod models;
