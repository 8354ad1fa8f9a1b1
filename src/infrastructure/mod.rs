pub mod answer_store;
pub mod config;
pub mod error;
pub mod schedule_repository;
pub mod storage;
