pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod output;
pub mod pedigree;
pub mod store;
pub mod submission;
