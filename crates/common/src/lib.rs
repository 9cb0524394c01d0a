//! Shared configuration, error taxonomy and domain types for Herald.

pub mod config;
pub mod db;
pub mod error;
pub mod types;
