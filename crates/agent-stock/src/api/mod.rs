//! Clients for remote analysis services

pub mod http;

pub use http::{HttpCollaborator, classify_status};
