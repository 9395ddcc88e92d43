//! # qalabot-backend
//!
//! Adapters for the citizen-reporting HTTP backend: the domain API client
//! and the photo storage collaborator.

pub mod api;
pub mod photos;

pub use api::BackendClient;
pub use photos::HttpPhotoStorage;
