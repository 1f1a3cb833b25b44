//! Request and response models for the REST API.

pub mod auth;
pub mod pagination;
pub mod users;
