//! REST API gateway module for the project-management backend.
//!
//! This module provides the `ApiClient` through which every request to the
//! backend is made. It attaches the bearer token of the persisted session
//! and turns credential rejections into forced session termination.
//!
//! The API uses JWT bearer token authentication obtained from the
//! `/auth/login` and `/auth/register` endpoints.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
