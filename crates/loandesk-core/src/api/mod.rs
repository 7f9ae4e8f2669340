//! REST API client module for the loan platform backend.
//!
//! This module provides the `ApiClient`, the single path through which
//! authenticated calls reach the backend. It attaches the stored bearer
//! token and, when the backend answers 401/403, refreshes the token once
//! and retries the request once.

pub mod client;
pub mod error;

pub use client::{ApiClient, RequestOptions};
pub use error::ApiError;
