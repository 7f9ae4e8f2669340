//! Core library for loandesk.
//!
//! This crate provides the authenticated request gateway shared by the
//! borrower portal and the admin console:
//!
//! - `auth`: token persistence, token refresh, session model, auth guard
//! - `api`: the `ApiClient` that attaches bearer tokens and retries once
//!   after a transparent refresh
//! - `config`: portal selection, token lifetimes, endpoint paths

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError, RequestOptions};
pub use auth::{
    AuthGuard, AuthenticatedUser, GuardState, RefreshClient, Role, Session, TokenStore,
};
pub use config::{Config, Portal};
