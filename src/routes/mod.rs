//! HTTP route handlers.
//!
//! `opt_outs` serves the signed links from outgoing mail and is mounted under
//! the configured prefix. `admin` and `health` are JSON endpoints annotated
//! with `#[openapi]` and mounted under `/api/v1`.

pub mod admin;
pub mod health;
pub mod opt_outs;
