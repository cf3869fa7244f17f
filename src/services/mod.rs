//! Domain services used by the HTTP routes and the session middleware.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the external-provider and database boundaries so
//! route handlers can stay focused on protocol translation and cookie
//! plumbing.

pub mod auth;
pub mod auth_state;
pub mod profiles;
