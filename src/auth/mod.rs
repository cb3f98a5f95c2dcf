//! Authentication: credential resolution and the login protocol.
//!
//! This module provides:
//! - `credentials`: the explicit-args > environment > file resolution chain
//! - `Authenticator`: login (including duplicate-session override) and
//!   session extension

pub mod credentials;
pub mod login;

pub use credentials::{CredentialSource, Credentials};
pub use login::{Authenticator, LoginOptions, LoginOutcome};
