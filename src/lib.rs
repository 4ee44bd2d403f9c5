//! Per-tenant credential store and signed bearer-token service.
//!
//! - [`auth::CredentialStore`] keeps salted PBKDF2 credentials in a JSON file.
//! - [`auth::AuthService`] turns verified credentials into HS256 tokens and
//!   validates presented tokens.
//! - [`gateway`] exposes both over HTTP; [`config`] loads the startup secrets.

pub mod auth;
pub mod config;
pub mod gateway;
