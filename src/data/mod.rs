//! Data layer module
//!
//! Domain records shared by the backend, the query cache and the services:
//! - Accounts, sessions and user profiles
//! - Posts and their create/update inputs
//! - Paging types

mod models;

pub use models::*;
