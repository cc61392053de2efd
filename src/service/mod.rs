//! Service layer
//!
//! The named operations of the client. Services orchestrate backend
//! calls, media storage and the query cache.

mod account;
mod post;

pub use account::AccountService;
pub use post::PostService;
