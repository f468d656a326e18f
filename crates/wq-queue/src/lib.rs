//! Parent/child queue synchronization.
//!
//! Work is pulled down from a parent queue, expanded and annotated locally, handed to
//! the execution layer at most once, and its progress is folded back up the hierarchy.

pub mod arena;
pub mod error;
pub mod execution;
pub mod failure;
pub mod http;
pub mod maintenance;
pub mod parent;
pub mod poller;
pub mod sync;

pub use arena::*;
pub use error::*;
pub use execution::*;
pub use failure::*;
pub use http::*;
pub use parent::*;
pub use poller::*;
pub use sync::*;
