//! # college-shared
//!
//! Vocabulary shared by the store and the server: identities and the closed
//! role set, answer/citation payloads, paging helpers, and the pure
//! access-control evaluator.

pub mod access;
pub mod constants;
pub mod error;
pub mod types;

pub use access::{
    evaluate, AccessRequest, ChatAction, DatasetAction, Decision, DenyReason, TopicAction,
};
pub use error::RoleError;
pub use types::*;
