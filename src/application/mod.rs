//! Application services layer.

pub mod comments;
pub mod consumer;
pub mod detached;
pub mod engagement;
pub mod error;
pub mod events;
pub mod jobs;
pub mod like_state;
pub mod posts;
pub mod profiles;
pub mod repos;
