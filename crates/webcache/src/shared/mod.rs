//! # Shared Items
//!
//! Lets several consumers of the same URL share one fetch or cache read.
//! A [`SharedItem`] owns the underlying source and buffers every chunk it
//! has pulled, so a consumer that attaches late replays the same stream from
//! the start instead of starting a second fetch. Each consumer holds a
//! [`SharedApi`] with its own read position.

mod api;
mod item;

pub use api::SharedApi;
pub use item::{ItemState, SharedItem};
