//! Data model shared by the feed sources, the classifier, and storage
//!
//! - `Post`: an immutable content item pulled from an account
//! - `MediaItem`: an image attached to a post
//! - `ClassificationOutcome` / `EventRecord`: what the classifier made of a post

mod classification;
mod post;

pub use classification::{parse_outcome, ClassificationOutcome, EventRecord};
pub use post::{newest_post, MediaItem, Post};
