//! Reply generation seam.
//!
//! The pipeline ends at a [`Generator`]: it takes an assembled context
//! and returns a stream of reply fragments. Everything upstream (history
//! window, retrieved chunks, query) is already resolved by the time this
//! trait is called, so implementations only talk to their model backend.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::chat::AssembledContext;
use crate::error::RagResult;

/// Stream of reply fragments. Exhaustion means clean completion; an
/// `Err` item means the stream died mid-flight and the fragments seen so
/// far must be discarded, not recorded.
pub type FragmentStream = Pin<Box<dyn Stream<Item = RagResult<String>> + Send>>;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Opens a reply stream for the assembled context. `Err` here means
    /// the stream never started; mid-flight failures arrive as `Err`
    /// items on the returned stream.
    async fn stream_reply(&self, context: &AssembledContext) -> RagResult<FragmentStream>;
}
