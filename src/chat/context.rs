//! Context assembly and reply streaming for one chat.
//!
//! The assembler joins the two inputs a generator needs, a bounded,
//! time-ordered slice of the chat's history and the reranked chunks for
//! the current query, and owns turn persistence around the reply
//! stream. A chat runs one generation at a time:
//! [`ContextAssembler::stream_reply`] holds a per-chat lock from the
//! user turn to the end of the stream. The assistant turn is persisted
//! only after the stream finishes cleanly; dropping the stream (client
//! cancel) or a mid-stream generator error leaves no assistant turn
//! behind.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RagConfig;
use crate::embedding::Embedder;
use crate::error::RagResult;
use crate::generation::{FragmentStream, Generator};
use crate::retrieve::{RetrievedChunk, Retriever};
use crate::store::{Turn, TurnRole, TurnStore, VectorStore};

use super::history::HistoryCache;

static REASONING_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());

/// Removes `<think>…</think>` spans. Applied to the reply before it is
/// persisted, never to the live stream.
fn strip_reasoning(text: &str) -> String {
    REASONING_SPAN.replace_all(text, "").trim().to_string()
}

/// Everything the generator needs for one reply.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub chat_id: Uuid,
    /// Recent turns, oldest to newest, at most the requested window.
    pub turns: Vec<Turn>,
    /// Reranked chunks, best first. Empty when nothing was retrieved;
    /// generation proceeds without grounding context in that case.
    pub context_chunks: Vec<RetrievedChunk>,
    /// The user query driving this reply.
    pub query: String,
}

/// Prepares generation input and persists turns around the reply stream.
pub struct ContextAssembler {
    config: RagConfig,
    retriever: Retriever,
    turns: Arc<dyn TurnStore>,
    history: Arc<HistoryCache>,
    generator: Arc<dyn Generator>,
    document_scope: Option<Vec<Uuid>>,
    chat_locks: parking_lot::Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl ContextAssembler {
    /// Wires the assembler over its collaborators. Fails fast on invalid
    /// configuration or an embedder/deployment dimension mismatch.
    pub fn new(
        config: RagConfig,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorStore>,
        turns: Arc<dyn TurnStore>,
        generator: Arc<dyn Generator>,
    ) -> RagResult<Self> {
        let retriever = Retriever::new(config.clone(), embedder, index)?;
        let history = Arc::new(HistoryCache::new(config.history.clone()));
        Ok(Self {
            config,
            retriever,
            turns,
            history,
            generator,
            document_scope: None,
            chat_locks: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    /// Restricts retrieval to the given documents, e.g. one knowledge
    /// base's worth.
    pub fn with_document_scope(mut self, documents: Vec<Uuid>) -> Self {
        self.document_scope = Some(documents);
        self
    }

    /// Builds the generation input for `query`: up to `history_limit`
    /// recent turns (oldest to newest) plus the reranked chunks. Unknown
    /// chats fail with a not-found error; an empty index degrades to an
    /// empty chunk list.
    pub async fn assemble(
        &self,
        chat_id: Uuid,
        query: &str,
        history_limit: usize,
    ) -> RagResult<AssembledContext> {
        let turns = self.history_window(chat_id, history_limit).await?;
        let context_chunks = self
            .retriever
            .retrieve_scoped(query, self.document_scope.as_deref())
            .await?;
        debug!(
            %chat_id,
            turns = turns.len(),
            chunks = context_chunks.len(),
            "context assembled"
        );
        Ok(AssembledContext {
            chat_id,
            turns,
            context_chunks,
            query: query.to_string(),
        })
    }

    /// Appends a turn to the durable store and writes it through to the
    /// history cache.
    pub async fn record_turn(
        &self,
        chat_id: Uuid,
        role: TurnRole,
        content: &str,
    ) -> RagResult<Turn> {
        let turn = self.turns.append_turn(chat_id, role, content).await?;
        self.history.append(chat_id, turn.clone());
        Ok(turn)
    }

    /// Runs one full reply: records the user turn, assembles context,
    /// opens the generator stream, and forwards its fragments. When the
    /// stream ends cleanly the assistant turn is persisted, with
    /// reasoning spans stripped. The chat stays locked until the
    /// returned stream is exhausted or dropped.
    pub async fn stream_reply(&self, chat_id: Uuid, query: &str) -> RagResult<FragmentStream> {
        let lock = self.chat_lock(chat_id);
        let guard = lock.lock_owned().await;

        self.record_turn(chat_id, TurnRole::User, query).await?;
        let context = self
            .assemble(chat_id, query, self.config.history.window)
            .await?;
        let mut inner = self.generator.stream_reply(&context).await?;

        let turns = Arc::clone(&self.turns);
        let history = Arc::clone(&self.history);
        let stream = async_stream::stream! {
            // Held for the life of the stream; dropping it mid-flight
            // releases the chat without reaching the persist step below.
            let _guard = guard;
            let mut reply = String::new();
            let mut failed = false;

            while let Some(fragment) = inner.next().await {
                match fragment {
                    Ok(text) => {
                        reply.push_str(&text);
                        yield Ok(text);
                    }
                    Err(err) => {
                        warn!(%chat_id, error = %err, "generation failed mid-stream; assistant turn not recorded");
                        failed = true;
                        yield Err(err);
                        break;
                    }
                }
            }

            if !failed {
                let cleaned = strip_reasoning(&reply);
                match turns.append_turn(chat_id, TurnRole::Assistant, &cleaned).await {
                    Ok(turn) => {
                        debug!(%chat_id, chars = cleaned.len(), "assistant turn recorded");
                        history.append(chat_id, turn);
                    }
                    Err(err) => yield Err(err),
                }
            }
        };
        Ok(Box::pin(stream))
    }

    /// Last `limit` turns, oldest to newest, from the cache when it can
    /// answer authoritatively, otherwise refilled from the turn store.
    async fn history_window(&self, chat_id: Uuid, limit: usize) -> RagResult<Vec<Turn>> {
        if let Some(window) = self.history.recent(chat_id, limit) {
            return Ok(window);
        }
        let fetch = limit.max(self.config.history.capacity);
        let mut turns = self.turns.recent_turns(chat_id, fetch).await?;
        let complete = turns.len() < fetch;
        turns.reverse();
        self.history.fill(chat_id, turns.clone(), complete);
        let skip = turns.len().saturating_sub(limit);
        Ok(turns.split_off(skip))
    }

    fn chat_lock(&self, chat_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.chat_locks.lock();
        // An entry only the registry references has no holder or waiter.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            locks
                .entry(chat_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::embedding::OfflineEmbedder;
    use crate::error::{NotFoundKind, RagError};
    use crate::store::{IndexEntry, MemoryStore};

    /// Generator that plays back a fixed script and captures the context
    /// it was handed.
    struct ScriptedGenerator {
        script: Vec<Result<&'static str, &'static str>>,
        seen: parking_lot::Mutex<Option<AssembledContext>>,
    }

    impl ScriptedGenerator {
        fn new(script: Vec<Result<&'static str, &'static str>>) -> Arc<Self> {
            Arc::new(Self {
                script,
                seen: parking_lot::Mutex::new(None),
            })
        }

        fn seen_context(&self) -> AssembledContext {
            self.seen.lock().clone().expect("generator never invoked")
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn stream_reply(&self, context: &AssembledContext) -> RagResult<FragmentStream> {
            *self.seen.lock() = Some(context.clone());
            let items: Vec<RagResult<String>> = self
                .script
                .iter()
                .map(|entry| match entry {
                    Ok(text) => Ok(text.to_string()),
                    Err(message) => Err(RagError::Generation(message.to_string())),
                })
                .collect();
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn assembler_over(store: &Arc<MemoryStore>, generator: Arc<dyn Generator>) -> ContextAssembler {
        let mut config = RagConfig::default();
        config.embedding.dimension = 16;
        ContextAssembler::new(
            config,
            Arc::new(OfflineEmbedder::new(16)),
            Arc::clone(store) as Arc<dyn VectorStore>,
            Arc::clone(store) as Arc<dyn TurnStore>,
            generator,
        )
        .unwrap()
    }

    async fn drain(stream: &mut FragmentStream) -> (Vec<String>, Option<RagError>) {
        let mut fragments = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(text) => fragments.push(text),
                Err(err) => return (fragments, Some(err)),
            }
        }
        (fragments, None)
    }

    #[test]
    fn test_strip_reasoning_spans() {
        assert_eq!(strip_reasoning("<think>plan</think>Answer."), "Answer.");
        assert_eq!(
            strip_reasoning("a<think>one</think>b<think>two\nlines</think>c"),
            "abc"
        );
        // An unclosed tag is not a span; leave it alone.
        assert_eq!(strip_reasoning("<think>dangling"), "<think>dangling");
        assert_eq!(strip_reasoning("no tags"), "no tags");
    }

    #[tokio::test]
    async fn test_assemble_orders_history_and_caps_window() {
        let store = Arc::new(MemoryStore::default());
        let chat = store.create_chat();
        for (role, content) in [
            (TurnRole::User, "t1"),
            (TurnRole::Assistant, "t2"),
            (TurnRole::User, "t3"),
            (TurnRole::Assistant, "t4"),
            (TurnRole::User, "t5"),
        ] {
            store.append_turn(chat, role, content).await.unwrap();
        }
        let assembler = assembler_over(&store, ScriptedGenerator::new(vec![]));

        let context = assembler.assemble(chat, "query", 3).await.unwrap();
        assert_eq!(context.query, "query");
        assert!(context.context_chunks.is_empty());
        let contents: Vec<&str> = context.turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["t3", "t4", "t5"]);
        for pair in context.turns.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
    }

    #[tokio::test]
    async fn test_assemble_unknown_chat_is_not_found() {
        let store = Arc::new(MemoryStore::default());
        let assembler = assembler_over(&store, ScriptedGenerator::new(vec![]));
        let err = assembler
            .assemble(Uuid::new_v4(), "query", 3)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::NotFound {
                kind: NotFoundKind::Chat,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_assemble_includes_retrieved_chunks() {
        let store = Arc::new(MemoryStore::default());
        let chat = store.create_chat();
        let document = store.add_document("source");
        let embedder = OfflineEmbedder::new(16);
        let mut entries = Vec::new();
        for text in ["alpha beta gamma", "delta epsilon"] {
            entries.push(IndexEntry {
                chunk_id: Uuid::new_v4(),
                content: text.to_string(),
                vector: embedder.embed_text(text).await.unwrap(),
            });
        }
        store.replace_document_index(document, entries).await.unwrap();

        let assembler = assembler_over(&store, ScriptedGenerator::new(vec![]));
        let context = assembler.assemble(chat, "alpha beta gamma", 3).await.unwrap();
        assert!(!context.context_chunks.is_empty());
        assert_eq!(context.context_chunks[0].content, "alpha beta gamma");
    }

    #[tokio::test]
    async fn test_record_turn_persists_and_shows_in_window() {
        let store = Arc::new(MemoryStore::default());
        let chat = store.create_chat();
        let assembler = assembler_over(&store, ScriptedGenerator::new(vec![]));

        let turn = assembler
            .record_turn(chat, TurnRole::User, "hello")
            .await
            .unwrap();
        assert_eq!(turn.role, TurnRole::User);
        assert_eq!(store.turn_count(chat), 1);

        let context = assembler.assemble(chat, "next", 5).await.unwrap();
        assert_eq!(context.turns.len(), 1);
        assert_eq!(context.turns[0].content, "hello");
    }

    #[tokio::test]
    async fn test_stream_reply_persists_assistant_turn_on_completion() {
        let store = Arc::new(MemoryStore::default());
        let chat = store.create_chat();
        let generator = ScriptedGenerator::new(vec![Ok("Hel"), Ok("lo.")]);
        let assembler = assembler_over(&store, generator);

        let mut stream = assembler.stream_reply(chat, "greet me").await.unwrap();
        let (fragments, failure) = drain(&mut stream).await;
        assert!(failure.is_none());
        assert_eq!(fragments, vec!["Hel".to_string(), "lo.".to_string()]);

        let turns = store.recent_turns(chat, 10).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, TurnRole::Assistant);
        assert_eq!(turns[0].content, "Hello.");
        assert_eq!(turns[1].role, TurnRole::User);
        assert_eq!(turns[1].content, "greet me");
    }

    #[tokio::test]
    async fn test_cancelled_stream_records_no_assistant_turn() {
        let store = Arc::new(MemoryStore::default());
        let chat = store.create_chat();
        let generator = ScriptedGenerator::new(vec![Ok("a"), Ok("b"), Ok("c")]);
        let assembler = assembler_over(&store, generator);

        let mut stream = assembler.stream_reply(chat, "question").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, "a");
        drop(stream);

        // Only the user turn survives the cancellation.
        let turns = store.recent_turns(chat, 10).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, TurnRole::User);
    }

    #[tokio::test]
    async fn test_mid_stream_error_aborts_turn_recording() {
        let store = Arc::new(MemoryStore::default());
        let chat = store.create_chat();
        let generator = ScriptedGenerator::new(vec![Ok("partial"), Err("backend died")]);
        let assembler = assembler_over(&store, generator);

        let mut stream = assembler.stream_reply(chat, "question").await.unwrap();
        let (fragments, failure) = drain(&mut stream).await;
        assert_eq!(fragments, vec!["partial".to_string()]);
        assert!(matches!(failure, Some(RagError::Generation(_))));
        assert!(stream.next().await.is_none());

        let turns = store.recent_turns(chat, 10).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, TurnRole::User);
    }

    #[tokio::test]
    async fn test_reasoning_stripped_from_persisted_turn_not_stream() {
        let store = Arc::new(MemoryStore::default());
        let chat = store.create_chat();
        let generator = ScriptedGenerator::new(vec![
            Ok("<think>work through it"),
            Ok(" step by step</think>"),
            Ok("Final answer."),
        ]);
        let assembler = assembler_over(&store, generator);

        let mut stream = assembler.stream_reply(chat, "question").await.unwrap();
        let (fragments, failure) = drain(&mut stream).await;
        assert!(failure.is_none());
        // The live stream carries the reasoning verbatim.
        assert_eq!(
            fragments.concat(),
            "<think>work through it step by step</think>Final answer."
        );

        let turns = store.recent_turns(chat, 1).await.unwrap();
        assert_eq!(turns[0].role, TurnRole::Assistant);
        assert_eq!(turns[0].content, "Final answer.");
    }

    #[tokio::test]
    async fn test_generator_receives_history_chunks_and_query() {
        let store = Arc::new(MemoryStore::default());
        let chat = store.create_chat();
        store
            .append_turn(chat, TurnRole::User, "earlier question")
            .await
            .unwrap();
        store
            .append_turn(chat, TurnRole::Assistant, "earlier answer")
            .await
            .unwrap();
        let generator = ScriptedGenerator::new(vec![Ok("ok")]);
        let assembler = assembler_over(&store, Arc::clone(&generator) as Arc<dyn Generator>);

        let mut stream = assembler.stream_reply(chat, "the query").await.unwrap();
        let (_, failure) = drain(&mut stream).await;
        assert!(failure.is_none());

        let context = generator.seen_context();
        assert_eq!(context.chat_id, chat);
        assert_eq!(context.query, "the query");
        assert!(context.context_chunks.is_empty());
        // The window covers the just-recorded user turn plus the prior
        // exchange, bounded by the configured window of three.
        let contents: Vec<&str> = context.turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["earlier question", "earlier answer", "the query"]);
    }

    #[tokio::test]
    async fn test_one_generation_at_a_time_per_chat() {
        let store = Arc::new(MemoryStore::default());
        let chat = store.create_chat();
        let other_chat = store.create_chat();
        let generator = ScriptedGenerator::new(vec![Ok("reply")]);
        let assembler = Arc::new(assembler_over(&store, generator));

        let active = assembler.stream_reply(chat, "first").await.unwrap();

        // Same chat waits for the active stream; a different chat does not.
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), assembler.stream_reply(chat, "second"))
                .await;
        assert!(blocked.is_err(), "second generation started while one was active");
        let independent = tokio::time::timeout(
            Duration::from_millis(500),
            assembler.stream_reply(other_chat, "elsewhere"),
        )
        .await;
        assert!(independent.is_ok());

        drop(active);
        let unblocked =
            tokio::time::timeout(Duration::from_millis(500), assembler.stream_reply(chat, "second"))
                .await;
        assert!(unblocked.is_ok());
    }

    #[tokio::test]
    async fn test_stream_reply_unknown_chat_is_not_found() {
        let store = Arc::new(MemoryStore::default());
        let assembler = assembler_over(&store, ScriptedGenerator::new(vec![Ok("x")]));
        let err = assembler
            .stream_reply(Uuid::new_v4(), "question")
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            RagError::NotFound {
                kind: NotFoundKind::Chat,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_window_refills_from_store_after_cache_expiry() {
        let store = Arc::new(MemoryStore::default());
        let chat = store.create_chat();
        let mut config = RagConfig::default();
        config.embedding.dimension = 16;
        config.history.ttl_seconds = 0;
        let assembler = ContextAssembler::new(
            config,
            Arc::new(OfflineEmbedder::new(16)),
            Arc::clone(&store) as Arc<dyn VectorStore>,
            Arc::clone(&store) as Arc<dyn TurnStore>,
            ScriptedGenerator::new(vec![]),
        )
        .unwrap();

        assembler
            .record_turn(chat, TurnRole::User, "kept")
            .await
            .unwrap();
        // Zero TTL expires the cache entry immediately, so each window
        // comes back from the durable store.
        let context = assembler.assemble(chat, "query", 3).await.unwrap();
        assert_eq!(context.turns.len(), 1);
        assert_eq!(context.turns[0].content, "kept");
    }
}
