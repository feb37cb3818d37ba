// Conversational context: bounded history plus the context assembler.

pub mod context;
pub mod history;

pub use context::{AssembledContext, ContextAssembler};
pub use history::HistoryCache;
