//! 记忆与检索层：对话记录（调用方持有）、向量检索接口、内存 / Pinecone 向量库

pub mod conversation;
pub mod pinecone;
pub mod rag;
pub mod vector_store;

pub use conversation::{exchanges_to_messages, ConversationLog, Exchange, Message, Role};
pub use pinecone::PineconeVectorStore;
pub use rag::{Chunker, ChunkingConfig, CorpusPaper, InMemoryVectorStore};
pub use vector_store::{Document, MetadataFilter, VectorStore, VectorStoreError};
