pub mod corpus;
pub mod database;
pub mod embeddings;
pub mod gemini;
pub mod index;
pub mod rag;
pub mod server;
