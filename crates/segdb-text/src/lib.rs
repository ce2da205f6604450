pub mod tantivy_utils;
pub mod tokenizer;
pub mod index;

pub use index::{LexicalIndex, LexicalStats};
pub use tokenizer::Tokenizer;
