//! Exact cosine nearest-neighbour index over embedded transcript segments.
//!
//! Embeddings come from an injected [`Embedder`](segdb_core::traits::Embedder);
//! the index keeps `(embedding, document)` pairs in insertion order so that
//! positions line up with the lexical index built from the same documents.

mod index;

pub use index::{VectorIndex, VectorStats};
