use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use segdb_core::storage::{self, ArtifactHeader};
use segdb_core::traits::RetrievalEngine;
use segdb_core::types::{ArtifactKind, Bm25Params, Document, Language, SearchHit, SourceKind};
use segdb_core::{Error, Result};

use crate::tokenizer::Tokenizer;

/// `(position, term frequency)`
type Posting = (u32, u32);

#[derive(Serialize, Deserialize)]
struct LexicalBody {
	params: Bm25Params,
	language: Language,
	documents: Vec<Document>,
	doc_lengths: Vec<u32>,
	postings: BTreeMap<String, Vec<Posting>>,
	avg_doc_length: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalStats {
	pub document_count: usize,
	pub vocabulary_size: usize,
	pub avg_doc_length: f32,
	pub total_tokens: u64,
	pub params: Bm25Params,
	pub language: Language,
}

/// In-memory BM25 index. Positions are insertion order.
pub struct LexicalIndex {
	params: Bm25Params,
	tokenizer: Tokenizer,
	documents: Vec<Document>,
	doc_lengths: Vec<u32>,
	postings: BTreeMap<String, Vec<Posting>>,
	idf: HashMap<String, f32>,
	avg_doc_length: f32,
	total_tokens: u64,
	loaded: bool,
}

impl LexicalIndex {
	pub fn new(params: Bm25Params, language: Language) -> Result<Self> {
		Ok(Self {
			params,
			tokenizer: Tokenizer::new(language)?,
			documents: Vec::new(),
			doc_lengths: Vec::new(),
			postings: BTreeMap::new(),
			idf: HashMap::new(),
			avg_doc_length: 0.0,
			total_tokens: 0,
			loaded: false,
		})
	}

	pub fn tokenizer(&self) -> &Tokenizer {
		&self.tokenizer
	}

	pub fn is_loaded(&self) -> bool {
		self.loaded
	}

	pub fn idf(&self, term: &str) -> Option<f32> {
		self.idf.get(term).copied()
	}

	pub fn stats(&self) -> LexicalStats {
		LexicalStats {
			document_count: self.documents.len(),
			vocabulary_size: self.postings.len(),
			avg_doc_length: self.avg_doc_length,
			total_tokens: self.total_tokens,
			params: self.params,
			language: self.tokenizer.language(),
		}
	}

	fn recompute(&mut self) {
		self.total_tokens = self.doc_lengths.iter().map(|&l| u64::from(l)).sum();
		let n = self.documents.len() as f32;
		self.avg_doc_length = if self.documents.is_empty() { 0.0 } else { self.total_tokens as f32 / n };
		let epsilon = self.params.epsilon;
		self.idf = self
			.postings
			.iter()
			.map(|(term, list)| {
				let df = list.len() as f32;
				let idf = ((n - df + 0.5) / (df + 0.5)).ln();
				(term.clone(), idf.max(epsilon))
			})
			.collect();
	}

	fn score_term(&self, idf: f32, tf: u32, doc_len: u32) -> f32 {
		let Bm25Params { k1, b, .. } = self.params;
		let tf = tf as f32;
		let norm = if self.avg_doc_length > 0.0 { doc_len as f32 / self.avg_doc_length } else { 0.0 };
		idf * tf * (k1 + 1.0) / (tf + k1 * (1.0 - b + b * norm))
	}
}

impl RetrievalEngine for LexicalIndex {
	fn kind(&self) -> ArtifactKind {
		ArtifactKind::Lexical
	}

	fn clear(&mut self) {
		self.documents.clear();
		self.doc_lengths.clear();
		self.postings.clear();
		self.idf.clear();
		self.avg_doc_length = 0.0;
		self.total_tokens = 0;
		self.loaded = false;
	}

	fn add(&mut self, documents: &[Document]) -> Result<()> {
		let base = self.documents.len();
		for (offset, doc) in documents.iter().enumerate() {
			let position = u32::try_from(base + offset)
				.map_err(|_| Error::InvalidDocument("lexical index is limited to u32::MAX documents".into()))?;
			let tokens = self.tokenizer.tokenize(&doc.text);
			let mut tf: BTreeMap<String, u32> = BTreeMap::new();
			for token in &tokens {
				*tf.entry(token.clone()).or_insert(0) += 1;
			}
			for (term, count) in tf {
				self.postings.entry(term).or_default().push((position, count));
			}
			self.doc_lengths.push(tokens.len() as u32);
			self.documents.push(doc.clone());
		}
		self.recompute();
		self.loaded = true;
		debug!(documents = self.documents.len(), vocabulary = self.postings.len(), "lexical index updated");
		Ok(())
	}

	fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
		if !self.loaded {
			return Err(Error::NotLoaded("lexical"));
		}
		if top_k == 0 {
			return Ok(Vec::new());
		}
		let mut scores: HashMap<u32, f32> = HashMap::new();
		for token in self.tokenizer.tokenize(query) {
			let (Some(list), Some(&idf)) = (self.postings.get(&token), self.idf.get(&token)) else { continue };
			for &(position, tf) in list {
				let len = self.doc_lengths[position as usize];
				*scores.entry(position).or_insert(0.0) += self.score_term(idf, tf, len);
			}
		}

		let mut ranked: Vec<(u32, f32)> = scores.into_iter().filter(|(_, s)| *s > 0.0).collect();
		ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));
		ranked.truncate(top_k);

		Ok(ranked
			.into_iter()
			.map(|(position, score)| SearchHit {
				position: position as usize,
				document: self.documents[position as usize].clone(),
				score,
				source: SourceKind::Lexical,
			})
			.collect())
	}

	fn save(&self, path: &Path, header: &ArtifactHeader) -> Result<()> {
		let body = LexicalBody {
			params: self.params,
			language: self.tokenizer.language(),
			documents: self.documents.clone(),
			doc_lengths: self.doc_lengths.clone(),
			postings: self.postings.clone(),
			avg_doc_length: self.avg_doc_length,
		};
		storage::write_artifact(path, header, &body)
	}

	fn load(&mut self, path: &Path) -> Result<ArtifactHeader> {
		let (header, body): (ArtifactHeader, LexicalBody) = storage::read_artifact(path)?;
		let n = body.documents.len();
		if body.doc_lengths.len() != n || n != header.document_count {
			return Err(Error::Serialization(format!(
				"lexical artifact {} is inconsistent: {} documents, {} lengths, header says {}",
				path.display(),
				n,
				body.doc_lengths.len(),
				header.document_count
			)));
		}
		if body.postings.values().flatten().any(|&(position, _)| position as usize >= n) {
			return Err(Error::Serialization(format!("lexical artifact {} has out-of-range postings", path.display())));
		}
		if body.language != self.tokenizer.language() {
			self.tokenizer = Tokenizer::new(body.language)?;
		}
		self.params = body.params;
		self.documents = body.documents;
		self.doc_lengths = body.doc_lengths;
		self.postings = body.postings;
		self.recompute();
		self.loaded = true;
		Ok(header)
	}

	fn len(&self) -> usize {
		self.documents.len()
	}
}
