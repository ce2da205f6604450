use tantivy::tokenizer::{TextAnalyzer, TokenStream};

use segdb_core::types::Language;
use segdb_core::Result;

use crate::tantivy_utils::{chinese_analyzer, cjk_share, english_analyzer};

const AUTO_ZH_THRESHOLD: f32 = 0.3;

/// Language-aware term extraction shared by indexing and querying.
#[derive(Clone)]
pub struct Tokenizer {
	language: Language,
	english: TextAnalyzer,
	chinese: TextAnalyzer,
}

impl Tokenizer {
	pub fn new(language: Language) -> Result<Self> {
		Ok(Self { language, english: english_analyzer(), chinese: chinese_analyzer()? })
	}

	pub fn language(&self) -> Language {
		self.language
	}

	/// Language actually used for `text`; `Auto` resolves per text.
	pub fn detect(&self, text: &str) -> Language {
		match self.language {
			Language::Auto if cjk_share(text) > AUTO_ZH_THRESHOLD => Language::Zh,
			Language::Auto => Language::En,
			fixed => fixed,
		}
	}

	pub fn tokenize(&self, text: &str) -> Vec<String> {
		if text.trim().is_empty() {
			return Vec::new();
		}
		match self.detect(text) {
			Language::Zh => collect(&self.chinese, text, |t| t.chars().count() >= 2),
			_ => collect(&self.english, text, |t| t.len() >= 2 && t.chars().all(|c| c.is_ascii_alphabetic())),
		}
	}
}

fn collect(analyzer: &TextAnalyzer, text: &str, keep: impl Fn(&str) -> bool) -> Vec<String> {
	let mut analyzer = analyzer.clone();
	let mut stream = analyzer.token_stream(text);
	let mut out = Vec::new();
	while stream.advance() {
		let token = stream.token().text.as_str();
		if keep(token) {
			out.push(token.to_string());
		}
	}
	out
}
