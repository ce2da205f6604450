use tantivy::tokenizer::{LowerCaser, RegexTokenizer, SimpleTokenizer, StopWordFilter, TextAnalyzer};

use segdb_core::{Error, Result};

/// Runs of CJK unified ideographs.
pub const CJK_RUN: &str = r"[\x{4e00}-\x{9fff}]+";

pub const ENGLISH_STOP_WORDS: &[&str] = &[
	"i","me","my","myself","we","our","ours","ourselves","you","your","yours","yourself","yourselves",
	"he","him","his","himself","she","her","hers","herself","it","its","itself","they","them","their",
	"theirs","themselves","what","which","who","whom","this","that","these","those","am","is","are",
	"was","were","be","been","being","have","has","had","having","do","does","did","doing","a","an",
	"the","and","but","if","or","because","as","until","while","of","at","by","for","with","through",
	"during","before","after","above","below","up","down","in","out","on","off","over","under","again",
	"further","then","once",
];

pub const CHINESE_STOP_WORDS: &[&str] = &[
	"的","了","在","是","我","有","和","就","不","人","都","一","一个","上","也","很","到","说","要","去",
	"你","会","着","没有","看","好","自己","这","那","里","就是","还","把","比","或者","因为","所以",
	"但是","然后","如果","虽然","可是","然而","因此","这样","那样",
];

fn stop_words(words: &[&str]) -> StopWordFilter {
	StopWordFilter::remove(words.iter().map(|s| s.to_string()))
}

pub fn english_analyzer() -> TextAnalyzer {
	TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.filter(stop_words(ENGLISH_STOP_WORDS))
		.build()
}

pub fn chinese_analyzer() -> Result<TextAnalyzer> {
	let tokenizer = RegexTokenizer::new(CJK_RUN).map_err(|e| Error::Configuration(format!("cjk tokenizer: {e}")))?;
	Ok(TextAnalyzer::builder(tokenizer).filter(stop_words(CHINESE_STOP_WORDS)).build())
}

fn is_cjk(c: char) -> bool {
	('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Share of CJK ideographs among ASCII letters and CJK ideographs; 0 for text with neither.
pub fn cjk_share(text: &str) -> f32 {
	let (mut cjk, mut total) = (0usize, 0usize);
	for c in text.chars() {
		if is_cjk(c) {
			cjk += 1;
			total += 1;
		} else if c.is_ascii_alphabetic() {
			total += 1;
		}
	}
	if total == 0 { 0.0 } else { cjk as f32 / total as f32 }
}
