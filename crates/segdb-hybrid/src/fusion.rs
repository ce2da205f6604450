//! Rank fusion of vector and lexical result lists.
//!
//! Both inputs are ranked lists of [`SearchHit`]s over the same generation, so
//! `position` identifies a document across lists. Every method is
//! deterministic: equal fused scores fall back to ascending position.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use segdb_core::types::{Document, FusionMetadata, FusionMethod, SearchHit, SourceKind};
use segdb_core::{Error, Result};

pub const DEFAULT_RRF_K: f32 = 60.0;

/// Engine weights, normalised to sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    vector: f32,
    lexical: f32,
}

impl FusionWeights {
    pub fn new(vector: f32, lexical: f32) -> Result<Self> {
        let valid = |w: f32| w.is_finite() && w >= 0.0;
        if !valid(vector) || !valid(lexical) || vector + lexical <= 0.0 {
            return Err(Error::Configuration(format!(
                "fusion weights must be finite, non-negative and not both zero (got {vector}, {lexical})"
            )));
        }
        let total = vector + lexical;
        Ok(Self { vector: vector / total, lexical: lexical / total })
    }

    pub fn vector(&self) -> f32 {
        self.vector
    }

    pub fn lexical(&self) -> f32 {
        self.lexical
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { vector: 0.6, lexical: 0.4 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionRanker {
    method: FusionMethod,
    weights: FusionWeights,
    rrf_k: f32,
}

struct Candidate<'a> {
    document: &'a Document,
    vector: Option<(usize, f32)>,
    lexical: Option<(usize, f32)>,
}

impl Candidate<'_> {
    fn ranks(&self) -> [Option<usize>; 2] {
        [self.vector.map(|(r, _)| r), self.lexical.map(|(r, _)| r)]
    }
}

impl FusionRanker {
    pub fn new(method: FusionMethod, weights: FusionWeights) -> Self {
        Self { method, weights, rrf_k: DEFAULT_RRF_K }
    }

    pub fn with_rrf_k(mut self, rrf_k: f32) -> Result<Self> {
        if !(rrf_k.is_finite() && rrf_k > 0.0) {
            return Err(Error::Configuration(format!("rrf_k must be positive (got {rrf_k})")));
        }
        self.rrf_k = rrf_k;
        Ok(self)
    }

    /// Ranker as recorded when the generation was built.
    pub fn from_metadata(metadata: &FusionMetadata) -> Result<Self> {
        let weights = FusionWeights::new(metadata.vector_weight, metadata.lexical_weight)?;
        Self::new(metadata.fusion_method, weights).with_rrf_k(metadata.rrf_k)
    }

    pub fn method(&self) -> FusionMethod {
        self.method
    }

    pub fn weights(&self) -> FusionWeights {
        self.weights
    }

    pub fn merge(&self, vector: &[SearchHit], lexical: &[SearchHit], top_k: usize) -> Vec<SearchHit> {
        if top_k == 0 {
            return Vec::new();
        }
        let candidates = collect_candidates(vector, lexical);
        let mut fused: Vec<(usize, f32)> = match self.method {
            FusionMethod::WeightedAverage => self.weighted_average(&candidates),
            FusionMethod::Rrf => candidates.iter().map(|(&p, c)| (p, self.rrf(c))).collect(),
            FusionMethod::Condorcet => self.condorcet(&candidates),
        };
        if self.method != FusionMethod::Condorcet {
            fused.sort_by(|a, b| by_score_then_position(a.1, a.0, b.1, b.0));
        }
        fused.truncate(top_k);
        fused
            .into_iter()
            .filter_map(|(position, score)| {
                candidates.get(&position).map(|c| SearchHit {
                    position,
                    document: c.document.clone(),
                    score,
                    source: SourceKind::Hybrid,
                })
            })
            .collect()
    }

    fn rrf(&self, candidate: &Candidate<'_>) -> f32 {
        candidate.ranks().iter().flatten().map(|&rank| 1.0 / (self.rrf_k + rank as f32)).sum()
    }

    fn weighted_average(&self, candidates: &BTreeMap<usize, Candidate<'_>>) -> Vec<(usize, f32)> {
        let v_range = score_range(candidates.values().filter_map(|c| c.vector.map(|(_, s)| s)));
        let l_range = score_range(candidates.values().filter_map(|c| c.lexical.map(|(_, s)| s)));
        candidates
            .iter()
            .map(|(&position, c)| {
                let v = c.vector.map(|(_, s)| normalise(s, v_range)).unwrap_or(0.0);
                let l = c.lexical.map(|(_, s)| normalise(s, l_range)).unwrap_or(0.0);
                (position, self.weights.vector * v + self.weights.lexical * l)
            })
            .collect()
    }

    fn condorcet(&self, candidates: &BTreeMap<usize, Candidate<'_>>) -> Vec<(usize, f32)> {
        let entries: Vec<(usize, [Option<usize>; 2], f32)> =
            candidates.iter().map(|(&p, c)| (p, c.ranks(), self.rrf(c))).collect();
        let n = entries.len();
        let mut wins = vec![0usize; n];
        for a in 0..n {
            for b in (a + 1)..n {
                let (mut votes_a, mut votes_b) = (0, 0);
                for list in 0..2 {
                    match better(entries[a].1[list], entries[b].1[list]) {
                        Ordering::Less => votes_a += 1,
                        Ordering::Greater => votes_b += 1,
                        Ordering::Equal => {}
                    }
                }
                if votes_a > votes_b {
                    wins[a] += 1;
                } else if votes_b > votes_a {
                    wins[b] += 1;
                }
            }
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            wins[b].cmp(&wins[a]).then_with(|| by_score_then_position(entries[a].2, entries[a].0, entries[b].2, entries[b].0))
        });
        let denom = n.saturating_sub(1);
        order
            .into_iter()
            .map(|i| {
                let score = if denom == 0 { 1.0 } else { wins[i] as f32 / denom as f32 };
                (entries[i].0, score)
            })
            .collect()
    }
}

/// Fuse by method name, for callers holding configuration strings.
pub fn merge(
    vector: &[SearchHit],
    lexical: &[SearchHit],
    method: &str,
    weights: FusionWeights,
    top_k: usize,
) -> Result<Vec<SearchHit>> {
    let method: FusionMethod = method.parse()?;
    Ok(FusionRanker::new(method, weights).merge(vector, lexical, top_k))
}

fn collect_candidates<'a>(vector: &'a [SearchHit], lexical: &'a [SearchHit]) -> BTreeMap<usize, Candidate<'a>> {
    let mut candidates: BTreeMap<usize, Candidate<'a>> = BTreeMap::new();
    for (rank, hit) in vector.iter().enumerate() {
        let c = candidates.entry(hit.position).or_insert(Candidate { document: &hit.document, vector: None, lexical: None });
        c.vector.get_or_insert((rank + 1, hit.score));
    }
    for (rank, hit) in lexical.iter().enumerate() {
        let c = candidates.entry(hit.position).or_insert(Candidate { document: &hit.document, vector: None, lexical: None });
        c.lexical.get_or_insert((rank + 1, hit.score));
    }
    candidates
}

/// `Less` when `a` is ranked better than `b` in one list; absent ranks last.
fn better(a: Option<usize>, b: Option<usize>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn by_score_then_position(score_a: f32, pos_a: usize, score_b: f32, pos_b: usize) -> Ordering {
    score_b.partial_cmp(&score_a).unwrap_or(Ordering::Equal).then(pos_a.cmp(&pos_b))
}

fn score_range(scores: impl Iterator<Item = f32>) -> Option<(f32, f32)> {
    scores.fold(None, |acc, s| match acc {
        None => Some((s, s)),
        Some((lo, hi)) => Some((lo.min(s), hi.max(s))),
    })
}

fn normalise(score: f32, range: Option<(f32, f32)>) -> f32 {
    match range {
        Some((lo, hi)) if hi > lo => (score - lo) / (hi - lo),
        _ => 1.0,
    }
}
