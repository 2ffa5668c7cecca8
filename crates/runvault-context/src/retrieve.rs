//! Deterministic BM25 keyword retrieval
//!
//! Standard BM25 with k1 = 1.2, b = 0.75. Only documents with a positive
//! score are candidates; ranking is score-descending with ties broken by
//! ascending document path. Scores are rounded to four decimal places before
//! they are recorded, which keeps the serialized selection byte-stable across
//! libm implementations.

use std::collections::BTreeMap;

use crate::{CorpusDoc, ScoredDoc};

const K1: f64 = 1.2;
const B: f64 = 0.75;
const SCORE_SCALE: f64 = 10_000.0;

/// Lowercased alphanumeric tokens; everything else is a separator.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn round_score(score: f64) -> f64 {
    (score * SCORE_SCALE).round() / SCORE_SCALE
}

/// Rank the corpus against `query`, returning the recorded top-k candidates
/// and the concatenated content blob in rank order.
pub fn rank(query: &str, top_k: usize, docs: &[CorpusDoc]) -> (Vec<ScoredDoc>, String) {
    let query_terms = tokenize(query);
    if query_terms.is_empty() || docs.is_empty() || top_k == 0 {
        return (Vec::new(), String::new());
    }

    let doc_tokens: Vec<Vec<String>> = docs.iter().map(|d| tokenize(&d.content)).collect();
    let total_docs = docs.len() as f64;
    let avg_len =
        doc_tokens.iter().map(Vec::len).sum::<usize>() as f64 / total_docs;

    // Document frequency per query term.
    let mut df: BTreeMap<&str, usize> = BTreeMap::new();
    for term in &query_terms {
        let count = doc_tokens
            .iter()
            .filter(|tokens| tokens.iter().any(|t| t == term))
            .count();
        df.insert(term.as_str(), count);
    }

    let mut scored: Vec<(f64, &CorpusDoc)> = Vec::new();
    for (doc, tokens) in docs.iter().zip(&doc_tokens) {
        let doc_len = tokens.len() as f64;
        let mut score = 0.0;
        for term in &query_terms {
            let n = df[term.as_str()];
            if n == 0 {
                continue;
            }
            let tf = tokens.iter().filter(|t| *t == term).count() as f64;
            if tf == 0.0 {
                continue;
            }
            let idf = (1.0 + (total_docs - n as f64 + 0.5) / (n as f64 + 0.5)).ln();
            let denom = tf + K1 * (1.0 - B + B * doc_len / avg_len.max(1.0));
            score += idf * tf * (K1 + 1.0) / denom;
        }
        let score = round_score(score);
        if score > 0.0 {
            scored.push((score, doc));
        }
    }

    scored.sort_by(|(score_a, doc_a), (score_b, doc_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| doc_a.rel_path.cmp(&doc_b.rel_path))
    });
    scored.truncate(top_k);

    let blob: String = scored.iter().map(|(_, doc)| doc.content.as_str()).collect();
    let recorded = scored
        .into_iter()
        .map(|(score, doc)| ScoredDoc {
            path: doc.rel_path.clone(),
            score,
        })
        .collect();

    (recorded, blob)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(path: &str, content: &str) -> CorpusDoc {
        CorpusDoc {
            rel_path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn tokenizer_lowercases_and_splits_on_non_alphanumeric() {
        assert_eq!(
            tokenize("Hello, World! x2"),
            vec!["hello", "world", "x2"]
        );
        assert!(tokenize("...").is_empty());
    }

    #[test]
    fn ranks_more_relevant_docs_first() {
        let docs = vec![
            doc("a.md", "cats and dogs"),
            doc("b.md", "cats cats cats everywhere"),
            doc("c.md", "nothing relevant here"),
        ];
        let (scored, _) = rank("cats", 10, &docs);
        assert_eq!(scored.len(), 2);
        assert_eq!(scored[0].path, "b.md");
        assert_eq!(scored[1].path, "a.md");
        assert!(scored[0].score > scored[1].score);
    }

    #[test]
    fn top_k_truncates() {
        let docs = vec![
            doc("a.md", "term"),
            doc("b.md", "term"),
            doc("c.md", "term"),
        ];
        let (scored, _) = rank("term", 2, &docs);
        assert_eq!(scored.len(), 2);
    }

    #[test]
    fn blob_is_concatenated_in_rank_order() {
        let docs = vec![
            doc("low.md", "query"),
            doc("high.md", "query query query"),
        ];
        let (scored, blob) = rank("query", 2, &docs);
        assert_eq!(scored[0].path, "high.md");
        assert_eq!(blob, "query query queryquery");
    }

    #[test]
    fn zero_matches_yields_empty_result() {
        let docs = vec![doc("a.md", "alpha")];
        let (scored, blob) = rank("zzz", 5, &docs);
        assert!(scored.is_empty());
        assert!(blob.is_empty());
    }

    #[test]
    fn scores_are_rounded() {
        let docs = vec![doc("a.md", "alpha beta"), doc("b.md", "alpha")];
        let (scored, _) = rank("alpha", 2, &docs);
        for s in &scored {
            let scaled = s.score * SCORE_SCALE;
            assert!((scaled - scaled.round()).abs() < 1e-9);
        }
    }
}
