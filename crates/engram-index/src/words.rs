//! Word-level text index. Tokens are unicode-normalized, case-folded and
//! stripped to alphanumerics; postings are compressed roaring bitmaps
//! over the arena handles issued by the registry.

use roaring::RoaringBitmap;
use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;

/// NFKC-normalize, then split into case-folded alphanumeric word tokens.
/// Normalization runs before the split: a decomposed accent is a combining
/// mark (non-alphanumeric) and would otherwise cut the token in half, so
/// the same word in NFC and NFD form must recompose first to tokenize
/// identically.
pub fn tokenize(text: &str) -> Vec<String> {
    text.nfkc()
        .collect::<String>()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[derive(Debug, Default)]
pub struct WordIndex {
    postings: HashMap<String, RoaringBitmap>,
}

impl WordIndex {
    pub fn index_text(&mut self, handle: u32, text: &str) {
        for token in tokenize(text) {
            self.postings.entry(token).or_default().insert(handle);
        }
    }

    pub fn unindex_text(&mut self, handle: u32, text: &str) {
        for token in tokenize(text) {
            if let Some(bitmap) = self.postings.get_mut(&token) {
                bitmap.remove(handle);
                if bitmap.is_empty() {
                    self.postings.remove(&token);
                }
            }
        }
    }

    pub fn postings(&self, token: &str) -> Option<&RoaringBitmap> {
        self.postings.get(token)
    }

    /// Score candidates by term overlap, normalised by the query token
    /// count. An id matching every query token scores 1.0.
    pub fn search(&self, query: &str) -> Vec<(u32, f32)> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Vec::new();
        }
        let mut overlap: HashMap<u32, u32> = HashMap::new();
        for token in &tokens {
            if let Some(bitmap) = self.postings.get(token) {
                for handle in bitmap {
                    *overlap.entry(handle).or_default() += 1;
                }
            }
        }
        let total = tokens.len() as f32;
        let mut scored: Vec<(u32, f32)> =
            overlap.into_iter().map(|(h, n)| (h, n as f32 / total)).collect();
        // Deterministic: score desc, handle asc as the tiebreaker.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored
    }

    pub fn clear(&mut self) {
        self.postings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_case_folds_and_splits() {
        assert_eq!(tokenize("Quick, Brown-Fox!"), vec!["quick", "brown", "fox"]);
        assert_eq!(tokenize("  "), Vec::<String>::new());
        assert_eq!(tokenize("naïve café"), vec!["naïve", "café"]);
    }

    #[test]
    fn tokenize_unifies_unicode_normal_forms() {
        // "café" precomposed (NFC, U+00E9) vs decomposed (NFD,
        // `e` + combining acute U+0301).
        let nfc = "caf\u{00e9}";
        let nfd = "cafe\u{0301}";
        assert_ne!(nfc.as_bytes(), nfd.as_bytes());
        assert_eq!(tokenize(nfc), tokenize(nfd));
        assert_eq!(tokenize(nfd), vec!["café"]);
        // Compatibility forms fold too (ﬁ ligature -> "fi").
        assert_eq!(tokenize("\u{fb01}le"), vec!["file"]);
    }

    #[test]
    fn search_matches_across_normal_forms() {
        let mut idx = WordIndex::default();
        idx.index_text(1, "cafe\u{0301} menu");
        let hits = idx.search("caf\u{00e9}");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 1);
        idx.unindex_text(1, "caf\u{00e9} menu");
        assert!(idx.search("cafe\u{0301}").is_empty());
    }

    #[test]
    fn search_scores_by_term_overlap() {
        let mut idx = WordIndex::default();
        idx.index_text(1, "quick brown fox");
        idx.index_text(2, "quick fox runs");
        idx.index_text(3, "slow turtle");

        let hits = idx.search("quick fox");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].1, 1.0);
        assert_eq!(hits[1].1, 1.0);
        assert!(idx.search("turtle").iter().any(|(h, _)| *h == 3));
        assert!(idx.search("zebra").is_empty());
    }

    #[test]
    fn unindex_removes_postings() {
        let mut idx = WordIndex::default();
        idx.index_text(7, "hello world");
        idx.unindex_text(7, "hello world");
        assert!(idx.postings("hello").is_none());
        assert!(idx.search("hello world").is_empty());
    }
}
