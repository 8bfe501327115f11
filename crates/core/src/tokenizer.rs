//! Lexical normalization and the per-dataset inverted index.
//!
//! Terms are lowercase runs of ASCII letters, digits and Thai script. The
//! content this index serves is mostly Thai, so the stop-word list is Thai.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const MIN_TOKEN_CHARS: usize = 2;

pub const STOP_WORDS: [&str; 58] = [
    "และ", "ของ", "ใน", "ที่", "มี", "เป็น", "ได้", "จะ", "ให้", "ว่า",
    "แต่", "โดย", "ก็", "หรือ", "คือ", "จาก", "นี้", "ถูก", "กับ", "นํา",
    "การ", "ซึ่ง", "อยู่", "ไม่", "แล้ว", "ต้อง", "เมื่อ", "เพื่อ", "ทาง",
    "เช่น", "ตาม", "ยัง", "เรื่อง", "ผู้", "อีก", "เพราะ", "ขึ้น", "ค่ะ", "ครับ",
    "รถ", "รถยนต์", "ตัว", "หนึ่ง", "สอง", "อะไร", "อย่าง", "อื่น", "ทุก",
    "ทั้ง", "ทำ", "มา", "ไป", "ด้วย", "สามารถ", "ใช้", "ดี", "มาก", "น้อย",
];

fn is_term_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || ('\u{0e00}'..='\u{0e7f}').contains(&c)
}

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if is_term_char(c) { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|token| !is_stop_word(token))
        .map(str::to_string)
        .collect()
}

/// Term to passage-position postings for one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvertedIndex {
    postings: BTreeMap<String, BTreeSet<usize>>,
}

impl InvertedIndex {
    pub fn rebuild<'a, I>(token_lists: I) -> Self
    where
        I: IntoIterator<Item = &'a [String]>,
    {
        let mut index = Self::default();
        index.extend(0, token_lists);
        index
    }

    /// Registers `token_lists` at positions `start..`. Existing postings are
    /// left as they are.
    pub fn extend<'a, I>(&mut self, start: usize, token_lists: I)
    where
        I: IntoIterator<Item = &'a [String]>,
    {
        for (offset, tokens) in token_lists.into_iter().enumerate() {
            let position = start + offset;
            for token in tokens {
                self.postings
                    .entry(token.clone())
                    .or_default()
                    .insert(position);
            }
        }
    }

    pub fn truncate(&mut self, len: usize) {
        for positions in self.postings.values_mut() {
            positions.retain(|position| *position < len);
        }
        self.postings.retain(|_, positions| !positions.is_empty());
    }

    pub fn is_consistent_with(&self, passage_count: usize) -> bool {
        self.postings
            .values()
            .all(|positions| positions.iter().all(|position| *position < passage_count))
    }

    pub fn postings(&self, term: &str) -> Option<&BTreeSet<usize>> {
        self.postings.get(term)
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lists(texts: &[&str]) -> Vec<Vec<String>> {
        texts.iter().map(|text| tokenize(text)).collect()
    }

    #[test]
    fn tokenize_keeps_thai_latin_and_digits() {
        let tokens = tokenize("ราคารถ Yaris เริ่มต้นที่ 600,000 บาท");
        assert_eq!(
            tokens,
            vec!["ราคารถ", "yaris", "เริ่มต้นที่", "600", "000", "บาท"]
        );
    }

    #[test]
    fn tokenize_drops_short_tokens_and_stop_words() {
        let tokens = tokenize("a rain ของ และ x2 in รถ");
        assert_eq!(tokens, vec!["rain", "x2", "in"]);
    }

    #[test]
    fn tokenize_strips_punctuation_and_other_scripts() {
        let tokens = tokenize("Hello, world! café—déjà");
        assert_eq!(tokens, vec!["hello", "world", "caf"]);
    }

    #[test]
    fn extend_registers_only_new_positions() {
        let first = lists(&["pump pressure", "valve"]);
        let mut index = InvertedIndex::rebuild(first.iter().map(Vec::as_slice));
        let second = lists(&["pump flow"]);
        index.extend(2, second.iter().map(Vec::as_slice));

        let pump = index.postings("pump").cloned().unwrap_or_default();
        assert_eq!(pump.into_iter().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(index.term_count(), 4);
        assert!(index.is_consistent_with(3));
        assert!(!index.is_consistent_with(2));
    }

    #[test]
    fn truncate_removes_rolled_back_positions() {
        let tokens = lists(&["pump", "pump valve"]);
        let mut index = InvertedIndex::rebuild(tokens.iter().map(Vec::as_slice));
        index.truncate(1);

        assert!(index.postings("valve").is_none());
        assert_eq!(index.postings("pump").map(BTreeSet::len), Some(1));
    }

    #[test]
    fn serializes_as_term_to_positions_object() -> Result<(), serde_json::Error> {
        let tokens = lists(&["pump", "pump"]);
        let index = InvertedIndex::rebuild(tokens.iter().map(Vec::as_slice));
        assert_eq!(serde_json::to_string(&index)?, r#"{"pump":[0,1]}"#);
        Ok(())
    }
}
