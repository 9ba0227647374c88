use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

static TOKENIZER: Lazy<CoreBPE> = Lazy::new(|| tiktoken_rs::cl100k_base().expect("tokenizer"));

/// Length metrics shared by the synthesizer and the merge engine, so every
/// word count in the system is produced the same way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextStats {
    pub words: usize,
    pub chars: usize,
}

impl TextStats {
    pub fn measure(text: &str) -> Self {
        Self {
            words: count_words(text),
            chars: count_chars(text),
        }
    }
}

/// Locale-naive word count: whitespace-separated runs.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn count_chars(text: &str) -> usize {
    text.chars().count()
}

/// Token count under the cl100k BPE.
pub fn count_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    TOKENIZER.encode_with_special_tokens(text).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_split_on_any_whitespace() {
        assert_eq!(count_words(""), 0);
        assert_eq!(count_words("   "), 0);
        assert_eq!(count_words("The hamlet\nhas\t1,555 residents."), 5);
    }

    #[test]
    fn chars_count_scalar_values() {
        assert_eq!(count_chars("Iqaluit"), 7);
        assert_eq!(count_chars("ᐃᖃᓗᐃᑦ"), 5);
    }

    #[test]
    fn tokens_grow_with_text() {
        assert_eq!(count_tokens(""), 0);
        let short = count_tokens("community");
        let long = count_tokens("community demographics and housing needs");
        assert!(short >= 1);
        assert!(long > short);
    }

    #[test]
    fn measure_combines_counts() {
        let stats = TextStats::measure("two words");
        assert_eq!(stats, TextStats { words: 2, chars: 9 });
    }
}
