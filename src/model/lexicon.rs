use super::dict::{Dictionary, SENTENCE_END, SENTENCE_START, WordClass};
use super::ngram::{LmWord, NgramModel};

/// A word the search can hypothesize.
#[derive(Debug, Clone, PartialEq)]
pub struct LexWord {
    /// Dictionary spelling (alternates keep their `(n)` suffix).
    pub word: String,
    /// Spelling reported in results.
    pub base: String,
    /// Language model id; `None` for fillers.
    pub lm_id: Option<LmWord>,
    pub class: WordClass,
    pub phones: Vec<usize>,
}

impl LexWord {
    pub fn is_filler(&self) -> bool {
        self.lm_id.is_none()
    }
}

/// The decodable vocabulary: dictionary words known to the language model, plus fillers.
#[derive(Debug, Clone)]
pub struct Lexicon {
    words: Vec<LexWord>,
    start: Option<LmWord>,
    end: Option<LmWord>,
}

impl Lexicon {
    pub fn build(dict: &Dictionary, lm: &NgramModel) -> std::result::Result<Self, String> {
        let mut words = Vec::new();
        let mut skipped = 0usize;
        for w in dict.words() {
            let lm_id = match w.class {
                WordClass::SentenceMarker => continue,
                WordClass::Silence | WordClass::Filler => None,
                WordClass::Normal => match lm.word_id(&w.base) {
                    Some(id) => Some(id),
                    None => {
                        skipped += 1;
                        continue;
                    }
                },
            };
            words.push(LexWord {
                word: w.word.clone(),
                base: w.base.clone(),
                lm_id,
                class: w.class,
                phones: w.phones.clone(),
            });
        }
        if skipped > 0 {
            tracing::debug!(skipped, "dictionary words missing from the language model");
        }
        if !words.iter().any(|w| w.lm_id.is_some()) {
            return Err("no dictionary word appears in the language model".into());
        }
        Ok(Self {
            words,
            start: lm.word_id(SENTENCE_START),
            end: lm.word_id(SENTENCE_END),
        })
    }

    pub fn words(&self) -> &[LexWord] {
        &self.words
    }

    pub fn word(&self, id: usize) -> &LexWord {
        &self.words[id]
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Language model id of `<s>`, if the model has one.
    pub fn sentence_start(&self) -> Option<LmWord> {
        self.start
    }

    /// Language model id of `</s>`, if the model has one.
    pub fn sentence_end(&self) -> Option<LmWord> {
        self.end
    }
}
