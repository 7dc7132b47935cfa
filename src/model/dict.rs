//! Pronunciation dictionaries.
//!
//! Main and filler dictionaries share the CMU format: one `word PH1 PH2 ...` entry per line,
//! alternate pronunciations spelled `word(2)`, and comment lines starting with `;;` or `##`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::warn;

use super::mdef::ModelDef;
use crate::{Error, Result};

pub const SENTENCE_START: &str = "<s>";
pub const SENTENCE_END: &str = "</s>";
pub const SILENCE_WORD: &str = "<sil>";
const SILENCE_PHONE: &str = "SIL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordClass {
    Normal,
    /// The `<sil>` word, entered with the silence probability.
    Silence,
    /// Other noise words, entered with the filler probability.
    Filler,
    /// `<s>` and `</s>`, which only appear in language model context.
    SentenceMarker,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DictWord {
    /// Spelling as written, including any `(n)` suffix.
    pub word: String,
    /// Spelling without the alternate-pronunciation suffix.
    pub base: String,
    pub phones: Vec<usize>,
    pub class: WordClass,
}

impl DictWord {
    pub fn is_filler(&self) -> bool {
        self.class != WordClass::Normal
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    words: Vec<DictWord>,
    by_word: HashMap<String, usize>,
}

impl Dictionary {
    /// Load the main dictionary and optional filler dictionary against a phone set.
    pub fn load(dict: &Path, fdict: Option<&Path>, mdef: &ModelDef) -> Result<Self> {
        let mut out = Self::default();
        let text = fs::read_to_string(dict).map_err(|e| Error::model_load(dict, e.to_string()))?;
        out.add_text(&text, false, mdef, dict)?;

        if let Some(fdict) = fdict {
            let text =
                fs::read_to_string(fdict).map_err(|e| Error::model_load(fdict, e.to_string()))?;
            out.add_text(&text, true, mdef, fdict)?;
        }
        out.ensure_silence(mdef);
        Ok(out)
    }

    /// Parse dictionary text. `source` only labels warnings and errors.
    pub fn add_text(
        &mut self,
        text: &str,
        filler: bool,
        mdef: &ModelDef,
        source: &Path,
    ) -> Result<()> {
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(";;") || line.starts_with("##") {
                continue;
            }
            let mut fields = line.split_whitespace();
            let Some(word) = fields.next() else {
                continue;
            };

            let mut phones = Vec::new();
            let mut unknown = None;
            for name in fields {
                match mdef.phone_id(name) {
                    Some(id) => phones.push(id),
                    None => {
                        unknown = Some(name);
                        break;
                    }
                }
            }
            if let Some(name) = unknown {
                warn!(
                    file = %source.display(),
                    line = lineno + 1,
                    word,
                    phone = name,
                    "skipping word with unknown phone"
                );
                continue;
            }
            if phones.is_empty() {
                warn!(file = %source.display(), line = lineno + 1, word, "skipping word with no phones");
                continue;
            }
            if self.by_word.contains_key(word) {
                warn!(file = %source.display(), line = lineno + 1, word, "skipping duplicate word");
                continue;
            }

            let class = if !filler {
                WordClass::Normal
            } else if word == SENTENCE_START || word == SENTENCE_END {
                WordClass::SentenceMarker
            } else if word == SILENCE_WORD {
                WordClass::Silence
            } else {
                WordClass::Filler
            };
            self.push(DictWord {
                word: word.to_owned(),
                base: base_word(word).to_owned(),
                phones,
                class,
            });
        }

        if self.words.is_empty() && !filler {
            return Err(Error::model_load(source, "dictionary contains no usable words"));
        }
        Ok(())
    }

    /// Add `<sil>` when no filler dictionary provided one and the phone set has silence.
    pub fn ensure_silence(&mut self, mdef: &ModelDef) {
        if self.by_word.contains_key(SILENCE_WORD) {
            return;
        }
        if let Some(sil) = mdef.phone_id(SILENCE_PHONE) {
            self.push(DictWord {
                word: SILENCE_WORD.to_owned(),
                base: SILENCE_WORD.to_owned(),
                phones: vec![sil],
                class: WordClass::Silence,
            });
        }
    }

    pub fn word_id(&self, word: &str) -> Option<usize> {
        self.by_word.get(word).copied()
    }

    pub fn word(&self, id: usize) -> &DictWord {
        &self.words[id]
    }

    pub fn words(&self) -> &[DictWord] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn push(&mut self, word: DictWord) {
        self.by_word.insert(word.word.clone(), self.words.len());
        self.words.push(word);
    }
}

/// Strip a trailing `(n)` alternate-pronunciation marker.
pub fn base_word(word: &str) -> &str {
    match word.rfind('(') {
        Some(open) if open > 0 && word.ends_with(')') => &word[..open],
        _ => word,
    }
}
