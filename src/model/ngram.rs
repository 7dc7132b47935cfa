//! ARPA n-gram language models (orders 1 to 3) with Katz backoff.

use std::collections::HashMap;
use std::f32::consts::LN_10;
use std::fs;
use std::path::Path;

use crate::{Error, Result};

pub type LmWord = u32;

/// A backoff language model. Probabilities are stored as natural logs.
#[derive(Debug, Clone, Default)]
pub struct NgramModel {
    order: usize,
    words: Vec<String>,
    by_word: HashMap<String, LmWord>,
    /// `(log prob, log backoff)` per unigram.
    unigrams: Vec<(f32, f32)>,
    bigrams: HashMap<(LmWord, LmWord), (f32, f32)>,
    trigrams: HashMap<(LmWord, LmWord, LmWord), f32>,
}

impl NgramModel {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| Error::model_load(path, e.to_string()))?;
        let text = String::from_utf8(bytes).map_err(|_| {
            Error::model_load(
                path,
                "not an ARPA text file; binary language models are not supported",
            )
        })?;
        Self::parse(&text).map_err(|message| Error::model_load(path, message))
    }

    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

        // Anything before `\data\` is free-form commentary.
        if !lines.by_ref().any(|l| l == "\\data\\") {
            return Err(
                "missing \\data\\ section; binary language models are not supported".into(),
            );
        }

        let mut counts = Vec::new();
        let mut section = None;
        for line in lines.by_ref() {
            if let Some(spec) = line.strip_prefix("ngram ") {
                let (n, count) = spec
                    .split_once('=')
                    .ok_or_else(|| format!("bad count line '{line}'"))?;
                let n: usize = n.trim().parse().map_err(|_| format!("bad count line '{line}'"))?;
                let count: usize = count
                    .trim()
                    .parse()
                    .map_err(|_| format!("bad count line '{line}'"))?;
                if n != counts.len() + 1 {
                    return Err(format!("n-gram counts out of order at '{line}'"));
                }
                counts.push(count);
            } else {
                section = Some(line);
                break;
            }
        }
        if counts.is_empty() {
            return Err("no n-gram counts in header".into());
        }
        if counts.len() > 3 {
            return Err(format!(
                "order {} language models are not supported (maximum 3)",
                counts.len()
            ));
        }

        let mut lm = NgramModel {
            order: counts.len(),
            ..Default::default()
        };

        let mut current = section;
        while let Some(header) = current.take() {
            if header == "\\end\\" {
                break;
            }
            let n = parse_section_header(header)?;
            if n == 0 || n > lm.order {
                return Err(format!("unexpected section '{header}'"));
            }
            for line in lines.by_ref() {
                if line.starts_with('\\') {
                    current = Some(line);
                    break;
                }
                lm.add_entry(n, line)?;
            }
        }

        for (i, &expected) in counts.iter().enumerate() {
            let found = match i {
                0 => lm.unigrams.len(),
                1 => lm.bigrams.len(),
                _ => lm.trigrams.len(),
            };
            if found != expected {
                return Err(format!(
                    "header declares {expected} {}-grams but file has {found}",
                    i + 1
                ));
            }
        }
        Ok(lm)
    }

    fn add_entry(&mut self, n: usize, line: &str) -> std::result::Result<(), String> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < n + 1 || fields.len() > n + 2 {
            return Err(format!("malformed {n}-gram line '{line}'"));
        }
        let prob = parse_log10(fields[0], line)?;
        let backoff = match fields.get(n + 1) {
            Some(b) => parse_log10(b, line)?,
            None => 0.0,
        };
        let words = &fields[1..=n];

        if n == 1 {
            let word = words[0];
            if self.by_word.contains_key(word) {
                return Err(format!("duplicate unigram '{word}'"));
            }
            self.by_word.insert(word.to_owned(), self.words.len() as LmWord);
            self.words.push(word.to_owned());
            self.unigrams.push((prob, backoff));
            return Ok(());
        }

        let mut ids = [0 as LmWord; 3];
        for (slot, w) in ids.iter_mut().zip(words) {
            *slot = *self
                .by_word
                .get(*w)
                .ok_or_else(|| format!("word '{w}' in '{line}' has no unigram"))?;
        }
        if n == 2 {
            self.bigrams.insert((ids[0], ids[1]), (prob, backoff));
        } else {
            self.trigrams.insert((ids[0], ids[1], ids[2]), prob);
        }
        Ok(())
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn word_id(&self, word: &str) -> Option<LmWord> {
        self.by_word.get(word).copied()
    }

    pub fn word(&self, id: LmWord) -> &str {
        &self.words[id as usize]
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Log probability of `word` given its history, most recent word first.
    pub fn score(&self, word: LmWord, history: [Option<LmWord>; 2]) -> f32 {
        match history {
            [Some(h1), Some(h2)] if self.order >= 3 => self.trigram(h2, h1, word),
            [Some(h1), _] if self.order >= 2 => self.bigram(h1, word),
            _ => self.unigrams[word as usize].0,
        }
    }

    fn trigram(&self, w1: LmWord, w2: LmWord, w3: LmWord) -> f32 {
        if let Some(&p) = self.trigrams.get(&(w1, w2, w3)) {
            return p;
        }
        let backoff = self.bigrams.get(&(w1, w2)).map_or(0.0, |&(_, bo)| bo);
        backoff + self.bigram(w2, w3)
    }

    fn bigram(&self, w1: LmWord, w2: LmWord) -> f32 {
        if let Some(&(p, _)) = self.bigrams.get(&(w1, w2)) {
            return p;
        }
        self.unigrams[w1 as usize].1 + self.unigrams[w2 as usize].0
    }
}

fn parse_section_header(header: &str) -> std::result::Result<usize, String> {
    header
        .strip_prefix('\\')
        .and_then(|h| h.strip_suffix("-grams:"))
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| format!("unexpected line '{header}'"))
}

fn parse_log10(field: &str, line: &str) -> std::result::Result<f32, String> {
    let v: f32 = field
        .parse()
        .map_err(|_| format!("bad number '{field}' in '{line}'"))?;
    Ok(v * LN_10)
}

#[cfg(test)]
pub(crate) const TINY_ARPA: &str = "\
This is a test model.

\\data\\
ngram 1=5
ngram 2=2
ngram 3=1

\\1-grams:
-1.0 </s>
-99 <s> -0.5
-0.30103 alpha -0.2
-0.30103 bravo -0.1
-2.0 charlie

\\2-grams:
-0.1 <s> alpha -0.3
-0.2 alpha bravo

\\3-grams:
-0.05 <s> alpha bravo

\\end\\
";
