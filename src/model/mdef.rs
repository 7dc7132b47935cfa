//! Text model definition (`mdef`, format 0.3).
//!
//! The file maps phones to transition matrices and emitting states to senones. Only the
//! context-independent (base) phones are kept for decoding; triphone rows are validated and
//! counted.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::{Error, Result};

const VERSION: &str = "0.3";

/// A context-independent phone.
#[derive(Debug, Clone, PartialEq)]
pub struct Phone {
    pub name: String,
    pub filler: bool,
    pub tmat: usize,
    /// Senone id for each emitting state.
    pub senones: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct ModelDef {
    phones: Vec<Phone>,
    by_name: HashMap<String, usize>,
    n_triphones: usize,
    n_emit_state: usize,
    n_senones: usize,
    n_tmat: usize,
}

impl ModelDef {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::model_load(path, e.to_string()))?;
        Self::parse(&text).map_err(|message| Error::model_load(path, message))
    }

    /// Parse mdef text. Errors are plain messages; [`ModelDef::load`] attaches the path.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut lines = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'));

        let version = lines.next().ok_or("empty model definition")?;
        if !version.starts_with(VERSION) {
            return Err(format!("expected version {VERSION}, got '{version}'"));
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        const TAGS: [&str; 6] = [
            "n_base",
            "n_tri",
            "n_state_map",
            "n_tied_state",
            "n_tied_ci_state",
            "n_tied_tmat",
        ];
        while counts.len() < TAGS.len() {
            let line = lines.next().ok_or("incomplete header")?;
            let mut parts = line.split_whitespace();
            let (Some(n), Some(tag)) = (parts.next(), parts.next()) else {
                return Err(format!("bad header line '{line}'"));
            };
            let n: usize = n.parse().map_err(|_| format!("bad header line '{line}'"))?;
            let tag = TAGS
                .iter()
                .find(|t| **t == tag)
                .ok_or_else(|| format!("unknown header line '{line}'"))?;
            counts.insert(*tag, n);
        }

        let n_base = counts["n_base"];
        let n_tri = counts["n_tri"];
        let n_state_map = counts["n_state_map"];
        let n_senones = counts["n_tied_state"];
        let n_ci_senones = counts["n_tied_ci_state"];
        let n_tmat = counts["n_tied_tmat"];

        if n_base == 0 || n_ci_senones == 0 || n_tmat == 0 || n_ci_senones > n_senones {
            return Err("inconsistent header counts".into());
        }
        let n_phones = n_base + n_tri;
        if n_state_map % n_phones != 0 || n_state_map / n_phones < 2 {
            return Err("n_state_map is not a multiple of the phone count".into());
        }
        let n_emit_state = n_state_map / n_phones - 1;

        let mut mdef = ModelDef {
            phones: Vec::with_capacity(n_base),
            by_name: HashMap::new(),
            n_triphones: 0,
            n_emit_state,
            n_senones,
            n_tmat,
        };

        for p in 0..n_phones {
            let line = lines
                .next()
                .ok_or_else(|| format!("expected {n_phones} phone rows, found {p}"))?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 6 + n_emit_state + 1 {
                return Err(format!("malformed phone row '{line}'"));
            }
            let filler = match fields[4] {
                "filler" => true,
                "n/a" => false,
                other => return Err(format!("bad filler attribute '{other}' in '{line}'")),
            };
            let tmat: usize = fields[5]
                .parse()
                .map_err(|_| format!("bad tmat id in '{line}'"))?;
            if tmat >= n_tmat {
                return Err(format!("tmat id {tmat} out of range in '{line}'"));
            }
            let mut senones = Vec::with_capacity(n_emit_state);
            for field in &fields[6..6 + n_emit_state] {
                let s: usize = field
                    .parse()
                    .map_err(|_| format!("bad senone id in '{line}'"))?;
                let limit = if p < n_base { n_ci_senones } else { n_senones };
                if s >= limit {
                    return Err(format!("senone id {s} out of range in '{line}'"));
                }
                senones.push(s);
            }
            if fields[6 + n_emit_state] != "N" {
                return Err(format!("missing non-emitting state in '{line}'"));
            }

            if p < n_base {
                if fields[1..4] != ["-", "-", "-"] {
                    return Err(format!("bad context for base phone '{line}'"));
                }
                let name = fields[0].to_owned();
                if mdef.by_name.contains_key(&name) {
                    return Err(format!("duplicate base phone '{name}'"));
                }
                mdef.by_name.insert(name.clone(), p);
                mdef.phones.push(Phone {
                    name,
                    filler,
                    tmat,
                    senones,
                });
            } else {
                for ctx in &fields[0..3] {
                    if !mdef.by_name.contains_key(*ctx) {
                        return Err(format!("unknown phone '{ctx}' in '{line}'"));
                    }
                }
                if !matches!(fields[3], "b" | "e" | "s" | "i") {
                    return Err(format!("bad word position in '{line}'"));
                }
                let base_filler = mdef.phones[mdef.by_name[fields[0]]].filler;
                if base_filler != filler {
                    return Err(format!("filler attribute disagrees with base in '{line}'"));
                }
                mdef.n_triphones += 1;
            }
        }

        Ok(mdef)
    }

    pub fn phone_id(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn phone(&self, id: usize) -> &Phone {
        &self.phones[id]
    }

    pub fn phones(&self) -> &[Phone] {
        &self.phones
    }

    pub fn n_emit_state(&self) -> usize {
        self.n_emit_state
    }

    pub fn n_senones(&self) -> usize {
        self.n_senones
    }

    pub fn n_tmat(&self) -> usize {
        self.n_tmat
    }

    pub fn n_triphones(&self) -> usize {
        self.n_triphones
    }
}

#[cfg(test)]
pub(crate) const TINY_MDEF: &str = "\
0.3
# generated
3 n_base
1 n_tri
16 n_state_map
9 n_tied_state
9 n_tied_ci_state
3 n_tied_tmat
SIL - - - filler 0 0 1 2 N
AA - - - n/a 1 3 4 5 N
BB - - - n/a 2 6 7 8 N
AA SIL BB s n/a 1 3 4 5 N
";
