//! N-best extraction by A* search over the word lattice.
//!
//! A lattice node is a word exit. Its successors are the exits of words that began in the
//! frame right after it ended. Path scores are re-derived along each path: acoustic scores come
//! from the lattice, language model scores from the path's own word history. The heuristic is
//! the best acoustic-plus-penalty completion from a node, which never underestimates a path
//! while language model log probabilities are non-positive.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::hypothesis::{Hypothesis, NBestEntry};
use crate::model::Models;
use crate::model::dict::WordClass;

use super::hmm::BpIndex;
use super::lattice::{History, Lattice, final_lm_score, join_words};

/// Upper bound on A* expansions for one request.
const MAX_EXPANSIONS: usize = 50_000;

#[derive(Debug, Clone, Copy)]
struct PathNode {
    bp: BpIndex,
    parent: Option<u32>,
    /// Entry score of `bp` under this path's history.
    lscore: f32,
    hist: History,
}

#[derive(Debug)]
struct Item {
    f: f32,
    g: f32,
    seq: u64,
    path: u32,
    complete: bool,
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Item {}

impl PartialOrd for Item {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Item {
    fn cmp(&self, other: &Self) -> Ordering {
        self.f
            .total_cmp(&other.f)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Word entry score for `word` after history `hist`, plus the resulting history.
pub(crate) fn entry_score(models: &Models, word: usize, hist: History) -> (f32, History) {
    let params = models.search_params();
    let w = models.lexicon().word(word);
    match (w.class, w.lm_id) {
        (WordClass::Normal, Some(id)) => (
            params.lw * models.lm().score(id, hist) + params.log_wip,
            [Some(id), hist[0]],
        ),
        (WordClass::Silence, _) => (params.log_silpen, hist),
        _ => (params.log_fillpen, hist),
    }
}

/// Penalty part of [`entry_score`] that does not depend on history; an upper bound on it.
fn entry_bound(models: &Models, word: usize) -> f32 {
    let params = models.search_params();
    match models.lexicon().word(word).class {
        WordClass::Normal => params.log_wip,
        WordClass::Silence => params.log_silpen,
        _ => params.log_fillpen,
    }
}

pub(crate) fn nbest(lattice: &Lattice, models: &Models, k: usize) -> Vec<NBestEntry> {
    let k = k.min(models.search_params().maxnbest);
    if k == 0 || lattice.finals.is_empty() {
        return Vec::new();
    }
    let bps = &lattice.bps;
    let n = bps.len();

    // Successor lists indexed by start frame.
    let mut starting_at: Vec<Vec<BpIndex>> = vec![Vec::new(); lattice.n_frames + 1];
    for (i, bp) in bps.iter().enumerate().skip(1) {
        starting_at[bp.start_frame].push(i as BpIndex);
    }

    // Heuristic, computed latest-ending first.
    let mut h = vec![f32::NEG_INFINITY; n];
    for &(i, _) in &lattice.finals {
        h[i as usize] = 0.0;
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|a, b| bps[*b].end_excl.cmp(&bps[*a].end_excl));
    for i in order {
        let end = bps[i].end_excl;
        if end >= lattice.n_frames {
            continue;
        }
        for &s in &starting_at[end] {
            let s = s as usize;
            if h[s] == f32::NEG_INFINITY {
                continue;
            }
            let Some(word) = bps[s].word else {
                continue;
            };
            let v = bps[s].ascore + entry_bound(models, word) + h[s];
            if v > h[i] {
                h[i] = v;
            }
        }
    }

    let is_final: HashSet<BpIndex> = lattice.finals.iter().map(|(i, _)| *i).collect();
    let normalizer = lattice.log_normalizer(models.search_params().ascale);
    let ascale = models.search_params().ascale;

    let mut arena = vec![PathNode {
        bp: 0,
        parent: None,
        lscore: 0.0,
        hist: bps[0].hist,
    }];
    let mut heap = BinaryHeap::new();
    let mut seq = 0u64;
    heap.push(Item {
        f: h[0],
        g: 0.0,
        seq,
        path: 0,
        complete: false,
    });

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut expansions = 0usize;

    while let Some(item) = heap.pop() {
        if out.len() >= k || expansions >= MAX_EXPANSIONS {
            break;
        }
        let node = arena[item.path as usize];

        if item.complete {
            let mut path = Vec::new();
            let mut cur = Some(item.path);
            while let Some(p) = cur {
                let pn = arena[p as usize];
                if pn.parent.is_some() {
                    path.push((pn.bp, pn.lscore));
                }
                cur = pn.parent;
            }
            path.reverse();
            let segments = lattice.segments_for(models, path.into_iter());
            let text = join_words(&segments);
            if seen.insert(text.clone()) {
                let confidence = (item.g / ascale - normalizer).exp().clamp(0.0, 1.0);
                out.push(NBestEntry {
                    rank: out.len(),
                    hypothesis: Hypothesis {
                        text,
                        score: item.g,
                        confidence,
                    },
                    segments,
                });
            }
            continue;
        }

        expansions += 1;
        let bp = &bps[node.bp as usize];
        if node.bp != 0 && is_final.contains(&node.bp) {
            let g = item.g + final_lm_score(models, node.hist);
            seq += 1;
            heap.push(Item {
                f: g,
                g,
                seq,
                path: item.path,
                complete: true,
            });
        }
        if bp.end_excl >= lattice.n_frames {
            continue;
        }
        for &s in &starting_at[bp.end_excl] {
            let si = s as usize;
            if h[si] == f32::NEG_INFINITY {
                continue;
            }
            let Some(word) = bps[si].word else {
                continue;
            };
            let (lscore, hist) = entry_score(models, word, node.hist);
            let g = item.g + lscore + bps[si].ascore;
            arena.push(PathNode {
                bp: s,
                parent: Some(item.path),
                lscore,
                hist,
            });
            seq += 1;
            heap.push(Item {
                f: g + h[si],
                g,
                seq,
                path: (arena.len() - 1) as u32,
                complete: false,
            });
        }
    }

    // Positive backoff weights can loosen the heuristic bound.
    out.sort_by(|a, b| b.hypothesis.score.total_cmp(&a.hypothesis.score));
    for (rank, entry) in out.iter_mut().enumerate() {
        entry.rank = rank;
    }
    out
}
