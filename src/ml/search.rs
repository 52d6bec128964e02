// ============================================================
// Layer 5 — Beam Search
// ============================================================
// Autoregressive search over output sequences for one source
// pair. The model is hidden behind a scoring closure so the
// search itself is plain Rust and can be tested without Burn.
//
// Each round:
//   1. every live hypothesis is fed to the scorer as
//      [GO] + tokens-so-far
//   2. every (hypothesis, next token) pair is scored by the summed
//      log-probability
//   3. the best `width` candidates survive; those ending in EOS
//      move to the finished list
//
// The search stops once `width` hypotheses have finished or the
// output reached `max_len` tokens. With width 1 this is greedy
// argmax decoding.

use anyhow::{bail, Result};

#[derive(Debug, Clone)]
struct Hypothesis {
    tokens: Vec<u32>,
    score:  f32,
}

#[derive(Debug, Clone, Copy)]
pub struct BeamSearch {
    pub width:   usize,
    pub max_len: usize,
    pub go_id:   u32,
    pub eos_id:  u32,
}

impl BeamSearch {
    pub fn new(width: usize, max_len: usize, go_id: u32, eos_id: u32) -> Self {
        Self { width: width.max(1), max_len, go_id, eos_id }
    }

    /// Return the best output sequence (without GO, EOS included
    /// when it was produced).
    ///
    /// `score_next` receives one decoder-input prefix per live
    /// hypothesis and must return one row of next-token
    /// log-probabilities per prefix, in the same order.
    pub fn search<F>(&self, mut score_next: F) -> Result<Vec<u32>>
    where
        F: FnMut(&[Vec<u32>]) -> Result<Vec<Vec<f32>>>,
    {
        let mut live = vec![Hypothesis { tokens: Vec::new(), score: 0.0 }];
        let mut finished: Vec<Hypothesis> = Vec::new();

        for _ in 0..self.max_len {
            if live.is_empty() || finished.len() >= self.width {
                break;
            }

            let prefixes: Vec<Vec<u32>> = live
                .iter()
                .map(|h| {
                    let mut prefix = Vec::with_capacity(h.tokens.len() + 1);
                    prefix.push(self.go_id);
                    prefix.extend_from_slice(&h.tokens);
                    prefix
                })
                .collect();

            let rows = score_next(&prefixes)?;
            if rows.len() != live.len() {
                bail!("scorer returned {} rows for {} hypotheses", rows.len(), live.len());
            }

            // (hypothesis index, token, total score)
            let mut candidates: Vec<(usize, u32, f32)> = Vec::new();
            for (h_idx, (hyp, row)) in live.iter().zip(&rows).enumerate() {
                for (token, &log_prob) in row.iter().enumerate() {
                    candidates.push((h_idx, token as u32, hyp.score + log_prob));
                }
            }
            // Stable sort: ties keep the lower hypothesis, then lower token
            candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

            let mut next_live = Vec::with_capacity(self.width);
            for &(h_idx, token, score) in candidates.iter().take(self.width) {
                let mut tokens = live[h_idx].tokens.clone();
                tokens.push(token);
                let hyp = Hypothesis { tokens, score };
                if token == self.eos_id {
                    finished.push(hyp);
                } else {
                    next_live.push(hyp);
                }
            }
            live = next_live;
        }

        let pool = if finished.is_empty() { &live } else { &finished };
        Ok(pool
            .iter()
            .reduce(|best, h| if h.score > best.score { h } else { best })
            .map(|h| h.tokens.clone())
            .unwrap_or_default())
    }
}
