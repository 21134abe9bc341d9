//! Speculative search: keep going along the last successful direction.

use crate::mads::search::{Search, SearchContext};

/// Extends the step that produced the frame center.
///
/// The step from the center's own origin to the center is rescaled so that it
/// reaches the current frame boundary, and `center + k · step` is proposed
/// for `k = 1..=max_points`.
#[derive(Debug, Clone)]
pub struct SpeculativeSearch {
    max_points: usize,
}

impl SpeculativeSearch {
    pub fn new(max_points: usize) -> Self {
        Self { max_points }
    }
}

impl Search for SpeculativeSearch {
    fn name(&self) -> &'static str {
        "speculative"
    }

    fn generate(&mut self, ctx: &SearchContext<'_>) -> Vec<Vec<f64>> {
        let Some(origin) = &ctx.center.origin else {
            return Vec::new();
        };
        let direction = &origin.direction;
        let factor = ctx
            .free_variables()
            .iter()
            .filter(|&&i| direction[i] != 0.0)
            .map(|&i| ctx.mesh.current_frame(i) / direction[i].abs())
            .fold(f64::INFINITY, f64::min);
        if !factor.is_finite() {
            return Vec::new();
        }
        let center = &ctx.center.x;
        (1..=self.max_points)
            .map(|k| {
                center
                    .iter()
                    .zip(direction)
                    .map(|(c, d)| c + k as f64 * factor * d)
                    .collect()
            })
            .collect()
    }
}
