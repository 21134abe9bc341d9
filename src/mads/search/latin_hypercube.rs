//! Latin hypercube search.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::mads::search::{Search, SearchContext};

/// Half-width, in frame sizes, of the sampling range of an unbounded variable.
const UNBOUNDED_SPAN: f64 = 10.0;

/// Samples `first` points at the first iteration and `per_iteration` points
/// at later ones, one per stratum of every free variable. Samples once per
/// iteration whatever the number of search centers.
#[derive(Debug, Clone)]
pub struct LatinHypercubeSearch {
    first: usize,
    per_iteration: usize,
    rng: ChaCha20Rng,
    last_iteration: Option<usize>,
}

impl LatinHypercubeSearch {
    pub fn new(first: usize, per_iteration: usize, seed: u64) -> Self {
        Self {
            first,
            per_iteration,
            rng: ChaCha20Rng::seed_from_u64(seed),
            last_iteration: None,
        }
    }
}

impl Search for LatinHypercubeSearch {
    fn name(&self) -> &'static str {
        "latin_hypercube"
    }

    fn generate(&mut self, ctx: &SearchContext<'_>) -> Vec<Vec<f64>> {
        let count = if ctx.iteration <= 1 {
            self.first
        } else {
            self.per_iteration
        };
        if count == 0 || self.last_iteration == Some(ctx.iteration) {
            return Vec::new();
        }
        self.last_iteration = Some(ctx.iteration);
        let center = &ctx.center.x;
        let mut points = vec![center.clone(); count];
        for &i in ctx.free_variables() {
            let span = UNBOUNDED_SPAN * ctx.mesh.current_frame(i);
            let mut lo = ctx.params.lower()[i];
            let mut hi = ctx.params.upper()[i];
            if !lo.is_finite() {
                lo = if hi.is_finite() {
                    hi.min(center[i]) - 2.0 * span
                } else {
                    center[i] - span
                };
            }
            if !hi.is_finite() {
                hi = lo.max(center[i]) + if ctx.params.lower()[i].is_finite() { 2.0 * span } else { span };
            }
            let mut strata: Vec<usize> = (0..count).collect();
            strata.shuffle(&mut self.rng);
            for (point, stratum) in points.iter_mut().zip(strata) {
                let u: f64 = self.rng.gen();
                point[i] = lo + (stratum as f64 + u) / count as f64 * (hi - lo);
            }
        }
        points
    }
}
