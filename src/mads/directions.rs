//! Poll direction generation.
//!
//! Directions are integer vectors in mesh units: a direction `d` turns into the
//! trial point `center + d · δm`. They are built in the subspace of free
//! variables (categorical and fixed variables never move) and scaled per
//! variable so that each one reaches the frame boundary.

use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::mads::mesh::MeshController;
use crate::mads::param::ValidParameters;
use crate::mads::types::DirectionType;

/// First `count` prime numbers.
pub fn primes(count: usize) -> Vec<u64> {
    let mut found: Vec<u64> = Vec::with_capacity(count);
    let mut candidate = 2u64;
    while found.len() < count {
        if found
            .iter()
            .take_while(|&&p| p * p <= candidate)
            .all(|&p| candidate % p != 0)
        {
            found.push(candidate);
        }
        candidate += 1;
    }
    found
}

/// Radical inverse of `index` in base `base`: the Halton coordinate.
pub fn halton(mut index: u64, base: u64) -> f64 {
    let mut result = 0.0;
    let mut fraction = 1.0 / base as f64;
    while index > 0 {
        result += (index % base) as f64 * fraction;
        index /= base;
        fraction /= base as f64;
    }
    result
}

/// Integer Householder basis `H = ||q||² I − 2 q qᵀ` of the adjusted Halton
/// vector `q`, whose largest entry in magnitude is `frame_index`.
///
/// The columns of `H` are pairwise orthogonal and share the norm `||q||²`.
pub fn householder_basis(halton_index: u64, primes: &[u64], frame_index: i64) -> Array2<f64> {
    let n = primes.len();
    let v: Array1<f64> = primes
        .iter()
        .map(|&p| 2.0 * halton(halton_index, p) - 1.0)
        .collect();
    let v_norm = v.iter().fold(0.0f64, |m, x| m.max(x.abs()));
    let q: Array1<f64> = if v_norm > 0.0 {
        v.mapv(|x| (frame_index as f64 * x / v_norm).round())
    } else {
        let mut q = Array1::zeros(n);
        q[0] = frame_index as f64;
        q
    };
    let norm2 = q.dot(&q);
    let outer = q
        .view()
        .insert_axis(Axis(1))
        .dot(&q.view().insert_axis(Axis(0)));
    let mut h = Array2::<f64>::eye(n) * norm2;
    h -= &(outer * 2.0);
    h
}

/// Produces poll directions for one frame center at a time.
#[derive(Debug, Clone)]
pub struct DirectionGenerator {
    kind: DirectionType,
    dimension: usize,
    free: Vec<usize>,
    primes: Vec<u64>,
    halton_index: u64,
    rng: ChaCha20Rng,
}

impl DirectionGenerator {
    pub fn new(params: &ValidParameters) -> Self {
        let free = params.free_variables().to_vec();
        let primes = primes(free.len().max(1));
        let first = primes.last().copied().unwrap_or(2);
        Self {
            kind: params.direction_type,
            dimension: params.dimension,
            free,
            primes,
            halton_index: first + params.seed,
            rng: ChaCha20Rng::seed_from_u64(params.seed),
        }
    }

    /// Direction set for one poll, in mesh units over all variables.
    ///
    /// `last_success` is the displacement, in variable units, that produced
    /// the last dominating point. The n+1 variants orient their basis
    /// towards it.
    pub fn poll_directions(
        &mut self,
        mesh: &MeshController,
        last_success: Option<&[f64]>,
    ) -> Vec<Vec<i64>> {
        let nf = self.free.len();
        if nf == 0 {
            return Vec::new();
        }
        let r = mesh.frame_index();
        let rho: Vec<f64> = self.free.iter().map(|&i| mesh.rho(i)).collect();

        // Reference direction in frame units, restricted to free variables.
        let reference: Option<Vec<f64>> = last_success.map(|d| {
            self.free
                .iter()
                .map(|&i| d[i] / mesh.current_frame(i))
                .collect()
        });

        let basis: Vec<Vec<f64>> = match self.kind {
            DirectionType::OrthoNPlus1 | DirectionType::Ortho2N => {
                let h = householder_basis(self.halton_index, &self.primes, r);
                self.halton_index += 1;
                h.columns().into_iter().map(|c| c.to_vec()).collect()
            }
            DirectionType::LtNPlus1 | DirectionType::Lt2N => self.lower_triangular_basis(r),
            DirectionType::Coordinate2N => (0..nf)
                .map(|j| (0..nf).map(|k| if j == k { 1.0 } else { 0.0 }).collect())
                .collect(),
        };

        let reduced: Vec<Vec<f64>> = match self.kind {
            DirectionType::Ortho2N | DirectionType::Lt2N | DirectionType::Coordinate2N => basis
                .iter()
                .flat_map(|b| [b.clone(), b.iter().map(|x| -x).collect()])
                .collect(),
            DirectionType::OrthoNPlus1 | DirectionType::LtNPlus1 => {
                let oriented: Vec<Vec<f64>> = basis
                    .iter()
                    .map(|b| match &reference {
                        Some(rf) if dot(b, rf) < 0.0 => b.iter().map(|x| -x).collect(),
                        _ => b.clone(),
                    })
                    .collect();
                let mut negative_sum = vec![0.0; nf];
                for b in &oriented {
                    let norm = inf_norm(b);
                    for (s, x) in negative_sum.iter_mut().zip(b) {
                        *s -= x / norm;
                    }
                }
                let mut set = oriented;
                set.push(negative_sum);
                set
            }
        };

        reduced
            .iter()
            .filter(|d| inf_norm(d) > 0.0)
            .map(|d| self.embed(&scale_to_frame(d, &rho)))
            .collect()
    }

    // LT-MADS basis: lower triangular with ±r on the diagonal and entries in
    // (−r, r) below it, rows and columns randomly permuted.
    fn lower_triangular_basis(&mut self, r: i64) -> Vec<Vec<f64>> {
        let nf = self.free.len();
        let mut l = vec![vec![0.0; nf]; nf];
        for (i, row) in l.iter_mut().enumerate() {
            row[i] = if self.rng.gen::<bool>() { r as f64 } else { -(r as f64) };
            for entry in row.iter_mut().take(i) {
                *entry = self.rng.gen_range(-(r - 1)..=(r - 1)) as f64;
            }
        }
        let mut rows: Vec<usize> = (0..nf).collect();
        let mut cols: Vec<usize> = (0..nf).collect();
        rows.shuffle(&mut self.rng);
        cols.shuffle(&mut self.rng);
        cols.iter()
            .map(|&c| rows.iter().map(|&row| l[row][c]).collect())
            .collect()
    }

    fn embed(&self, reduced: &[i64]) -> Vec<i64> {
        let mut d = vec![0; self.dimension];
        for (&i, &v) in self.free.iter().zip(reduced) {
            d[i] = v;
        }
        d
    }
}

// Stretches a direction so its largest entry spans the frame on every
// variable: d_i = round(rho_i · b_i / ||b||∞).
fn scale_to_frame(b: &[f64], rho: &[f64]) -> Vec<i64> {
    let norm = inf_norm(b);
    b.iter()
        .zip(rho)
        .map(|(x, r)| (r * x / norm).round() as i64)
        .collect()
}

fn inf_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0f64, |m, x| m.max(x.abs()))
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mads::param::Parameters;
    use crate::mads::types::{InputType, SuccessClass};

    fn setup(n: usize, kind: DirectionType, seed: u64) -> (MeshController, DirectionGenerator) {
        let p = Parameters::new(n)
            .lower_bound(&vec![-1.0; n])
            .upper_bound(&vec![1.0; n])
            .x0(&vec![0.0; n])
            .direction_type(kind)
            .seed(seed)
            .check()
            .unwrap();
        (MeshController::new(&p), DirectionGenerator::new(&p))
    }

    fn normalized(d: &[i64]) -> Vec<f64> {
        let norm = d.iter().map(|&x| (x * x) as f64).sum::<f64>().sqrt();
        d.iter().map(|&x| x as f64 / norm).collect()
    }

    // Every probe direction has a positive dot product with some direction.
    fn spans_positively(directions: &[Vec<i64>], n: usize) -> bool {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let mut probes: Vec<Vec<f64>> = Vec::new();
        for i in 0..n {
            let mut e = vec![0.0; n];
            e[i] = 1.0;
            probes.push(e.clone());
            e[i] = -1.0;
            probes.push(e);
        }
        for _ in 0..500 {
            probes.push((0..n).map(|_| rng.gen_range(-1.0..1.0)).collect());
        }
        probes.iter().all(|u| {
            directions
                .iter()
                .any(|d| dot(&normalized(d), u) > 1e-12)
        })
    }

    #[test]
    fn test_primes_and_halton() {
        assert_eq!(primes(6), vec![2, 3, 5, 7, 11, 13]);
        assert_eq!(halton(1, 2), 0.5);
        assert_eq!(halton(3, 2), 0.75);
        assert!((halton(5, 3) - (2.0 / 3.0 + 1.0 / 9.0)).abs() < 1e-15);
    }

    #[test]
    fn test_householder_columns_are_orthogonal() {
        let h = householder_basis(13, &primes(4), 5);
        for j in 0..4 {
            for k in 0..4 {
                let d = h.column(j).dot(&h.column(k));
                if j == k {
                    assert!(d > 0.0);
                } else {
                    assert_eq!(d, 0.0);
                }
            }
        }
        assert!(h.iter().all(|x| x.fract() == 0.0));
    }

    #[test]
    fn test_ortho_n_plus_1_count_and_nonzero() {
        let (mesh, mut gen) = setup(3, DirectionType::OrthoNPlus1, 0);
        let dirs = gen.poll_directions(&mesh, None);
        assert_eq!(dirs.len(), 4);
        assert!(dirs.iter().all(|d| d.iter().any(|&x| x != 0)));
    }

    #[test]
    fn test_direction_set_sizes() {
        for (kind, count) in [
            (DirectionType::Ortho2N, 6),
            (DirectionType::LtNPlus1, 4),
            (DirectionType::Lt2N, 6),
            (DirectionType::Coordinate2N, 6),
        ] {
            let (mesh, mut gen) = setup(3, kind, 1);
            assert_eq!(gen.poll_directions(&mesh, None).len(), count, "{kind:?}");
        }
    }

    #[test]
    fn test_directions_reach_the_frame() {
        let (mut mesh, mut gen) = setup(2, DirectionType::Ortho2N, 3);
        for _ in 0..4 {
            mesh.on_iteration_result(SuccessClass::Unsuccessful);
        }
        let r = mesh.frame_index();
        assert!(r > 1);
        for d in gen.poll_directions(&mesh, None) {
            let reach = d.iter().map(|x| x.abs()).max().unwrap_or(0);
            assert_eq!(reach, r);
        }
    }

    #[test]
    fn test_positive_spanning_over_seeds() {
        for kind in [
            DirectionType::OrthoNPlus1,
            DirectionType::Ortho2N,
            DirectionType::LtNPlus1,
            DirectionType::Lt2N,
        ] {
            for seed in 0..5 {
                let (mut mesh, mut gen) = setup(3, kind, seed);
                let mut all = Vec::new();
                for _ in 0..6 {
                    all.extend(gen.poll_directions(&mesh, None));
                    mesh.on_iteration_result(SuccessClass::Unsuccessful);
                }
                assert!(spans_positively(&all, 3), "{kind:?} seed {seed}");
            }
        }
    }

    #[test]
    fn test_successive_polls_differ() {
        let (mesh, mut gen) = setup(2, DirectionType::Ortho2N, 0);
        let first = gen.poll_directions(&mesh, None);
        let mut mesh = mesh;
        mesh.on_iteration_result(SuccessClass::Unsuccessful);
        mesh.on_iteration_result(SuccessClass::Unsuccessful);
        let second = gen.poll_directions(&mesh, None);
        assert_ne!(first, second);
    }

    #[test]
    fn test_orientation_follows_last_success() {
        let (mesh, mut gen) = setup(2, DirectionType::OrthoNPlus1, 0);
        let last = [0.3, 0.1];
        let dirs = gen.poll_directions(&mesh, Some(&last));
        for d in &dirs[..2] {
            let along = d[0] as f64 * last[0] + d[1] as f64 * last[1];
            assert!(along >= 0.0);
        }
    }

    #[test]
    fn test_fixed_and_categorical_do_not_move() {
        let p = Parameters::new(3)
            .bb_input_type(vec![
                InputType::Continuous,
                InputType::Categorical,
                InputType::Continuous,
            ])
            .lower_bound(&[0.0, 0.0, 1.0])
            .upper_bound(&[1.0, 3.0, 1.0])
            .x0(&[0.5, 1.0, 1.0])
            .check()
            .unwrap();
        let mesh = MeshController::new(&p);
        let mut gen = DirectionGenerator::new(&p);
        let dirs = gen.poll_directions(&mesh, None);
        assert_eq!(dirs.len(), 2);
        assert!(dirs.iter().all(|d| d[1] == 0 && d[2] == 0 && d[0] != 0));
    }
}
