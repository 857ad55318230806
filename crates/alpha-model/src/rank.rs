// Rank-preserving regularization for attention projection matrices.
//
// Attention q/k projections tend to collapse toward low effective rank
// over long policy-gradient runs. After each optimizer step the matched
// matrices are nudged toward the orthogonal factor computed by a short
// Newton-Schulz iteration, which uses only matrix products. The stable
// rank monitor reports the same matrices' health without touching them.

use ndarray::{Array1, Array2};
use tracing::debug;

use crate::policy::PolicyParams;

pub fn frobenius_norm(m: &Array2<f32>) -> f32 {
    m.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// Largest singular value via power iteration. Deterministic start vector;
/// a handful of iterations is enough for a diagnostic.
pub fn spectral_norm(m: &Array2<f32>, iters: usize) -> f32 {
    let (rows, cols) = m.dim();
    if rows == 0 || cols == 0 {
        return 0.0;
    }
    let mut v = Array1::<f32>::from_elem(cols, 1.0 / (cols as f32).sqrt());
    for _ in 0..iters {
        let u = m.dot(&v);
        let u_norm = u.iter().map(|x| x * x).sum::<f32>().sqrt();
        if u_norm < 1e-12 {
            return 0.0;
        }
        let u = u.mapv(|x| x / u_norm);
        let vt = m.t().dot(&u);
        let v_norm = vt.iter().map(|x| x * x).sum::<f32>().sqrt();
        if v_norm < 1e-12 {
            return 0.0;
        }
        v = vt.mapv(|x| x / v_norm);
    }
    let u = m.dot(&v);
    u.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Stable rank: squared Frobenius norm over squared spectral norm. A smooth
/// proxy for effective rank; `n` for an orthogonal n×n matrix, 1 for rank-1.
pub fn stable_rank(m: &Array2<f32>) -> f32 {
    let fro = frobenius_norm(m);
    let spec = spectral_norm(m, 20);
    if spec < 1e-12 {
        return 0.0;
    }
    (fro * fro) / (spec * spec)
}

/// Newton-Schulz cubic iteration toward the orthogonal factor of `w`.
/// Frobenius pre-normalization bounds the spectrum below 1, where the
/// iteration X <- 1.5X - 0.5·X·Xᵀ·X pushes every singular value toward 1.
pub fn newton_schulz_orthogonalize(w: &Array2<f32>, iters: usize) -> Array2<f32> {
    let norm = frobenius_norm(w);
    if norm < 1e-8 {
        return w.clone();
    }
    let mut x = w.mapv(|v| v / norm);
    for _ in 0..iters {
        let xxt = x.dot(&x.t());
        x = &x.mapv(|v| 1.5 * v) - &xxt.dot(&x).mapv(|v| 0.5 * v);
    }
    x
}

/// Post-optimizer correction applied in place to every parameter matrix
/// whose name contains one of the target keywords. A keyword that matches
/// nothing is a no-op.
pub struct NewtonSchulzDecay {
    decay_rate: f32,
    num_iterations: usize,
    target_keywords: Vec<String>,
}

impl NewtonSchulzDecay {
    pub fn new(decay_rate: f32, num_iterations: usize, target_keywords: Vec<String>) -> Self {
        Self {
            decay_rate,
            num_iterations,
            target_keywords,
        }
    }

    fn matches(&self, name: &str) -> bool {
        self.target_keywords.iter().any(|kw| name.contains(kw.as_str()))
    }

    pub fn step(&self, params: &mut PolicyParams) {
        if self.decay_rate <= 0.0 {
            return;
        }
        for (name, w) in params.as_vec_mut() {
            if !self.matches(name) {
                continue;
            }
            let (rows, cols) = w.dim();
            let min_dim = rows.min(cols);
            if min_dim < 2 {
                continue;
            }
            let ortho = newton_schulz_orthogonalize(w, self.num_iterations);
            // Blend toward the orthogonal direction at the matrix's own
            // scale so the correction changes conditioning, not magnitude.
            let scale = frobenius_norm(w) / (min_dim as f32).sqrt();
            let rate = self.decay_rate;
            for (w_i, o_i) in w.iter_mut().zip(ortho.iter()) {
                *w_i = (1.0 - rate) * *w_i + rate * scale * o_i;
            }
        }
    }
}

/// Diagnostic-only stable-rank reporting for the matched matrices.
pub struct StableRankMonitor {
    target_keywords: Vec<String>,
}

impl StableRankMonitor {
    pub fn new(target_keywords: Vec<String>) -> Self {
        Self { target_keywords }
    }

    pub fn measure(&self, params: &PolicyParams) -> Vec<(String, f32)> {
        params
            .as_vec()
            .into_iter()
            .filter(|(name, _)| {
                self.target_keywords.iter().any(|kw| name.contains(kw.as_str()))
            })
            .map(|(name, m)| (name.to_string(), stable_rank(m)))
            .collect()
    }

    pub fn report(&self, params: &PolicyParams, step: usize) {
        for (name, rank) in self.measure(params) {
            debug!("step {}: stable_rank[{}] = {:.3}", step, name, rank);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn diag(values: &[f32]) -> Array2<f32> {
        let n = values.len();
        Array2::from_shape_fn((n, n), |(i, j)| if i == j { values[i] } else { 0.0 })
    }

    #[test]
    fn stable_rank_of_identity_is_dimension() {
        let eye = diag(&[1.0, 1.0, 1.0, 1.0]);
        let rank = stable_rank(&eye);
        assert!((rank - 4.0).abs() < 1e-3, "rank {}", rank);
    }

    #[test]
    fn stable_rank_of_rank_one_is_one() {
        let m = Array2::from_shape_fn((4, 4), |(i, j)| ((i + 1) * (j + 1)) as f32);
        let rank = stable_rank(&m);
        assert!((rank - 1.0).abs() < 1e-2, "rank {}", rank);
    }

    #[test]
    fn spectral_norm_matches_diagonal_max() {
        let m = diag(&[0.5, 3.0, 1.0]);
        let spec = spectral_norm(&m, 30);
        assert!((spec - 3.0).abs() < 1e-3, "spec {}", spec);
    }

    #[test]
    fn newton_schulz_raises_stable_rank() {
        let skewed = diag(&[1.0, 0.3, 0.3, 0.3]);
        let before = stable_rank(&skewed);
        let ortho = newton_schulz_orthogonalize(&skewed, 12);
        let after = stable_rank(&ortho);
        assert!(
            after > before + 0.5,
            "expected conditioning to improve: {} -> {}",
            before,
            after
        );
    }

    #[test]
    fn decay_targets_only_matching_matrices() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut params = PolicyParams::init(3, 4, 6, 8, &mut rng);
        let head_before = params.head.clone();
        let q_before = params.q_proj.clone();

        let decay = NewtonSchulzDecay::new(0.5, 5, vec!["q_proj".to_string()]);
        decay.step(&mut params);

        assert_eq!(params.head, head_before);
        assert_ne!(params.q_proj, q_before);
    }

    #[test]
    fn unmatched_keywords_are_a_noop() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut params = PolicyParams::init(3, 4, 6, 8, &mut rng);
        let before = params.clone();

        let decay = NewtonSchulzDecay::new(0.5, 5, vec!["no_such_matrix".to_string()]);
        decay.step(&mut params);

        for ((_, a), (_, b)) in params.as_vec().into_iter().zip(before.as_vec()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn decay_improves_conditioning_of_target() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut params = PolicyParams::init(3, 4, 6, 8, &mut rng);
        // Skewed spectrum: one dominant direction, the rest much weaker.
        params.q_proj = diag(&[1.0, 0.25, 0.25, 0.25, 0.25, 0.25]);
        let before = stable_rank(&params.q_proj);

        let decay = NewtonSchulzDecay::new(0.2, 8, vec!["q_proj".to_string()]);
        for _ in 0..20 {
            decay.step(&mut params);
        }
        let after = stable_rank(&params.q_proj);
        assert!(after > before, "stable rank should rise: {} -> {}", before, after);
    }
}
