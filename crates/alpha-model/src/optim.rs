// AdamW with decoupled weight decay over the policy's named matrices.

use crate::policy::PolicyParams;

pub struct AdamW {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    t: u64,
    m: PolicyParams,
    v: PolicyParams,
}

impl AdamW {
    pub fn new(params: &PolicyParams, lr: f32, weight_decay: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay,
            t: 0,
            m: params.zeros_like(),
            v: params.zeros_like(),
        }
    }

    pub fn step(&mut self, params: &mut PolicyParams, grads: &PolicyParams) {
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);

        let ps = params.as_vec_mut();
        let gs = grads.as_vec();
        let ms = self.m.as_vec_mut();
        let vs = self.v.as_vec_mut();

        for ((((_, p), (_, g)), (_, m)), (_, v)) in
            ps.into_iter().zip(gs).zip(ms).zip(vs)
        {
            for ((p_i, g_i), (m_i, v_i)) in
                p.iter_mut().zip(g.iter()).zip(m.iter_mut().zip(v.iter_mut()))
            {
                *m_i = self.beta1 * *m_i + (1.0 - self.beta1) * g_i;
                *v_i = self.beta2 * *v_i + (1.0 - self.beta2) * g_i * g_i;
                let m_hat = *m_i / bc1;
                let v_hat = *v_i / bc2;
                *p_i -= self.lr * (m_hat / (v_hat.sqrt() + self.eps) + self.weight_decay * *p_i);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn adamw_descends_a_quadratic() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut params = PolicyParams::init(3, 4, 4, 6, &mut rng);
        let mut opt = AdamW::new(&params, 0.05, 0.0);

        // Minimize ||q_proj - 3||^2; every other gradient is zero.
        for _ in 0..500 {
            let mut grads = params.zeros_like();
            grads.q_proj = params.q_proj.mapv(|w| 2.0 * (w - 3.0));
            opt.step(&mut params, &grads);
        }

        for w in params.q_proj.iter() {
            assert!((w - 3.0).abs() < 0.05, "q_proj entry {} did not converge", w);
        }
    }

    #[test]
    fn weight_decay_shrinks_untouched_params() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut params = PolicyParams::init(3, 4, 4, 6, &mut rng);
        let before = params.head.mapv(f32::abs).sum();
        let mut opt = AdamW::new(&params, 1e-2, 0.1);

        let grads = params.zeros_like();
        for _ in 0..50 {
            opt.step(&mut params, &grads);
        }

        let after = params.head.mapv(f32::abs).sum();
        assert!(after < before, "decay should shrink weights: {} -> {}", before, after);
    }
}
