//! Linear DDPM noise schedule.
//!
//! Precomputes the per-step coefficient tables the ancestral sampler reads.
//! Every table has length `n_T + 1` and is indexed directly by the diffusion
//! step `t`; index 0 is never touched by the reverse loop (it runs from
//! `n_T` down to 1) but keeping it makes `table[t]` line up with the step.

use crate::error::{CoreError, CoreResult};

/// Coefficient tables for a linear beta schedule over `n_T` steps.
///
/// Names follow the standard DDPM derivation: `ab` is `alpha_bar` (the
/// cumulative product of `alpha_t`), `mab` is `1 - alpha_bar`.
#[derive(Debug, Clone)]
pub struct NoiseSchedule {
    n_t: usize,
    /// `beta_t`, linearly interpolated from `beta1` at 0 to `beta2` at `n_T`.
    pub beta_t: Vec<f64>,
    /// `sqrt(beta_t)` — the per-step noise scale added back during sampling.
    pub sqrt_beta_t: Vec<f64>,
    /// `alpha_bar_t = prod_{s<=t} (1 - beta_s)`.
    pub alphabar_t: Vec<f64>,
    /// `sqrt(alpha_bar_t)`.
    pub sqrtab: Vec<f64>,
    /// `sqrt(1 - alpha_bar_t)`.
    pub sqrtmab: Vec<f64>,
    /// `1 / sqrt(1 - beta_t)`.
    pub oneover_sqrta: Vec<f64>,
    /// `beta_t / sqrt(1 - alpha_bar_t)` — the epsilon coefficient in the
    /// posterior mean.
    pub mab_over_sqrtmab: Vec<f64>,
}

impl NoiseSchedule {
    /// Builds the tables for a linear schedule bounded by `(beta1, beta2)`.
    ///
    /// Requires `0 < beta1 < beta2 < 1` and `n_t >= 1`.
    pub fn linear(beta1: f64, beta2: f64, n_t: usize) -> CoreResult<Self> {
        if n_t == 0 {
            return Err(CoreError::Config {
                field: "n_t".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if !(0.0 < beta1 && beta1 < beta2 && beta2 < 1.0) {
            return Err(CoreError::Config {
                field: "betas".to_string(),
                reason: format!("need 0 < beta1 < beta2 < 1, got ({beta1}, {beta2})"),
            });
        }

        let len = n_t + 1;
        let mut beta_t = Vec::with_capacity(len);
        let mut sqrt_beta_t = Vec::with_capacity(len);
        let mut alphabar_t = Vec::with_capacity(len);
        let mut sqrtab = Vec::with_capacity(len);
        let mut sqrtmab = Vec::with_capacity(len);
        let mut oneover_sqrta = Vec::with_capacity(len);
        let mut mab_over_sqrtmab = Vec::with_capacity(len);

        let mut alphabar = 1.0f64;
        for t in 0..len {
            let beta = beta1 + (beta2 - beta1) * t as f64 / n_t as f64;
            let alpha = 1.0 - beta;
            alphabar *= alpha;

            beta_t.push(beta);
            sqrt_beta_t.push(beta.sqrt());
            alphabar_t.push(alphabar);
            sqrtab.push(alphabar.sqrt());
            sqrtmab.push((1.0 - alphabar).sqrt());
            oneover_sqrta.push(1.0 / alpha.sqrt());
            mab_over_sqrtmab.push(beta / (1.0 - alphabar).sqrt());
        }

        Ok(Self {
            n_t,
            beta_t,
            sqrt_beta_t,
            alphabar_t,
            sqrtab,
            sqrtmab,
            oneover_sqrta,
            mab_over_sqrtmab,
        })
    }

    /// Number of diffusion steps `n_T`.
    pub fn n_t(&self) -> usize {
        self.n_t
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_have_length_n_t_plus_one() {
        let s = NoiseSchedule::linear(1e-4, 0.02, 400).unwrap();
        assert_eq!(s.beta_t.len(), 401);
        assert_eq!(s.alphabar_t.len(), 401);
        assert_eq!(s.mab_over_sqrtmab.len(), 401);
    }

    #[test]
    fn beta_endpoints_match_bounds() {
        let s = NoiseSchedule::linear(1e-4, 0.02, 400).unwrap();
        assert!((s.beta_t[0] - 1e-4).abs() < 1e-12);
        assert!((s.beta_t[400] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn alphabar_strictly_decreasing_in_unit_interval() {
        let s = NoiseSchedule::linear(1e-4, 0.02, 100).unwrap();
        for t in 1..=100 {
            assert!(s.alphabar_t[t] < s.alphabar_t[t - 1]);
            assert!(s.alphabar_t[t] > 0.0 && s.alphabar_t[t] < 1.0);
        }
    }

    #[test]
    fn rejects_invalid_bounds() {
        assert!(NoiseSchedule::linear(0.02, 1e-4, 100).is_err());
        assert!(NoiseSchedule::linear(0.0, 0.02, 100).is_err());
        assert!(NoiseSchedule::linear(1e-4, 1.0, 100).is_err());
        assert!(NoiseSchedule::linear(1e-4, 0.02, 0).is_err());
    }
}
