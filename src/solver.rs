//! Dense nonlinear least squares over residual blocks.
//!
//! The bridge optimizer's data-attachment residual dispatches through ray
//! casts into the mesh and cannot be auto-differentiated, so blocks provide
//! their residuals and Jacobians explicitly. Problems stay small (a few
//! hundred parameters per bridge), which keeps dense normal equations with a
//! pseudo-inverse fallback entirely adequate.

use log::debug;
use nalgebra::{DMatrix, DVector, SVD};

/// One group of residuals depending on a few parameters of the problem.
pub trait ResidualBlock {
    /// Number of residuals contributed by this block.
    fn residual_count(&self) -> usize;

    /// Global indices of the parameters this block reads.
    fn parameters(&self) -> &[usize];

    /// Evaluates the residuals at the given local parameter values, in the
    /// order of [`parameters`](Self::parameters). When `jacobian` is
    /// provided it is filled row-major, `residual_count x parameters.len()`.
    fn evaluate(&self, local: &[f64], residuals: &mut [f64], jacobian: Option<&mut [f64]>);
}

/// A least squares problem assembled from residual blocks.
#[derive(Default)]
pub struct Problem<'a> {
    blocks: Vec<Box<dyn ResidualBlock + 'a>>,
    n_params: usize,
}

/// Outcome of a solve. The solver always returns; quality shows in the cost.
#[derive(Debug, Clone, Copy)]
pub struct SolveReport {
    pub iterations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
}

fn pseudoinverse(m: &DMatrix<f64>, tol: f64) -> DMatrix<f64> {
    let svd = SVD::new(m.clone(), true, true);
    let mut s_inv = svd.singular_values.clone();
    for val in s_inv.iter_mut() {
        if *val > tol {
            *val = 1.0 / *val;
        } else {
            *val = 0.0;
        }
    }
    let u = svd.u.expect("SVD with u");
    let vt = svd.v_t.expect("SVD with v_t");
    vt.transpose() * DMatrix::from_diagonal(&s_inv) * u.transpose()
}

impl<'a> Problem<'a> {
    pub fn new(n_params: usize) -> Self {
        Self {
            blocks: Vec::new(),
            n_params,
        }
    }

    pub fn add_block(&mut self, block: impl ResidualBlock + 'a) {
        debug_assert!(block
            .parameters()
            .iter()
            .all(|&p| p < self.n_params));
        self.blocks.push(Box::new(block));
    }

    pub fn n_parameters(&self) -> usize {
        self.n_params
    }

    /// Sum of squared residuals at `x`.
    pub fn cost(&self, x: &[f64]) -> f64 {
        let mut cost = 0.0;
        let mut local = Vec::new();
        let mut res = Vec::new();
        for block in &self.blocks {
            let params = block.parameters();
            local.clear();
            local.extend(params.iter().map(|&p| x[p]));
            res.clear();
            res.resize(block.residual_count(), 0.0);
            block.evaluate(&local, &mut res, None);
            cost += res.iter().map(|r| r * r).sum::<f64>();
        }
        cost
    }

    /// Assembles the normal equations `J^T J` and `J^T r` at `x`.
    fn normal_equations(&self, x: &[f64]) -> (DMatrix<f64>, DVector<f64>, f64) {
        let n = self.n_params;
        let mut jtj = DMatrix::<f64>::zeros(n, n);
        let mut jtr = DVector::<f64>::zeros(n);
        let mut cost = 0.0;
        let mut local = Vec::new();
        let mut res = Vec::new();
        let mut jac = Vec::new();
        for block in &self.blocks {
            let params = block.parameters();
            let k = params.len();
            let m = block.residual_count();
            local.clear();
            local.extend(params.iter().map(|&p| x[p]));
            res.clear();
            res.resize(m, 0.0);
            jac.clear();
            jac.resize(m * k, 0.0);
            block.evaluate(&local, &mut res, Some(&mut jac));
            for r in 0..m {
                cost += res[r] * res[r];
                for c1 in 0..k {
                    let j1 = jac[r * k + c1];
                    if j1 == 0.0 {
                        continue;
                    }
                    jtr[params[c1]] += j1 * res[r];
                    for c2 in 0..k {
                        jtj[(params[c1], params[c2])] += j1 * jac[r * k + c2];
                    }
                }
            }
        }
        (jtj, jtr, cost)
    }

    /// Levenberg-Marquardt with best-so-far acceptance: damping controls the
    /// step, but the returned solution is always the best visited iterate,
    /// so an uphill exploration step can never degrade the result.
    pub fn solve(&self, x: &mut [f64], max_iterations: usize) -> SolveReport {
        let n = self.n_params;
        let mut lambda = 1e-3;
        let initial_cost = self.cost(x);
        let mut best_x = x.to_vec();
        let mut best_cost = initial_cost;
        let mut current = x.to_vec();
        let mut iterations = 0;

        for iter in 0..max_iterations {
            iterations = iter + 1;
            let (jtj, jtr, current_cost) = self.normal_equations(&current);
            let gradient_norm = jtr.amax();
            if gradient_norm < 1e-10 {
                break;
            }

            let mut damped = jtj.clone();
            for i in 0..n {
                damped[(i, i)] += lambda * (1.0 + jtj[(i, i)]);
            }
            let rhs = -&jtr;
            let step = match damped.clone().cholesky() {
                Some(chol) => chol.solve(&rhs),
                None => pseudoinverse(&damped, 1e-12) * &rhs,
            };

            let mut candidate = current.clone();
            for i in 0..n {
                candidate[i] += step[i];
            }
            let candidate_cost = self.cost(&candidate);
            debug!(
                "lm iter {iter}: cost {current_cost:.6} -> {candidate_cost:.6}, lambda {lambda:.2e}"
            );

            if candidate_cost < best_cost {
                best_cost = candidate_cost;
                best_x.copy_from_slice(&candidate);
            }
            // Non-monotonic acceptance: the step is taken even on a mild
            // regression, which lets the solver cross shallow ridges.
            if candidate_cost < current_cost * 1.001 {
                current = candidate;
                lambda = (lambda / 3.0).max(1e-12);
            } else {
                lambda = (lambda * 4.0).min(1e8);
            }
            if step.amax() < 1e-10 {
                break;
            }
        }

        x.copy_from_slice(&best_x);
        SolveReport {
            iterations,
            initial_cost,
            final_cost: best_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Anchor {
        params: [usize; 1],
        target: f64,
        coef: f64,
    }

    impl ResidualBlock for Anchor {
        fn residual_count(&self) -> usize {
            1
        }

        fn parameters(&self) -> &[usize] {
            &self.params
        }

        fn evaluate(&self, local: &[f64], residuals: &mut [f64], jacobian: Option<&mut [f64]>) {
            residuals[0] = self.coef * (local[0] - self.target);
            if let Some(jac) = jacobian {
                jac[0] = self.coef;
            }
        }
    }

    struct Difference {
        params: [usize; 2],
        coef: f64,
    }

    impl ResidualBlock for Difference {
        fn residual_count(&self) -> usize {
            1
        }

        fn parameters(&self) -> &[usize] {
            &self.params
        }

        fn evaluate(&self, local: &[f64], residuals: &mut [f64], jacobian: Option<&mut [f64]>) {
            residuals[0] = self.coef * (local[0] - local[1]);
            if let Some(jac) = jacobian {
                jac[0] = self.coef;
                jac[1] = -self.coef;
            }
        }
    }

    #[test]
    fn anchored_chain_relaxes_to_line() {
        // Five values tied by differences, anchored at 0 and 8: the minimum
        // is the linear ramp.
        let mut problem = Problem::new(5);
        problem.add_block(Anchor {
            params: [0],
            target: 0.0,
            coef: 10.0,
        });
        problem.add_block(Anchor {
            params: [4],
            target: 8.0,
            coef: 10.0,
        });
        for i in 0..4 {
            problem.add_block(Difference {
                params: [i, i + 1],
                coef: 1.0,
            });
        }
        let mut x = vec![0.0; 5];
        let report = problem.solve(&mut x, 50);
        assert!(report.final_cost <= report.initial_cost);
        for i in 0..5 {
            assert!((x[i] - 2.0 * i as f64).abs() < 0.2, "x[{i}] = {}", x[i]);
        }
    }

    #[test]
    fn nonlinear_one_sided_bound() {
        struct Bound {
            params: [usize; 1],
            max: f64,
        }
        impl ResidualBlock for Bound {
            fn residual_count(&self) -> usize {
                1
            }
            fn parameters(&self) -> &[usize] {
                &self.params
            }
            fn evaluate(&self, local: &[f64], res: &mut [f64], jac: Option<&mut [f64]>) {
                let over = (local[0] - self.max).max(0.0);
                res[0] = 100.0 * over;
                if let Some(jac) = jac {
                    jac[0] = if local[0] > self.max { 100.0 } else { 0.0 };
                }
            }
        }
        let mut problem = Problem::new(1);
        problem.add_block(Anchor {
            params: [0],
            target: 10.0,
            coef: 1.0,
        });
        problem.add_block(Bound {
            params: [0],
            max: 4.0,
        });
        let mut x = vec![0.0];
        problem.solve(&mut x, 100);
        // The bound is four orders of magnitude stiffer than the pull.
        assert!(x[0] < 4.1, "x = {}", x[0]);
        assert!(x[0] > 3.0, "x = {}", x[0]);
    }

    #[test]
    fn solver_always_returns_best_iterate() {
        let mut problem = Problem::new(1);
        problem.add_block(Anchor {
            params: [0],
            target: 1.0,
            coef: 1.0,
        });
        let mut x = vec![100.0];
        let report = problem.solve(&mut x, 3);
        assert!(report.final_cost <= report.initial_cost);
        assert!(problem.cost(&x) == report.final_cost);
    }
}
