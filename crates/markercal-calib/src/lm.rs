//! Nonlinear least-squares problems solved with the `levenberg-marquardt` crate.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};

/// Nonlinear least-squares problem with dense parameter/residual vectors.
pub trait NllsProblem {
    /// Number of parameters in the optimization vector.
    fn num_params(&self) -> usize;
    /// Number of residual rows.
    fn num_residuals(&self) -> usize;

    fn residuals(&self, x: &DVector<f64>) -> DVector<f64>;

    /// Jacobian of [`Self::residuals`]; central differences unless overridden.
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        numeric_jacobian(self, x)
    }
}

/// Finite-difference step for parameter value `v`.
#[inline]
pub(crate) fn diff_step(v: f64) -> f64 {
    1e-6 * v.abs().max(1.0)
}

/// Central-difference Jacobian over all parameters.
pub fn numeric_jacobian<P: NllsProblem + ?Sized>(problem: &P, x: &DVector<f64>) -> DMatrix<f64> {
    let mut jac = DMatrix::zeros(problem.num_residuals(), x.len());
    let mut xp = x.clone();
    for j in 0..x.len() {
        let h = diff_step(x[j]);
        xp[j] = x[j] + h;
        let rp = problem.residuals(&xp);
        xp[j] = x[j] - h;
        let rm = problem.residuals(&xp);
        xp[j] = x[j];
        jac.set_column(j, &((rp - rm) / (2.0 * h)));
    }
    jac
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmOptions {
    /// Evaluation budget in MINPACK units: `max_iterations * (n + 1)`.
    pub max_iterations: usize,
    /// Relative cost reduction tolerance.
    pub ftol: f64,
    /// Relative parameter update tolerance.
    pub xtol: f64,
    /// Orthogonality tolerance between residuals and Jacobian columns.
    pub gtol: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmReport {
    /// Residual evaluations spent by the solver.
    pub iterations: usize,
    /// `0.5 * |r|²` at the start point.
    pub initial_cost: f64,
    pub final_cost: f64,
    pub converged: bool,
}

struct LmWrapper<'a, P: NllsProblem> {
    problem: &'a P,
    params: DVector<f64>,
}

impl<P: NllsProblem> LeastSquaresProblem<f64, Dyn, Dyn> for LmWrapper<'_, P> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.problem.residuals(&self.params))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        Some(self.problem.jacobian(&self.params))
    }
}

fn cost(r: &DVector<f64>) -> f64 {
    0.5 * r.norm_squared()
}

/// Minimize `problem` from `x0`.
///
/// The start point is returned unchanged when the solver ends on a cost that
/// is not finite or higher than the initial one.
pub fn minimize<P: NllsProblem>(
    problem: &P,
    x0: DVector<f64>,
    opts: &LmOptions,
) -> (DVector<f64>, LmReport) {
    let initial_cost = cost(&problem.residuals(&x0));
    let lm = LevenbergMarquardt::new()
        .with_ftol(opts.ftol)
        .with_xtol(opts.xtol)
        .with_gtol(opts.gtol)
        .with_patience(opts.max_iterations.max(1));

    let wrapper = LmWrapper {
        problem,
        params: x0.clone(),
    };
    let (wrapper, report) = lm.minimize(wrapper);
    let x = wrapper.params();
    let final_cost = cost(&problem.residuals(&x));

    if !final_cost.is_finite() || final_cost > initial_cost {
        return (
            x0,
            LmReport {
                iterations: report.number_of_evaluations,
                initial_cost,
                final_cost: initial_cost,
                converged: false,
            },
        );
    }
    (
        x,
        LmReport {
            iterations: report.number_of_evaluations,
            initial_cost,
            final_cost,
            converged: report.termination.was_successful(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    struct OneDim;

    impl NllsProblem for OneDim {
        fn num_params(&self) -> usize {
            1
        }
        fn num_residuals(&self) -> usize {
            1
        }
        fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
            DVector::from_element(1, x[0] - 3.0)
        }
    }

    /// Rosenbrock as residuals `[10 (y - x²), 1 - x]`.
    struct Rosenbrock;

    impl NllsProblem for Rosenbrock {
        fn num_params(&self) -> usize {
            2
        }
        fn num_residuals(&self) -> usize {
            2
        }
        fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
            DVector::from_vec(vec![10.0 * (x[1] - x[0] * x[0]), 1.0 - x[0]])
        }
    }

    /// Fit `y = a · exp(b t)` to exact samples.
    struct ExpFit {
        t: Vec<f64>,
        y: Vec<f64>,
    }

    impl NllsProblem for ExpFit {
        fn num_params(&self) -> usize {
            2
        }
        fn num_residuals(&self) -> usize {
            self.t.len()
        }
        fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
            DVector::from_iterator(
                self.t.len(),
                self.t.iter().zip(&self.y).map(|(t, y)| x[0] * (x[1] * t).exp() - y),
            )
        }
    }

    /// Residuals that blow up away from the start point.
    struct Poisoned;

    impl NllsProblem for Poisoned {
        fn num_params(&self) -> usize {
            1
        }
        fn num_residuals(&self) -> usize {
            1
        }
        fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
            let r = if x[0] == 1.0 { 1.0 } else { f64::NAN };
            DVector::from_element(1, r)
        }
        fn jacobian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_element(1, 1, 1.0)
        }
    }

    #[test]
    fn solves_trivial_problem() {
        let (x, report) = minimize(&OneDim, DVector::from_element(1, 10.0), &LmOptions::default());
        assert_abs_diff_eq!(x[0], 3.0, epsilon = 1e-6);
        assert!(report.converged, "{report:?}");
        assert!(report.final_cost < 1e-12);
        assert_abs_diff_eq!(report.initial_cost, 24.5, epsilon = 1e-12);
        assert!(report.iterations > 0);
    }

    #[test]
    fn walks_the_rosenbrock_valley() {
        let opts = LmOptions {
            max_iterations: 500,
            ..LmOptions::default()
        };
        let (x, report) = minimize(&Rosenbrock, DVector::from_vec(vec![-1.2, 1.0]), &opts);
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(x[1], 1.0, epsilon = 1e-5);
        assert!(report.final_cost < report.initial_cost);
    }

    #[test]
    fn fits_exponential_curve() {
        let t: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let y = t.iter().map(|t| 2.5 * (-1.3 * t).exp()).collect();
        let problem = ExpFit { t, y };
        let (x, report) = minimize(
            &problem,
            DVector::from_vec(vec![1.0, 0.0]),
            &LmOptions::default(),
        );
        assert_abs_diff_eq!(x[0], 2.5, epsilon = 1e-6);
        assert_abs_diff_eq!(x[1], -1.3, epsilon = 1e-6);
        assert!(report.converged);
    }

    #[test]
    fn non_finite_cost_keeps_the_start_point() {
        let (x, report) = minimize(&Poisoned, DVector::from_element(1, 1.0), &LmOptions::default());
        assert_eq!(x[0], 1.0);
        assert_eq!(report.final_cost, report.initial_cost);
    }

    #[test]
    fn numeric_jacobian_matches_analytic() {
        let x = DVector::from_vec(vec![0.7, -0.4]);
        let jac = numeric_jacobian(&Rosenbrock, &x);
        assert_abs_diff_eq!(jac[(0, 0)], -20.0 * 0.7, epsilon = 1e-6);
        assert_abs_diff_eq!(jac[(0, 1)], 10.0, epsilon = 1e-6);
        assert_abs_diff_eq!(jac[(1, 0)], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(jac[(1, 1)], 0.0, epsilon = 1e-9);
    }
}
