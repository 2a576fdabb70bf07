//! Damped Newton iteration for inverting nonlinear point transforms.
//!
//! Grid and B-spline transforms have no closed-form inverse; both use
//! this routine with their own forward evaluation and analytic
//! Jacobian. Failure to converge is reported, not fatal: the caller
//! gets the best estimate found so far.

use crate::geometry::{Matrix3, Point3, Vector3};

#[derive(Debug, Clone, Copy)]
pub(crate) struct NewtonParams {
    /// Convergence tolerance in world units (applied squared to both
    /// the residual and the last step length).
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl Default for NewtonParams {
    fn default() -> Self {
        Self { tolerance: 1e-3, max_iterations: 500 }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct NewtonOutcome {
    pub point: Point3,
    /// Forward Jacobian at the solution.
    pub jacobian: Matrix3,
    pub converged: bool,
    pub iterations: u32,
}

/// Solve `forward(x) = target` starting from `initial`.
///
/// Each accepted step solves the linearized system with the analytic
/// Jacobian. When a step increases the residual it is shortened by a
/// quadratic-model line search whose fraction is clamped to [0.1, 0.5],
/// then retried from the last accepted iterate.
pub(crate) fn invert<F>(
    target: &Point3,
    initial: Point3,
    params: NewtonParams,
    mut forward: F,
) -> NewtonOutcome
where
    F: FnMut(&Point3) -> (Point3, Matrix3),
{
    let tol2 = params.tolerance * params.tolerance;

    let mut x = initial;
    let mut last_x = x;
    let (mut fx, mut jac) = forward(&x);
    let mut residual = target - fx;
    let mut error2 = residual.norm_squared();
    let mut last_error2 = error2;
    let mut step = Vector3::zeros();

    let mut best_x = x;
    let mut best_jac = jac;
    let mut best_error2 = error2;

    let mut converged = false;
    let mut iterations = 0;
    while iterations < params.max_iterations {
        iterations += 1;

        if error2 <= tol2 && step.norm_squared() <= tol2 {
            converged = true;
            best_x = x;
            best_jac = jac;
            break;
        }

        if error2 > last_error2 {
            // residual grew: shorten the previous step and retry from
            // the last accepted iterate
            let fraction = (last_error2 / (error2 + last_error2)).clamp(0.1, 0.5);
            step *= fraction;
            x = last_x + step;
        } else {
            last_x = x;
            last_error2 = error2;
            if error2 < best_error2 {
                best_x = x;
                best_jac = jac;
                best_error2 = error2;
            }
            // fall back to the raw residual when the Jacobian is locally singular
            step = jac.lu().solve(&residual).unwrap_or(residual);
            x += step;
        }

        let (next_fx, next_jac) = forward(&x);
        fx = next_fx;
        jac = next_jac;
        residual = target - fx;
        error2 = residual.norm_squared();
    }

    if !converged && error2 < best_error2 {
        best_x = x;
        best_jac = jac;
    }

    NewtonOutcome { point: best_x, jacobian: best_jac, converged, iterations }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity_converges_immediately() {
        let target = Point3::new(1.0, 2.0, 3.0);
        let out = invert(&target, target, NewtonParams::default(), |p| {
            (*p, Matrix3::identity())
        });
        assert!(out.converged);
        assert_eq!(out.iterations, 1);
        assert_eq!(out.point, target);
    }

    #[test]
    fn test_inverts_nonlinear_map() {
        // forward: (x + 0.1 sin(y), y, z)
        let forward = |p: &Point3| {
            let fx = Point3::new(p.x + 0.1 * p.y.sin(), p.y, p.z);
            let mut jac = Matrix3::identity();
            jac[(0, 1)] = 0.1 * p.y.cos();
            (fx, jac)
        };
        let target = Point3::new(0.5, 1.2, -0.3);
        let out = invert(&target, target, NewtonParams::default(), forward);
        assert!(out.converged);
        let (round_trip, _) = forward(&out.point);
        assert_relative_eq!(round_trip.x, target.x, epsilon = 1e-3);
        assert_relative_eq!(round_trip.y, target.y, epsilon = 1e-3);
        assert_relative_eq!(round_trip.z, target.z, epsilon = 1e-3);
    }

    #[test]
    fn test_reports_non_convergence() {
        // forward ignores its input entirely, so no inverse exists
        let target = Point3::new(5.0, 0.0, 0.0);
        let params = NewtonParams { tolerance: 1e-6, max_iterations: 20 };
        let out = invert(&target, Point3::origin(), params, |_| {
            (Point3::origin(), Matrix3::identity())
        });
        assert!(!out.converged);
        assert_eq!(out.iterations, 20);
    }
}
