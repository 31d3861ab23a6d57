use itertools::izip;

#[inline]
pub(crate) fn logaddexp(a: f64, b: f64) -> f64 {
    if a == b {
        return a + 2f64.ln();
    }
    let diff = a - b;
    if diff > 0. {
        a + (-diff).exp().ln_1p()
    } else if diff < 0. {
        b + diff.exp().ln_1p()
    } else {
        // diff is NAN
        diff
    }
}

pub(crate) fn vector_dot(a: &[f64], b: &[f64]) -> f64 {
    assert!(a.len() == b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `out = a * x + y`
pub(crate) fn axpy_out(x: &[f64], y: &[f64], a: f64, out: &mut [f64]) {
    assert!(x.len() == y.len());
    assert!(x.len() == out.len());
    izip!(x, y, out).for_each(|(&x, &y, out)| *out = a.mul_add(x, y));
}

/// `y += a * x`
pub(crate) fn axpy(x: &[f64], y: &mut [f64], a: f64) {
    assert!(x.len() == y.len());
    x.iter().zip(y.iter_mut()).for_each(|(&x, y)| *y = a.mul_add(x, *y));
}

pub(crate) fn multiply(x: &[f64], y: &[f64], out: &mut [f64]) {
    assert!(x.len() == y.len());
    assert!(x.len() == out.len());
    izip!(x, y, out).for_each(|(&x, &y, out)| *out = x * y);
}

pub(crate) fn all_finite(x: &[f64]) -> bool {
    x.iter().all(|val| val.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn check_logaddexp() {
        let a = -2.5f64;
        let b = 1.25f64;
        assert_relative_eq!(logaddexp(a, b), (a.exp() + b.exp()).ln(), epsilon = 1e-12);
        assert_relative_eq!(logaddexp(a, a), a + 2f64.ln());
        assert!(logaddexp(f64::NEG_INFINITY, 0.) == 0.);
        assert!(logaddexp(f64::NAN, 0.).is_nan());
    }

    #[test]
    fn check_kernels() {
        let x = [1., 2., 3.];
        let y = [0.5, -1., 2.];
        let mut out = [0.; 3];

        axpy_out(&x, &y, 2., &mut out);
        assert_eq!(out, [2.5, 3., 8.]);

        let mut y2 = y;
        axpy(&x, &mut y2, -1.);
        assert_eq!(y2, [-0.5, -3., -1.]);

        multiply(&x, &y, &mut out);
        assert_eq!(out, [0.5, -2., 6.]);

        assert_relative_eq!(vector_dot(&x, &y), 4.5);

        assert!(all_finite(&x));
        assert!(!all_finite(&[1., f64::INFINITY]));
    }
}
