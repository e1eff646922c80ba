//! Small dense products over row-major f64 tile buffers
//!
//! Naming follows BLAS transposition flags: `nt` is `A · Bᵀ`, `nn` is `A · B`,
//! `tn` is `Aᵀ · B`. The `_acc` variants add `alpha * product` into `out`.

/// `out[m, n] = a[m, k] · b[n, k]ᵀ`
pub(crate) fn matmul_nt(a: &[f64], b: &[f64], m: usize, n: usize, k: usize, out: &mut [f64]) {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), n * k);
    debug_assert_eq!(out.len(), m * n);
    for (a_row, out_row) in a.chunks_exact(k).zip(out.chunks_exact_mut(n)) {
        for (b_row, o) in b.chunks_exact(k).zip(out_row.iter_mut()) {
            *o = dot(a_row, b_row);
        }
    }
}

/// `out[m, n] += alpha * a[m, k] · b[k, n]`
pub(crate) fn matmul_nn_acc(
    a: &[f64],
    b: &[f64],
    m: usize,
    k: usize,
    n: usize,
    alpha: f64,
    out: &mut [f64],
) {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), k * n);
    debug_assert_eq!(out.len(), m * n);
    for (a_row, out_row) in a.chunks_exact(k).zip(out.chunks_exact_mut(n)) {
        for (&a_ik, b_row) in a_row.iter().zip(b.chunks_exact(n)) {
            if a_ik == 0.0 {
                continue;
            }
            axpy(out_row, b_row, alpha * a_ik);
        }
    }
}

/// `out[m, n] += alpha * a[k, m]ᵀ · b[k, n]`
pub(crate) fn matmul_tn_acc(
    a: &[f64],
    b: &[f64],
    k: usize,
    m: usize,
    n: usize,
    alpha: f64,
    out: &mut [f64],
) {
    debug_assert_eq!(a.len(), k * m);
    debug_assert_eq!(b.len(), k * n);
    debug_assert_eq!(out.len(), m * n);
    for (a_row, b_row) in a.chunks_exact(m).zip(b.chunks_exact(n)) {
        for (&a_ki, out_row) in a_row.iter().zip(out.chunks_exact_mut(n)) {
            if a_ki == 0.0 {
                continue;
            }
            axpy(out_row, b_row, alpha * a_ki);
        }
    }
}

#[inline]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(&x, &y)| x * y).sum()
}

/// `out += w * x`
#[inline]
pub(crate) fn axpy(out: &mut [f64], x: &[f64], w: f64) {
    debug_assert_eq!(out.len(), x.len());
    for (o, &xi) in out.iter_mut().zip(x) {
        *o += w * xi;
    }
}
