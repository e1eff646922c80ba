//! Shared fixtures for the flash attention integration tests.
#![allow(dead_code)]

use numr::runtime::cpu::{CpuClient, CpuDevice, CpuRuntime};
use numr::tensor::Tensor;

pub fn setup() -> (CpuClient, CpuDevice) {
    let device = CpuDevice::new();
    let client = CpuClient::new(device.clone());
    (client, device)
}

/// Deterministic data in `[-0.8, 0.8]`; `phase` decorrelates Q, K, V, dO.
pub fn det_data(n: usize, phase: f32) -> Vec<f32> {
    (0..n).map(|i| (i as f32 * 0.37 + phase).sin() * 0.8).collect()
}

pub fn det_tensor(shape: &[usize], phase: f32, device: &CpuDevice) -> Tensor<CpuRuntime> {
    let n: usize = shape.iter().product();
    Tensor::<CpuRuntime>::from_slice(&det_data(n, phase), shape, device)
}

/// Dense attention gradients for `[B, H, S, D]` row-major host buffers.
pub struct DenseGrads {
    pub out: Vec<f64>,
    pub dq: Vec<f64>,
    pub dk: Vec<f64>,
    pub dv: Vec<f64>,
}

/// Full-matrix forward and backward in f64, one (batch, head) slice at a time.
///
/// Causal masking is top-left aligned: row `i` sees keys `j <= i`.
#[allow(clippy::too_many_arguments)]
pub fn dense_reference(
    q: &[f32],
    k: &[f32],
    v: &[f32],
    dout: &[f32],
    slices: usize,
    s_q: usize,
    s_k: usize,
    d: usize,
    causal: bool,
) -> DenseGrads {
    let scale = (d as f64).sqrt().recip();
    let mut g = DenseGrads {
        out: vec![0.0; slices * s_q * d],
        dq: vec![0.0; slices * s_q * d],
        dk: vec![0.0; slices * s_k * d],
        dv: vec![0.0; slices * s_k * d],
    };

    for bh in 0..slices {
        let qo = bh * s_q * d;
        let ko = bh * s_k * d;
        let at = |x: &[f32], base: usize, row: usize, c: usize| f64::from(x[base + row * d + c]);

        let mut p = vec![0.0f64; s_q * s_k];
        for i in 0..s_q {
            let row = &mut p[i * s_k..(i + 1) * s_k];
            for (j, pj) in row.iter_mut().enumerate() {
                *pj = if causal && j > i {
                    f64::NEG_INFINITY
                } else {
                    (0..d).map(|c| at(q, qo, i, c) * at(k, ko, j, c)).sum::<f64>() * scale
                };
            }
            let m = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if m == f64::NEG_INFINITY {
                row.iter_mut().for_each(|x| *x = 0.0);
                continue;
            }
            row.iter_mut().for_each(|x| *x = (*x - m).exp());
            let sum: f64 = row.iter().sum();
            row.iter_mut().for_each(|x| *x /= sum);
        }

        for i in 0..s_q {
            for j in 0..s_k {
                for c in 0..d {
                    g.out[qo + i * d + c] += p[i * s_k + j] * at(v, ko, j, c);
                }
            }
        }

        for i in 0..s_q {
            let dp: Vec<f64> = (0..s_k)
                .map(|j| (0..d).map(|c| at(dout, qo, i, c) * at(v, ko, j, c)).sum())
                .collect();
            let delta: f64 = (0..s_k).map(|j| p[i * s_k + j] * dp[j]).sum();
            for j in 0..s_k {
                let pij = p[i * s_k + j];
                let ds = pij * (dp[j] - delta) * scale;
                for c in 0..d {
                    g.dq[qo + i * d + c] += ds * at(k, ko, j, c);
                    g.dk[ko + j * d + c] += ds * at(q, qo, i, c);
                    g.dv[ko + j * d + c] += pij * at(dout, qo, i, c);
                }
            }
        }
    }
    g
}

/// Elementwise `|got - want| <= atol + rtol * |want|`.
pub fn assert_close(got: &[f32], want: &[f64], atol: f64, rtol: f64, what: &str) {
    assert_eq!(got.len(), want.len(), "{what}: length mismatch");
    for (i, (&g, &w)) in got.iter().zip(want).enumerate() {
        let err = (f64::from(g) - w).abs();
        assert!(
            err <= atol + rtol * w.abs(),
            "{what}[{i}]: got {g}, want {w} (err {err:.3e})"
        );
    }
}

/// Max relative error measured against the largest reference magnitude.
pub fn rel_err(got: &[f32], want: &[f64]) -> f64 {
    let scale = want.iter().fold(0.0f64, |m, &w| m.max(w.abs())).max(1e-12);
    got.iter()
        .zip(want)
        .map(|(&g, &w)| (f64::from(g) - w).abs())
        .fold(0.0f64, f64::max)
        / scale
}
