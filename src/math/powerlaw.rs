/// Definite integral of s^-q over [a, b], with the q = 1 logarithmic case.
pub fn powerlaw_integral(a: f64, b: f64, q: f64) -> f64 {
    if b <= a {
        return 0.0;
    }
    if (q - 1.0).abs() < 1e-12 {
        (b / a).ln()
    } else {
        let p = 1.0 - q;
        (b.powf(p) - a.powf(p)) / p
    }
}

/// Normalised per-bin weights w_k ∝ ∫ s^-q ds over the overlap of each bin
/// with [floor, ceil]. Bins entirely outside the window get zero weight.
///
/// Returns None when the window misses the grid entirely (the caller decides
/// whether that is a configuration error or a degenerate no-op).
pub fn powerlaw_bin_weights(edges: &[f64], q: f64, floor: f64, ceil: f64) -> Option<Vec<f64>> {
    let n = edges.len() - 1;
    let mut w = vec![0.0; n];
    let mut total = 0.0;
    for k in 0..n {
        let lo = edges[k].max(floor);
        let hi = edges[k + 1].min(ceil);
        if hi > lo {
            w[k] = powerlaw_integral(lo, hi, q);
            total += w[k];
        }
    }
    if total <= 0.0 {
        return None;
    }
    for wk in &mut w {
        *wk /= total;
    }
    Some(w)
}

/// Normalised fragment weights over bins 0..=k_max with index -alpha,
/// written into a caller-provided scratch slice (hot path, no allocation).
/// Entries above k_max are zeroed. Returns the pre-normalisation total.
pub fn fragment_weights_into(edges: &[f64], alpha: f64, k_max: usize, out: &mut [f64]) -> f64 {
    let mut total = 0.0;
    for (k, slot) in out.iter_mut().enumerate() {
        if k <= k_max {
            *slot = powerlaw_integral(edges[k], edges[k + 1], alpha);
            total += *slot;
        } else {
            *slot = 0.0;
        }
    }
    if total > 0.0 {
        for slot in out.iter_mut().take(k_max + 1) {
            *slot /= total;
        }
    }
    total
}
