//! Filling of missing samples in 1-D series.

/// Linearly interpolate `count` values strictly between `from` and `to`.
///
/// The `k`-th of `count` values lies at fraction `k / (count + 1)`, so a
/// single missing value is the mean of its neighbours.
pub fn linear_between(from: f64, to: f64, count: usize) -> impl Iterator<Item = f64> {
    let steps = (count + 1) as f64;
    (1..=count).map(move |k| from + (to - from) * k as f64 / steps)
}

/// Replace NaN samples by monotone piecewise-cubic Hermite interpolation
/// (Fritsch-Carlson slopes) over the finite samples.
///
/// Samples before the first or after the last finite sample take that
/// sample's value. With a single finite sample every NaN takes its value;
/// with none the series is left unchanged.
pub fn pchip_fill(values: &mut [f64]) {
    let known: Vec<usize> = (0..values.len()).filter(|&i| values[i].is_finite()).collect();
    let (Some(&first), Some(&last)) = (known.first(), known.last()) else {
        return;
    };
    if known.len() == values.len() {
        return;
    }

    let xs: Vec<f64> = known.iter().map(|&i| i as f64).collect();
    let ys: Vec<f64> = known.iter().map(|&i| values[i]).collect();
    let slopes = pchip_slopes(&xs, &ys);

    let (head, tail) = (values[first], values[last]);
    let mut segment = 0;
    for i in 0..values.len() {
        if values[i].is_finite() {
            continue;
        }
        if i < first {
            values[i] = head;
            continue;
        }
        if i > last {
            values[i] = tail;
            continue;
        }
        let x = i as f64;
        while xs[segment + 1] < x {
            segment += 1;
        }
        values[i] = hermite(
            xs[segment],
            xs[segment + 1],
            ys[segment],
            ys[segment + 1],
            slopes[segment],
            slopes[segment + 1],
            x,
        );
    }
}

fn pchip_slopes(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let n = xs.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
    let delta: Vec<f64> = (0..n - 1).map(|k| (ys[k + 1] - ys[k]) / h[k]).collect();

    if n == 2 {
        return vec![delta[0]; 2];
    }

    let mut d = vec![0.0; n];
    for k in 1..n - 1 {
        if delta[k - 1] * delta[k] > 0.0 {
            let w1 = 2.0 * h[k] + h[k - 1];
            let w2 = h[k] + 2.0 * h[k - 1];
            d[k] = (w1 + w2) / (w1 / delta[k - 1] + w2 / delta[k]);
        }
    }
    d[0] = end_slope(h[0], h[1], delta[0], delta[1]);
    d[n - 1] = end_slope(h[n - 2], h[n - 3], delta[n - 2], delta[n - 3]);
    d
}

/// Shape-preserving three-point end slope.
fn end_slope(h0: f64, h1: f64, del0: f64, del1: f64) -> f64 {
    let d = ((2.0 * h0 + h1) * del0 - h0 * del1) / (h0 + h1);
    if d.signum() != del0.signum() || del0 == 0.0 {
        0.0
    } else if del0.signum() != del1.signum() && d.abs() > (3.0 * del0).abs() {
        3.0 * del0
    } else {
        d
    }
}

fn hermite(x0: f64, x1: f64, y0: f64, y1: f64, d0: f64, d1: f64, x: f64) -> f64 {
    let h = x1 - x0;
    let t = (x - x0) / h;
    let t2 = t * t;
    let t3 = t2 * t;
    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;
    h00 * y0 + h10 * h * d0 + h01 * y1 + h11 * h * d1
}
