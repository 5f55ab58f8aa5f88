use std::f32::consts::PI;

/// Raised-cosine demand curve in `[0, 1]`, peaking halfway through each period.
pub fn demand_curve(tick: u64, period: u64) -> f32 {
    let period = period.max(1);
    let phase = (tick % period) as f32 / period as f32;
    0.5 - 0.5 * (phase * 2.0 * PI).cos()
}
