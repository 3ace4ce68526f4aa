//! Parameter initialization helpers.

use candle_nn::init::Init;

/// Recommended gain for ReLU activations (`sqrt(2)`).
pub const RELU_GAIN: f64 = std::f64::consts::SQRT_2;

/// Glorot/Xavier uniform initialization.
///
/// Samples from `U(-a, a)` with `a = gain * sqrt(6 / (fan_in + fan_out))`.
pub fn xavier_uniform(fan_in: usize, fan_out: usize, gain: f64) -> Init {
    let bound = gain * (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}
