//! Bilinear scoring functions and the losses built on them.
//!
//! Scores are computed two ways with the same math:
//! - on candle tensors, batched over triplets, for training ([`ScoringFunction::score_batch`])
//! - on plain slices, for host-side ranking ([`ScoringFunction::score`])
//!
//! Complex-valued embeddings store the real part in the first half of the
//! vector and the imaginary part in the second half.

use candle_core::{Result, Tensor, D};
use serde::{Deserialize, Serialize};

/// Decoder scoring function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringFunction {
    /// DistMult: <s, r, o>
    DistMult,
    /// ComplEx: Re(<s, r, conj(o)>)
    ComplEx,
}

impl ScoringFunction {
    /// Score one triplet.
    pub fn score(&self, subject: &[f32], relation: &[f32], object: &[f32]) -> f32 {
        match self {
            Self::DistMult => score_distmult(subject, relation, object),
            Self::ComplEx => score_complex(subject, relation, object),
        }
    }

    /// Score `n` triplets at once: `(n, d)` inputs, `(n,)` output.
    pub fn score_batch(&self, subject: &Tensor, relation: &Tensor, object: &Tensor) -> Result<Tensor> {
        match self {
            Self::DistMult => subject.mul(relation)?.mul(object)?.sum(D::Minus1),
            Self::ComplEx => {
                let half = subject.dim(D::Minus1)? / 2;
                let re = |t: &Tensor| t.narrow(D::Minus1, 0, half);
                let im = |t: &Tensor| t.narrow(D::Minus1, half, half);
                let (s_re, s_im) = (re(subject)?, im(subject)?);
                let (r_re, r_im) = (re(relation)?, im(relation)?);
                let (o_re, o_im) = (re(object)?, im(object)?);

                let x = s_re.mul(&r_re)?.sub(&s_im.mul(&r_im)?)?;
                let y = s_re.mul(&r_im)?.add(&s_im.mul(&r_re)?)?;
                x.mul(&o_re)?.add(&y.mul(&o_im)?)?.sum(D::Minus1)
            }
        }
    }

    /// Name as used in configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DistMult => "distmult",
            Self::ComplEx => "complex",
        }
    }
}

/// DistMult scoring: <s, r, o>
fn score_distmult(subject: &[f32], relation: &[f32], object: &[f32]) -> f32 {
    subject
        .iter()
        .zip(relation)
        .zip(object)
        .map(|((s, r), o)| s * r * o)
        .sum()
}

/// ComplEx scoring: Re(<s, r, conj(o)>), halves as (real, imaginary).
fn score_complex(subject: &[f32], relation: &[f32], object: &[f32]) -> f32 {
    let dim = subject.len() / 2;
    let mut score = 0.0;

    for i in 0..dim {
        let (s_re, s_im) = (subject[i], subject[dim + i]);
        let (r_re, r_im) = (relation[i], relation[dim + i]);
        let (o_re, o_im) = (object[i], object[dim + i]);

        // (s * r) = X + Yi; Re((X + Yi)(o_re - o_im i)) = X o_re + Y o_im
        let x = s_re * r_re - s_im * r_im;
        let y = s_re * r_im + s_im * r_re;

        score += x * o_re + y * o_im;
    }
    score
}

/// Below this, `ln(1 + e^x)` is taken as `e^x`.
const SOFTPLUS_EXP_BELOW: f64 = -10.0;

/// Floor added to every standard deviation read through [`positive_std`].
pub const MIN_STD: f64 = 1e-6;

/// `ln(1 + e^x)`, strictly positive and finite in f32.
///
/// Computed as `relu(x) + ln(1 + e^{-|x|})`, except far below zero where
/// `1 + e^x` rounds to 1 and the result is `e^x` instead. The exp branch is
/// evaluated on `min(x, threshold)` so neither branch overflows.
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let threshold = x.ones_like()?.affine(SOFTPLUS_EXP_BELOW, 0.0)?;
    let tail = x.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    let stable = x.relu()?.add(&tail)?;
    let small = x.minimum(&threshold)?.exp()?;
    x.lt(&threshold)?.where_cond(&small, &stable)
}

/// `softplus(raw) + MIN_STD`: a standard deviation whose log is finite.
pub fn positive_std(raw: &Tensor) -> Result<Tensor> {
    softplus(raw)?.affine(1.0, MIN_STD)
}

/// Mean binary cross-entropy between `sigmoid(logits)` and `labels`.
pub fn bce_with_logits(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    softplus(logits)?.sub(&logits.mul(labels)?)?.mean_all()
}
