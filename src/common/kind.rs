use crate::MatchLstmError;
use tch::{Kind, Scalar, Tensor};

/// Lowest finite value for a floating point kind. Used instead of `-inf` so that soft-label
/// cross-entropy stays finite at masked positions (`0 * min == 0`, `0 * -inf == NaN`).
pub(crate) fn get_min_value(kind: Kind) -> Result<Scalar, MatchLstmError> {
    Ok(match kind {
        Kind::Half => Scalar::float(half::f16::MIN.into()),
        Kind::Float => Scalar::float(f32::MIN.into()),
        Kind::BFloat16 => Scalar::float(half::bf16::MIN.into()),
        Kind::Double => Scalar::float(f64::MIN),
        _ => {
            return Err(MatchLstmError::ValueError(format!(
                "Type not supported: attempted to get minimum value for {:?}",
                kind
            )))
        }
    })
}

/// Sets `scores` to the lowest finite value wherever `mask` is false.
pub(crate) fn mask_scores(scores: &Tensor, mask: &Tensor) -> Result<Tensor, MatchLstmError> {
    let fill_value = get_min_value(scores.kind())?;
    Ok(scores.masked_fill(&mask.logical_not(), fill_value))
}

#[cfg(test)]
mod test {
    use super::*;
    use tch::Device;

    #[test]
    fn masked_positions_have_zero_probability() {
        let scores = Tensor::from_slice(&[1.0f32, 2.0, 3.0]).view([1, 3]);
        let mask = Tensor::from_slice(&[true, true, false]).view([1, 3]);
        let probs = mask_scores(&scores, &mask)
            .unwrap()
            .softmax(-1, Kind::Float);
        assert_eq!(probs.double_value(&[0, 2]), 0.0);
        let total = probs.sum(Kind::Float).double_value(&[]);
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn integer_kinds_are_rejected() {
        let scores = Tensor::zeros(&[2], (Kind::Int64, Device::Cpu));
        let mask = Tensor::ones(&[2], (Kind::Bool, Device::Cpu));
        assert!(mask_scores(&scores, &mask).is_err());
    }
}
