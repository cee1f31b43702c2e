use bio::stats::LogProb;

/// Multiply a phred-scaled quality by this factor to get the ln error probability, ie. ln(10)/-10
pub const LOGFACTOR: f64 = std::f64::consts::LN_10 / -10.0;

/// ln(3), used to split a base-call error uniformly over the 3 alternate bases
pub const LN3: f64 = 1.098_612_288_668_109_8;

/// ln probability substituted for degenerate likelihood terms
///
/// NaN and negative infinity are replaced by this floor. Finite values are never clamped to it.
pub const LN_PROB_FLOOR: f64 = -708.396_418_532_264_1;

pub fn ln_error_prob_to_phred(ln_prob: f64) -> f64 {
    -10f64 * (ln_prob / std::f64::consts::LN_10).max(f64::MIN_10_EXP as f64)
}

pub fn ln_error_prob_to_qphred(ln_prob: f64) -> i32 {
    ln_error_prob_to_phred(ln_prob).round() as i32
}

/// Convert a phred-scaled base quality to the ln probability of a base-call error
///
pub fn phred_to_ln_error_prob(qual: u8) -> f64 {
    qual as f64 * LOGFACTOR
}

/// Replace a non-finite ln probability with LN_PROB_FLOOR, and cap the result at 0
///
/// Returns the value and a flag set if the floor was applied.
///
pub fn floor_ln_prob(ln_prob: f64) -> (f64, bool) {
    if ln_prob.is_nan() || ln_prob == f64::NEG_INFINITY {
        (LN_PROB_FLOOR, true)
    } else {
        (ln_prob.min(0.0), false)
    }
}

/// ln(1 - exp(ln_prob)), computed without catastrophic cancellation for small probabilities
///
pub fn ln_complement(ln_prob: f64) -> f64 {
    if ln_prob > -std::f64::consts::LN_2 {
        (-ln_prob.exp_m1()).ln()
    } else {
        (-ln_prob.exp()).ln_1p()
    }
}

/// Log-sum-exp over a set of ln-transformed values
///
/// An empty input returns ln(0), ie. negative infinity.
///
pub fn ln_sum_exp(values: &[f64]) -> f64 {
    let values = values.iter().map(|&x| LogProb(x)).collect::<Vec<_>>();
    *LogProb::ln_sum_exp(&values)
}
