//! Timing of collective phases and formatting of the results.
use crate::comm::{Communicator, ReduceOp};
use crate::Error;
use std::fmt;

/// Formats a value with the given number of significant digits, like `%.<digits>g` in C.
///
/// Values whose decimal exponent `x` satisfies `-4 <= x < digits` are written in fixed notation,
/// all others in scientific notation with at least two exponent digits. Trailing zeros of the
/// fractional part are removed.
pub fn format_significant(value: f64, digits: usize) -> String {
    let digits = digits.max(1);
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    if !value.is_finite() {
        return if value.is_nan() {
            "nan".to_string()
        } else if value > 0.0 {
            "inf".to_string()
        } else {
            "-inf".to_string()
        };
    }

    // Rounding to the requested precision may bump the exponent (e.g. 9.99995 -> 1.0000e1),
    // so the exponent is read from the rounded scientific representation
    let scientific = format!("{:.*e}", digits - 1, value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some(parts) => parts,
        None => return scientific,
    };
    let exponent: i64 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= digits as i64 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", strip_trailing_zeros(mantissa), sign, exponent.abs())
    } else {
        let decimals = (digits as i64 - 1 - exponent).max(0) as usize;
        strip_trailing_zeros(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn strip_trailing_zeros(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

/// Minimum, maximum and average of a per-rank duration in seconds.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TimingSummary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl TimingSummary {
    /// Reduces the duration measured on this rank over all ranks of the group.
    ///
    /// This is a collective operation.
    pub fn reduce<T, C>(comm: &C, seconds: f64) -> Result<Self, Error>
    where
        C: Communicator<T> + ?Sized,
    {
        let min = comm.all_reduce_f64(seconds, ReduceOp::Min)?;
        let max = comm.all_reduce_f64(seconds, ReduceOp::Max)?;
        let sum = comm.all_reduce_f64(seconds, ReduceOp::Sum)?;
        Ok(Self {
            min,
            max,
            avg: sum / comm.size() as f64,
        })
    }
}

impl fmt::Display for TimingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min {} s, max {} s, avg {} s",
            format_significant(self.min, 5),
            format_significant(self.max, 5),
            format_significant(self.avg, 5)
        )
    }
}
