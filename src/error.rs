//! Error type shared by the solver and the Python binding.

/// Possible RTM errors.
///
/// Every variant is detected before any caller-visible output is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtmError {
    /// Parallel inputs don't have consistent lengths or shapes
    DimensionMismatch {
        /// Name of the offending input
        quantity: &'static str,
    },
    /// An index or physical value is outside its valid range
    OutOfRange {
        /// Name of the offending input
        quantity: &'static str,
        /// Position of the offending element within its input
        index: usize,
    },
    /// A layer could not be solved without dividing by a vanishing quantity
    NumericalDegeneracy {
        /// Layer index (0 is the top of the atmosphere)
        layer: usize,
    },
}

impl RtmError {
    /// Integer status code for this error. Success is reported as 0 by the
    /// callers of this method.
    pub fn status(&self) -> i32 {
        match self {
            RtmError::DimensionMismatch { .. } => 1,
            RtmError::OutOfRange { .. } => 2,
            RtmError::NumericalDegeneracy { .. } => 3,
        }
    }
}

impl std::fmt::Display for RtmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RtmError::DimensionMismatch { quantity } => {
                write!(f, "inputs to RTM have the wrong shape: {quantity}")
            }
            RtmError::OutOfRange { quantity, index } => {
                write!(f, "{quantity} at index {index} is out of range")
            }
            RtmError::NumericalDegeneracy { layer } => {
                write!(f, "two-stream solution for layer {layer} is numerically degenerate")
            }
        }
    }
}

impl std::error::Error for RtmError {}

#[cfg(test)]
mod tests {
    use super::RtmError;

    #[test]
    fn status_codes_are_distinct_and_nonzero() {
        let codes = [
            RtmError::DimensionMismatch { quantity: "od" }.status(),
            RtmError::OutOfRange {
                quantity: "ssa",
                index: 3,
            }
            .status(),
            RtmError::NumericalDegeneracy { layer: 0 }.status(),
        ];
        assert_eq!(codes, [1, 2, 3]);
    }

    #[test]
    fn display_names_the_quantity() {
        let e = RtmError::OutOfRange {
            quantity: "layer index",
            index: 7,
        };
        assert_eq!(e.to_string(), "layer index at index 7 is out of range");
    }
}
