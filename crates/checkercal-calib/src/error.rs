use std::fmt;

/// Why a solve could not start or its linear stage broke down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsufficientReason {
    TooFewViews { got: usize, required: usize },
    EmptyImageSize,
    /// Views whose sizes disagree with the requested image size.
    ImageSizeMismatch,
    /// The closed-form stage could not produce an initial estimate.
    DegenerateViews(String),
}

impl fmt::Display for InsufficientReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsufficientReason::TooFewViews { got, required } => {
                write!(f, "{got} views, at least {required} required")
            }
            InsufficientReason::EmptyImageSize => write!(f, "image size is empty"),
            InsufficientReason::ImageSizeMismatch => {
                write!(f, "views were captured at a different image size")
            }
            InsufficientReason::DegenerateViews(why) => write!(f, "degenerate views: {why}"),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CalibError {
    #[error("insufficient data: {0}")]
    InsufficientData(InsufficientReason),
}

impl CalibError {
    pub(crate) fn degenerate(why: impl Into<String>) -> Self {
        CalibError::InsufficientData(InsufficientReason::DegenerateViews(why.into()))
    }
}
