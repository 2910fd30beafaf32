/// Result alias that carries the custom [`BeatMapError`] type.
pub type Result<T> = std::result::Result<T, BeatMapError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum BeatMapError {
    /// The audio container or codec is not one the decoder understands.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),
    /// The audio file could not be decoded. Fatal for the song.
    #[error("failed to decode audio: {0}")]
    AudioDecode(String),
    /// A Markov model for one difficulty could not be loaded. Fatal for that
    /// difficulty only.
    #[error("failed to load markov model `{name}`: {reason}")]
    ModelLoad { name: String, reason: String },
    /// Automatic segment-count estimation produced no usable elbow.
    #[error("segment count estimation failed: {0}")]
    SegmentationEstimation(String),
    /// The retry budget ran out before a walk reached the required length.
    #[error("markov walk never reached {required} tokens after {attempts} attempts")]
    WalkLengthUnsatisfiable { required: usize, attempts: usize },
    /// The model has no outgoing transition for the requested state.
    #[error("markov model has no transition from state {0:?}")]
    UnknownMarkovState(Vec<String>),
    /// A note field is missing or cannot be brought into its legal domain.
    #[error("invalid note field: {0}")]
    NoteFieldInvalid(String),
    /// A difficulty track was advanced out of order.
    #[error("difficulty track cannot move from {from} to {to}")]
    InvalidStage {
        from: &'static str,
        to: &'static str,
    },
    /// Caller supplied data that violates a precondition.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Free-form error message.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
}

impl BeatMapError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for BeatMapError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for BeatMapError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
