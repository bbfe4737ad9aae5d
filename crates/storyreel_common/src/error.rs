use thiserror::Error;

/// Coarse classification of assembly failures, used by callers that only
/// need to know which stage of the pipeline gave up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    Fetch,
    Decode,
    Configuration,
    Encoding,
    Muxing,
    InvalidInput,
    Cancelled,
}

/// Which of the two elementary streams an error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// Which media payload of a story part an error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A part's payload could not be resolved to raw bytes.
    #[error("part {part}: {kind} fetch failed: {reason}")]
    Fetch {
        part: usize,
        kind: MediaKind,
        reason: String,
    },

    /// A part's payload resolved, but could not be rasterized / sampled.
    #[error("part {part}: {kind} decode failed: {reason}")]
    Decode {
        part: usize,
        kind: MediaKind,
        reason: String,
    },

    /// Codec or muxer parameters rejected by the runtime. Raised before any
    /// media work starts, never mid-stream.
    #[error("unsupported configuration: {reason}")]
    Configuration { reason: String },

    /// Mid-stream codec failure. Aborts the whole run.
    #[error("{track} encoding failed: {reason}")]
    Encode { track: TrackKind, reason: String },

    #[error("muxing failed: {reason}")]
    Mux { reason: String },

    /// Finalize was reached with a track that produced no chunks.
    #[error("{track} track received no encoded chunks")]
    EmptyTrack { track: TrackKind },

    /// The story part list was empty.
    #[error("story part list is empty")]
    EmptyInput,

    #[error("assembly cancelled")]
    Cancelled,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Fetch { .. } => ErrorCategory::Fetch,
            Error::Decode { .. } => ErrorCategory::Decode,
            Error::Configuration { .. } => ErrorCategory::Configuration,
            Error::Encode { .. } => ErrorCategory::Encoding,
            Error::Mux { .. } | Error::EmptyTrack { .. } => ErrorCategory::Muxing,
            Error::EmptyInput => ErrorCategory::InvalidInput,
            Error::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Sequence index of the story part this error refers to, if any.
    pub fn part(&self) -> Option<usize> {
        match self {
            Error::Fetch { part, .. } | Error::Decode { part, .. } => Some(*part),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_variants() {
        let err = Error::Fetch {
            part: 1,
            kind: MediaKind::Audio,
            reason: "connection refused".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Fetch);
        assert_eq!(err.part(), Some(1));

        assert_eq!(
            Error::EmptyTrack {
                track: TrackKind::Audio
            }
            .category(),
            ErrorCategory::Muxing
        );
        assert_eq!(Error::EmptyInput.category(), ErrorCategory::InvalidInput);
        assert_eq!(Error::Cancelled.part(), None);
    }

    #[test]
    fn messages_identify_part_and_stage() {
        let err = Error::Decode {
            part: 2,
            kind: MediaKind::Image,
            reason: "not a PNG".into(),
        };
        let text = err.to_string();
        assert!(text.contains("part 2"));
        assert!(text.contains("image decode"));
    }
}
