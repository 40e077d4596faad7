use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvldError {
    /// Too few candidates for any of them to gather the required support.
    #[error("{found} candidate matches supplied, at least {required} are needed")]
    InsufficientMatches { found: usize, required: usize },
    #[error(
        "candidate {candidate} refers to keypoint {index} of image {image}, which has only {len}"
    )]
    KeypointOutOfRange {
        candidate: usize,
        image: usize,
        index: usize,
        len: usize,
    },
}

pub type Result<T> = std::result::Result<T, KvldError>;
