use thiserror::Error;

/// The errors that may occur while walking mp4 boxes.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read {wanted} bytes at offset {offset} ({available} available)")]
    UnexpectedEof {
        offset: usize,
        wanted: usize,
        available: usize,
    },

    #[error("box '{name}' declares an invalid size of {size} bytes")]
    InvalidBoxSize { name: String, size: u64 },

    #[error("box '{name}' is too large to be loaded ({size} bytes)")]
    BoxTooLarge { name: String, size: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
