use core::result;

/// Custom profiler errors. The callback layer relies on the split between
/// fatal conditions and the per-candidate kinds ([`Error::NotATarget`],
/// [`Error::Unsupported`]): the latter end the current candidate, not the
/// search.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An IO error while touching the install layout.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A (de)serialization error while reading or rendering a method body.
    #[error(transparent)]
    Scroll(#[from] scroll::Error),
    /// A host entry point returned a failing status.
    #[error("{call} returned {hr:#010x}")]
    Host { call: &'static str, hr: i32 },
    /// The module cannot host the injected call site; a later module may.
    #[error("module is not an eligible target: {0}")]
    NotATarget(String),
    /// The method cannot be rewritten; the next candidate may.
    #[error("method cannot be rewritten: {0}")]
    Unsupported(String),
    /// Entity is malformed in some way.
    #[error("malformed entity: {0}")]
    Malformed(String),
}

pub type Result<T> = result::Result<T, Error>;
