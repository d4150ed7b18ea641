use thiserror::Error;

/// Error kinds returned by the public API (spec §6/§7).
///
/// `Ok` is represented by `Result::Ok(())`; everything else is a variant here so
/// callers can match on the exact failure kind instead of inspecting a string.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LsdnError {
    /// Allocation failed and no `nomem` callback recovered from it. Also
    /// returned when an `Id` passed to an accessor doesn't (or no longer)
    /// resolve in the arena — the closest-meaning existing variant, since
    /// the original's raw-pointer API has no "not found" case to begin with
    /// (every `Id<T>` here stands in for what used to be a live pointer).
    #[error("out of memory or stale id")]
    NoMem,
    /// A name was already present in its scope.
    #[error("duplicate name")]
    Duplicate,
    /// `validate` (or the validation phase of `commit`) found at least one problem.
    #[error("topology failed validation")]
    Validate,
    /// `commit` reported a problem after kernel mutations may already have started.
    #[error("commit failed")]
    Commit,
    /// The configured netlink effector returned an error.
    #[error("netlink operation failed")]
    Netlink,
    /// An interface name could not be resolved to an ifindex.
    #[error("interface does not exist")]
    NoIf,
    /// `commit`/`validate` was called while already running (nested commit is
    /// forbidden, §5) — the original source relies on single-threaded discipline
    /// alone, this crate makes the guard structural.
    #[error("commit or validate already in progress")]
    Busy,
}

pub type LsdnResult<T> = Result<T, LsdnError>;
