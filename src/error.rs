//! Error taxonomy for the engine (spec.md §7).
//!
//! Two levels are used throughout the crate, mirroring the teacher's split
//! between a compact hot-path status code and a `thiserror` enum at API
//! boundaries: [`Status`] is what interface functions (`get`/`set`/`act`,
//! hashmap operations, instruction execution) return on every call, while
//! [`EngineError`] is what `main` and integration callers see once a status
//! has to be surfaced as a real error.

use thiserror::Error;

/// Hard error kinds (negative status codes in spec.md §6/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    /// API precondition violated by the caller.
    #[error("misuse of the interface")]
    Misuse,
    /// Argument semantically invalid (bad flag combination, disallowed null).
    #[error("invalid value")]
    Value,
    /// Allocation failed.
    #[error("out of memory")]
    NoMemory,
    /// Interface lacks a function pointer required for this operation.
    #[error("interface does not implement this operation")]
    Interface,
    /// Unknown slot or parameter name.
    #[error("unknown key or slot")]
    Key,
    /// OS or plug-in reported failure.
    #[error("resource failure")]
    Resource,
    /// Invariant breach from a subordinate component; indicates a bug.
    #[error("internal invariant violated")]
    Failure,
}

/// Three-valued (plus "exists"/"vetoed") status convention used by every
/// interface operation and by the instruction executor.
///
/// `Ok` / `SoftMiss` / `Exists` / `Vetoed` are control flow, not errors;
/// `Err` is a hard failure that aborts whatever instruction produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 0 — operation succeeded.
    Ok,
    /// 1 — lookup did not find its target (`get`, `INIT`'s dparams/interface
    /// resolution, `FINAL` on a missing key).
    SoftMiss,
    /// 2 — `INIT` collided with an existing registry key.
    Exists,
    /// 3 — a `set`/`unset` predicate vetoed the operation.
    Vetoed,
    /// <0 — hard error.
    Err(EngineError),
}

impl Status {
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }

    pub fn is_err(self) -> bool {
        matches!(self, Status::Err(_))
    }

    /// Maps a soft status to `Ok(())`, an error to `Err`, matching the
    /// executor's "negative codes are remapped, 1 is advisory" contract
    /// (spec.md §4.3).
    pub fn into_result(self) -> Result<Status, EngineError> {
        match self {
            Status::Err(e) => Err(e),
            other => Ok(other),
        }
    }
}

impl From<EngineError> for Status {
    fn from(e: EngineError) -> Self {
        Status::Err(e)
    }
}

/// Maps a final engine status to a compact process exit code, the way the
/// teacher's `main()` maps load/import errors to `std::process::exit` codes
/// (spec.md §4.10: "exit code is derived from the last non-zero status").
pub fn exit_code_for(status: Status) -> i32 {
    match status {
        Status::Ok => 0,
        Status::SoftMiss => 1,
        Status::Exists => 2,
        Status::Vetoed => 3,
        Status::Err(EngineError::Misuse) => 10,
        Status::Err(EngineError::Value) => 11,
        Status::Err(EngineError::NoMemory) => 12,
        Status::Err(EngineError::Interface) => 13,
        Status::Err(EngineError::Key) => 14,
        Status::Err(EngineError::Resource) => 15,
        Status::Err(EngineError::Failure) => 16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_statuses_are_not_errors() {
        assert!(!Status::SoftMiss.is_err());
        assert!(!Status::Exists.is_err());
        assert!(!Status::Vetoed.is_err());
        assert!(Status::Err(EngineError::Value).is_err());
    }

    #[test]
    fn into_result_surfaces_only_hard_errors() {
        assert_eq!(Status::SoftMiss.into_result(), Ok(Status::SoftMiss));
        assert_eq!(
            Status::Err(EngineError::Key).into_result(),
            Err(EngineError::Key)
        );
    }

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(exit_code_for(Status::Ok), 0);
        assert_eq!(exit_code_for(Status::Err(EngineError::Failure)), 16);
    }
}
