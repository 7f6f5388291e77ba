//! Optimistic version checks.
//!
//! A write carries the version the caller last observed. It proposes
//! `observed + 1` and is rejected when the stored row has already reached that
//! version. The persisted version is always derived from the stored one, so a
//! client can never pick its own version.

use crate::{error::Result, Error, Version};

/// Decide the version a write persists.
///
/// `stored` is `None` when the row does not exist yet (treated as version −1).
/// Returns the version to persist: `0` for a new row, `stored + 1` otherwise.
pub fn check_write(id: &str, observed: Version, stored: Option<Version>) -> Result<Version> {
    let proposed = observed.saturating_add(1);
    match stored {
        None => Ok(0),
        Some(stored) if proposed <= stored => Err(Error::StaleWrite {
            id: id.to_string(),
            proposed,
            stored,
        }),
        Some(stored) => Ok(stored.saturating_add(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_row_starts_at_zero() {
        assert_eq!(check_write("a", 0, None), Ok(0));
        // Whatever the client claims, a fresh row is version 0.
        assert_eq!(check_write("a", 41, None), Ok(0));
    }

    #[test]
    fn sequential_saves_increment() {
        assert_eq!(check_write("a", 0, Some(0)), Ok(1));
        assert_eq!(check_write("a", 1, Some(1)), Ok(2));
    }

    #[test]
    fn stale_copy_is_rejected() {
        // Two copies loaded at version 1, one of them already saved (stored = 2).
        let result = check_write("a", 1, Some(2));
        assert_eq!(
            result,
            Err(Error::StaleWrite {
                id: "a".into(),
                proposed: 2,
                stored: 2,
            })
        );
    }

    #[test]
    fn client_version_ahead_is_ignored() {
        // A copy claiming a higher version still persists stored + 1.
        assert_eq!(check_write("a", 10, Some(3)), Ok(4));
    }
}
