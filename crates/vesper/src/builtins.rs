//! Built-in functions reachable by bare name.
//!
//! Name resolution tries the scope chain first, so user bindings can shadow
//! any of these. Dispatch lives in the call machinery; this module only
//! defines the set and the name mapping.

use std::str::FromStr;

use strum::{Display, EnumString, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub(crate) enum Builtins {
    /// `slice(seq, start, end?)` — copies a sub-sequence of an array, tuple,
    /// or string.
    #[strum(serialize = "slice")]
    Slice,
    /// `async_sleep(seconds)` — returns a coroutine that completes with null
    /// once the deadline passes.
    #[strum(serialize = "async_sleep")]
    AsyncSleep,
    /// `gather(tasks)` — returns a coroutine aggregating an array of
    /// coroutines.
    #[strum(serialize = "gather")]
    Gather,
    /// `cancel(coro)` — flags a coroutine for cancellation.
    #[strum(serialize = "cancel")]
    Cancel,
}

impl Builtins {
    /// Resolves a bare name that was not found in any scope.
    pub fn by_name(name: &str) -> Option<Self> {
        Self::from_str(name).ok()
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for builtin in [Builtins::Slice, Builtins::AsyncSleep, Builtins::Gather, Builtins::Cancel] {
            assert_eq!(Builtins::by_name(builtin.name()), Some(builtin));
        }
        assert_eq!(Builtins::by_name("no_such_builtin"), None);
    }
}
