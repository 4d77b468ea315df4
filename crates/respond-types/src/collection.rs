//! Small immutable collection helpers.

use std::fmt;

/// An immutable pair of values.
///
/// Equality and hashing are structural over both members. A pair is never
/// modified after construction; [`Pair::swap`] builds a new pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pair<L, R> {
    left: L,
    right: R,
}

impl<L, R> Pair<L, R> {
    /// Construct a pair of the given values.
    pub fn of(left: L, right: R) -> Self {
        Self { left, right }
    }

    /// The left-hand member.
    pub fn left(&self) -> &L {
        &self.left
    }

    /// The right-hand member.
    pub fn right(&self) -> &R {
        &self.right
    }

    /// A new pair with the members exchanged.
    pub fn swap(self) -> Pair<R, L> {
        Pair {
            left: self.right,
            right: self.left,
        }
    }

    /// Consume the pair, returning both members.
    pub fn into_parts(self) -> (L, R) {
        (self.left, self.right)
    }
}

impl<L, R> From<(L, R)> for Pair<L, R> {
    fn from((left, right): (L, R)) -> Self {
        Self::of(left, right)
    }
}

impl<L: fmt::Debug, R: fmt::Debug> fmt::Debug for Pair<L, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pair")
            .field("left", &self.left)
            .field("right", &self.right)
            .finish()
    }
}
