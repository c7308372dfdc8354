//! Stage lifecycle states.

use smallvec::SmallVec;
use std::fmt;

/// Lifecycle state shared by every stage and aggregated by the graph.
///
/// States are ordered `Null < Ready < Paused < Playing`; transitions only
/// move between neighbours. `Null` is both initial and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum StageState {
    /// No resources held.
    #[default]
    Null,
    /// External resources (devices, sockets) acquired.
    Ready,
    /// Prerolled, data flow suspended.
    Paused,
    /// Data flowing.
    Playing,
}

/// One adjacent step `(from, to)`.
pub type Step = (StageState, StageState);

impl StageState {
    const ORDER: [StageState; 4] = [
        StageState::Null,
        StageState::Ready,
        StageState::Paused,
        StageState::Playing,
    ];

    fn rank(self) -> usize {
        self as usize
    }

    /// Whether `other` is reachable in one step.
    pub fn is_adjacent(self, other: StageState) -> bool {
        self.rank().abs_diff(other.rank()) == 1
    }

    /// The neighbour one step closer to `target`, or `None` if already there.
    pub fn next_toward(self, target: StageState) -> Option<StageState> {
        let (from, to) = (self.rank(), target.rank());
        match from.cmp(&to) {
            std::cmp::Ordering::Less => Some(Self::ORDER[from + 1]),
            std::cmp::Ordering::Greater => Some(Self::ORDER[from - 1]),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Decompose a request into sequential adjacent steps.
    pub fn path_to(self, target: StageState) -> SmallVec<[Step; 3]> {
        let mut steps = SmallVec::new();
        let mut current = self;
        while let Some(next) = current.next_toward(target) {
            steps.push((current, next));
            current = next;
        }
        steps
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            StageState::Null => "null",
            StageState::Ready => "ready",
            StageState::Paused => "paused",
            StageState::Playing => "playing",
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StageState::*;

    #[test]
    fn test_adjacency() {
        assert!(Null.is_adjacent(Ready));
        assert!(Playing.is_adjacent(Paused));
        assert!(!Null.is_adjacent(Paused));
        assert!(!Ready.is_adjacent(Ready));
    }

    #[test]
    fn test_path_up_and_down() {
        assert_eq!(
            Null.path_to(Playing).as_slice(),
            &[(Null, Ready), (Ready, Paused), (Paused, Playing)]
        );
        assert_eq!(
            Playing.path_to(Ready).as_slice(),
            &[(Playing, Paused), (Paused, Ready)]
        );
        assert!(Paused.path_to(Paused).is_empty());
    }

    #[test]
    fn test_every_step_is_adjacent() {
        for from in StageState::ORDER {
            for to in StageState::ORDER {
                for (a, b) in from.path_to(to) {
                    assert!(a.is_adjacent(b), "{a} -> {b}");
                }
            }
        }
    }
}
