use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Life-cycle status of a work-queue element.
///
/// ```text
/// Available -> Negotiating -> Acquired -> Running -> Done | Failed
/// ```
/// Any open status may also move to `Canceled`, and `Negotiating` may roll back to
/// `Available` when a negotiation fails. `Done`, `Failed` and `Canceled` are terminal.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ElementStatus {
    Available,
    Negotiating,
    Acquired,
    Running,
    Done,
    Failed,
    Canceled,
}

impl ElementStatus {
    pub const ALL: [ElementStatus; 7] = [
        ElementStatus::Available,
        ElementStatus::Negotiating,
        ElementStatus::Acquired,
        ElementStatus::Running,
        ElementStatus::Done,
        ElementStatus::Failed,
        ElementStatus::Canceled,
    ];

    /// Legal successors of this status.
    pub fn successors(self) -> &'static [ElementStatus] {
        use ElementStatus::*;
        match self {
            Available => &[Negotiating, Canceled],
            Negotiating => &[Acquired, Available, Canceled],
            Acquired => &[Running, Failed, Canceled],
            Running => &[Done, Failed, Canceled],
            Done | Failed | Canceled => &[],
        }
    }

    pub fn can_transition_to(self, next: ElementStatus) -> bool {
        self.successors().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ElementStatus::Done | ElementStatus::Failed | ElementStatus::Canceled)
    }

    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }

    /// True for everything a child queue has at least started negotiating.
    pub fn is_negotiating_or_later(self) -> bool {
        self != ElementStatus::Available
    }

    /// Shortest chain of legal transitions leading from `from` to `to`.
    ///
    /// The returned steps exclude `from` and end with `to`; an empty vector means the
    /// element is already there. `None` means `to` is unreachable.
    pub fn path(from: ElementStatus, to: ElementStatus) -> Option<Vec<ElementStatus>> {
        if from == to {
            return Some(vec![]);
        }
        let mut came_from: HashMap<ElementStatus, ElementStatus> = HashMap::new();
        let mut frontier = VecDeque::from([from]);
        while let Some(current) = frontier.pop_front() {
            for &next in current.successors() {
                if next == from || came_from.contains_key(&next) {
                    continue;
                }
                came_from.insert(next, current);
                if next == to {
                    let mut steps = vec![to];
                    let mut cursor = current;
                    while cursor != from {
                        steps.push(cursor);
                        cursor = came_from[&cursor];
                    }
                    steps.reverse();
                    return Some(steps);
                }
                frontier.push_back(next);
            }
        }
        None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementStatus::Available => "Available",
            ElementStatus::Negotiating => "Negotiating",
            ElementStatus::Acquired => "Acquired",
            ElementStatus::Running => "Running",
            ElementStatus::Done => "Done",
            ElementStatus::Failed => "Failed",
            ElementStatus::Canceled => "Canceled",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<ElementStatus> {
        Self::ALL.into_iter().find(|s| s.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for ElementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing state of one input file of an element.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FileState {
    Available,
    Acquired,
    Completed,
    Failed,
}

impl FileState {
    pub fn is_final(self) -> bool {
        matches!(self, FileState::Completed | FileState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ElementStatus::*;

    #[test]
    fn transition_table_matches_lifecycle() {
        let legal = [
            (Available, Negotiating),
            (Available, Canceled),
            (Negotiating, Acquired),
            (Negotiating, Available),
            (Negotiating, Canceled),
            (Acquired, Running),
            (Acquired, Failed),
            (Acquired, Canceled),
            (Running, Done),
            (Running, Failed),
            (Running, Canceled),
        ];
        for from in ElementStatus::ALL {
            for to in ElementStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_successors() {
        for s in [Done, Failed, Canceled] {
            assert!(s.is_terminal());
            assert!(s.successors().is_empty());
        }
        assert!(Running.is_open());
    }

    #[test]
    fn path_walks_shortest_legal_chain() {
        assert_eq!(ElementStatus::path(Acquired, Done), Some(vec![Running, Done]));
        assert_eq!(
            ElementStatus::path(Available, Failed),
            Some(vec![Negotiating, Acquired, Failed])
        );
        assert_eq!(ElementStatus::path(Running, Running), Some(vec![]));
        assert_eq!(ElementStatus::path(Negotiating, Canceled), Some(vec![Canceled]));
    }

    #[test]
    fn path_out_of_terminal_is_none() {
        assert_eq!(ElementStatus::path(Done, Running), None);
        assert_eq!(ElementStatus::path(Canceled, Available), None);
        assert_eq!(ElementStatus::path(Running, Available), None);
    }

    #[test]
    fn names_round_trip() {
        for s in ElementStatus::ALL {
            assert_eq!(ElementStatus::from_name(s.as_str()), Some(s));
        }
        assert_eq!(ElementStatus::from_name("negotiating"), Some(Negotiating));
        assert_eq!(ElementStatus::from_name("bogus"), None);
    }
}
