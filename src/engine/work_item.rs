// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Units of schedulable engine work.

use std::fmt;

/// The scheduling class of a work item. Items are handed out in this order within a period.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkGroup {
    /// One-shot control tasks.
    Control,
    /// Windchest volume aggregation.
    Windchest,
    /// Audio group and device output mixing.
    Mixing,
    /// Release tail processing.
    Release,
}

impl fmt::Display for WorkGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkGroup::Control => "control",
            WorkGroup::Windchest => "windchest",
            WorkGroup::Mixing => "mixing",
            WorkGroup::Release => "release",
        };
        write!(f, "{}", name)
    }
}

/// A unit of engine work run by the worker threads once per period.
///
/// `group`, `cost` and `repeat` must be free of side effects. `run` may be called from any
/// worker, and more than once per period; it must make progress without redoing completed
/// work. `exec` produces the same result synchronously on the calling thread.
pub trait WorkItem: Send + Sync {
    /// The scheduling class.
    fn group(&self) -> WorkGroup;

    /// Relative CPU weight. Zero means negligible.
    fn cost(&self) -> u32;

    /// True if the scheduler keeps this item for every period; false for one-shot items.
    fn repeat(&self) -> bool;

    /// Performs this period's work. `thread` is the index of the calling worker, if any.
    fn run(&self, thread: Option<usize>);

    /// Completes this period's work on the calling thread.
    fn exec(&self);

    /// Blocks until this period's work is complete, running it here if nobody has yet.
    fn finish(&self) {
        self.run(None);
    }

    /// Drops permanent configuration. Called when the instrument changes.
    fn clear(&self);

    /// Drops per-period transient state.
    fn reset(&self);
}
