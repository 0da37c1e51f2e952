// model = "claude-opus-4-5"
// created = 2026-02-01
// modified = 2026-10-18
// driver = "Isaac Clayton"

//! Range set of deleted and garbage collected ids.
//!
//! Deletions tend to come in runs (a user selects a paragraph and hits
//! backspace), so we store per-user ranges instead of single ids. Each range
//! is either "deleted" or "deleted and garbage collected"; adjacent ranges
//! with the same flag are merged.
//!
//! Complexity:
//! - mark: O(log n) where n is the number of ranges for that user
//! - lookup: O(log n)

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde::Serialize;

use super::clock::State;
use super::id::OpId;
use crate::key::KeyPub;

/// One run of deleted ids as seen from outside: `clock..clock + len`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRange {
    pub user: KeyPub,
    pub clock: u64,
    pub len: u64,
    pub gc: bool,
}

impl DeleteRange {
    /// One past the last id covered.
    pub fn end(&self) -> u64 {
        return self.clock + self.len;
    }
}

/// A readable snapshot of a delete set, sorted by (user, clock).
pub type DeleteSetSnapshot = Vec<DeleteRange>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Run {
    len: u64,
    gc: bool,
}

/// Deleted ids, grouped by user into non-overlapping ranges.
#[derive(Clone, Debug, Default)]
pub struct DeleteSet {
    users: FxHashMap<KeyPub, BTreeMap<u64, Run>>,
}

impl DeleteSet {
    /// Create an empty delete set.
    pub fn new() -> DeleteSet {
        return DeleteSet::default();
    }

    /// Find the range covering `id`, as (start, run).
    fn find(&self, id: &OpId) -> Option<(u64, Run)> {
        let runs = self.users.get(&id.user)?;
        let (start, run) = runs.range(..=id.seq).next_back()?;
        if id.seq < start + run.len {
            return Some((*start, *run));
        }
        return None;
    }

    /// Mark `id` deleted. No-op if it is already covered.
    pub fn mark_deleted(&mut self, id: &OpId) {
        if self.find(id).is_some() {
            return;
        }
        let runs = self.users.entry(id.user).or_default();
        runs.insert(id.seq, Run { len: 1, gc: false });
        merge_around(runs, id.seq);
    }

    /// Mark `id` deleted and garbage collected.
    ///
    /// If the id sits inside a plain deleted range, that range is split so
    /// only this id changes flag.
    pub fn mark_garbage_collected(&mut self, id: &OpId) {
        let found = self.find(id);
        if let Some((_, run)) = found {
            if run.gc {
                return;
            }
        }

        let runs = self.users.entry(id.user).or_default();
        if let Some((start, run)) = found {
            runs.remove(&start);
            if id.seq > start {
                runs.insert(start, Run { len: id.seq - start, gc: false });
            }
            let end = start + run.len;
            if id.seq + 1 < end {
                runs.insert(id.seq + 1, Run { len: end - id.seq - 1, gc: false });
            }
        }
        runs.insert(id.seq, Run { len: 1, gc: true });
        merge_around(runs, id.seq);
    }

    /// True if `id` is deleted (garbage collected ids are deleted too).
    pub fn is_deleted(&self, id: &OpId) -> bool {
        return self.find(id).is_some();
    }

    /// True if `id` has been garbage collected.
    pub fn is_garbage_collected(&self, id: &OpId) -> bool {
        return self.find(id).is_some_and(|(_, run)| run.gc);
    }

    /// Skip a user's clock over a run of garbage collected ids.
    ///
    /// Operations that were collected elsewhere will never be delivered, so
    /// once the clock reaches such a run it may jump to the end of it.
    pub fn advance_state(&self, state: &mut State) {
        let id = OpId::new(state.user, state.clock);
        if let Some((start, run)) = self.find(&id) {
            if run.gc {
                state.clock = state.clock.max(start + run.len);
            }
        }
    }

    /// All ranges, sorted by user then clock.
    pub fn snapshot(&self) -> DeleteSetSnapshot {
        let mut ranges = Vec::new();
        for (user, runs) in &self.users {
            for (clock, run) in runs {
                ranges.push(DeleteRange {
                    user: *user,
                    clock: *clock,
                    len: run.len,
                    gc: run.gc,
                });
            }
        }
        ranges.sort_by(|a, b| a.user.cmp(&b.user).then(a.clock.cmp(&b.clock)));
        return ranges;
    }

    /// Ids deleted in `other` that are not yet deleted here.
    pub fn missing_from(&self, other: &[DeleteRange]) -> Vec<OpId> {
        let mut missing = Vec::new();
        for range in other {
            for seq in range.clock..range.end() {
                let id = OpId::new(range.user, seq);
                if !self.is_deleted(&id) {
                    missing.push(id);
                }
            }
        }
        return missing;
    }
}

/// Merge the run starting at `at` with equal-flag neighbours that touch it.
fn merge_around(runs: &mut BTreeMap<u64, Run>, at: u64) {
    let Some(mut run) = runs.get(&at).copied() else {
        return;
    };
    let mut start = at;

    let prev = runs.range(..at).next_back().map(|(s, r)| (*s, *r));
    if let Some((prev_start, prev_run)) = prev {
        if prev_start + prev_run.len == at && prev_run.gc == run.gc {
            runs.remove(&at);
            start = prev_start;
            run.len += prev_run.len;
            runs.insert(start, run);
        }
    }

    let end = start + run.len;
    if let Some(next_run) = runs.get(&end).copied() {
        if next_run.gc == run.gc {
            runs.remove(&end);
            run.len += next_run.len;
            runs.insert(start, run);
        }
    }
}
