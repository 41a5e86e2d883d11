//! The Raft log (§3). Entries are replicated whole: on every successful
//! `AppendEntries`, a follower's log is *replaced* by the leader's, rather
//! than patched in place — the "whole-log replication" simplification
//! documented in SPEC_FULL.md §9.

/// A single log entry. `op` is an opaque byte payload; the application
/// service never sees `term`/`index`, only `op`, via the `Apply` callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub term: u64,
    pub index: i64,
    pub op: Vec<u8>,
}

/// An append-only, in-memory Raft log. `commitIndex < log.len()` is
/// maintained by the caller (`RaftNode`), not by `Log` itself.
#[derive(Debug, Default, Clone)]
pub struct Log {
    entries: Vec<Entry>,
}

impl Log {
    pub fn new() -> Log {
        Log { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_slice(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, index: i64) -> Option<&Entry> {
        if index < 0 {
            return None;
        }
        self.entries.get(index as usize)
    }

    /// Appends a new entry at the end of the log, returning its index.
    pub fn append(&mut self, term: u64, op: Vec<u8>) -> i64 {
        let index = self.entries.len() as i64;
        self.entries.push(Entry { term, index, op });
        index
    }

    /// Replaces the whole log with `entries`, per the AppendEntries
    /// contract's step 3. This is the one place a follower's log changes.
    pub fn replace(&mut self, entries: Vec<Entry>) {
        self.entries = entries;
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;

    pub fn random_entry_with_term(term: u64) -> Entry {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        Entry {
            term,
            index: 0,
            op: (0..8).map(|_| rng.gen()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_sequential_indices() {
        let mut log = Log::new();
        assert_eq!(log.append(1, vec![1]), 0);
        assert_eq!(log.append(1, vec![2]), 1);
        assert_eq!(log.append(2, vec![3]), 2);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn replace_overwrites_whole_log() {
        let mut log = Log::new();
        log.append(1, vec![1]);
        log.append(1, vec![2]);
        log.replace(vec![Entry { term: 5, index: 0, op: vec![9] }]);
        assert_eq!(log.len(), 1);
        assert_eq!(log.get(0).unwrap().term, 5);
    }

    #[test]
    fn get_out_of_range_is_none() {
        let log = Log::new();
        assert!(log.get(-1).is_none());
        assert!(log.get(0).is_none());
    }
}
