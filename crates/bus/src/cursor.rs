use std::cmp::Ordering;
use std::fmt;

/// A stream entry id: `(milliseconds, sequence)`, ordered lexicographically
/// the same way Redis stream ids are — by `ms` then by `seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (ms, seq) = raw.split_once('-')?;
        Some(Self {
            ms: ms.parse().ok()?,
            seq: seq.parse().ok()?,
        })
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl PartialOrd for StreamId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StreamId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ms.cmp(&other.ms).then(self.seq.cmp(&other.seq))
    }
}

/// Per-stream read position. `Start` always reads from the beginning (used
/// at startup replay); `After(id)` resumes strictly after `id`; `Latest`
/// ("$" in Redis parlance) only observes entries appended after the read
/// begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    Start,
    After(StreamId),
    Latest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_lexicographic_on_ms_then_seq() {
        assert!(StreamId::new(1, 5) < StreamId::new(2, 0));
        assert!(StreamId::new(5, 0) < StreamId::new(5, 1));
        assert_eq!(StreamId::new(5, 1), StreamId::new(5, 1));
    }

    #[test]
    fn parse_round_trips_display() {
        let id = StreamId::new(1700000000000, 3);
        let rendered = id.to_string();
        assert_eq!(StreamId::parse(&rendered), Some(id));
    }

    #[test]
    fn parse_rejects_malformed() {
        assert_eq!(StreamId::parse("not-a-valid-id"), None);
        assert_eq!(StreamId::parse("123"), None);
    }
}
