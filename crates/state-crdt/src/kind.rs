/// Merge policies a tracked field can follow
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CrdtError;

/// How concurrent writes to one field are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrdtKind {
    /// The first value installed is permanent; later writes are tombstoned
    FirstWriterWins,

    /// The most recently merged write evicts the prior one
    LastWriterWins,

    /// Like `LastWriterWins`, but a remove clears the field to null
    LastWriterWinsNullable,

    /// Every distinct value coexists
    Set,
}

impl CrdtKind {
    pub const ALL: [CrdtKind; 4] = [
        CrdtKind::FirstWriterWins,
        CrdtKind::LastWriterWins,
        CrdtKind::LastWriterWinsNullable,
        CrdtKind::Set,
    ];

    /// Maximum number of live add records, `None` if unbounded
    pub fn max_live_records(self) -> Option<usize> {
        match self {
            CrdtKind::FirstWriterWins
            | CrdtKind::LastWriterWins
            | CrdtKind::LastWriterWinsNullable => Some(1),
            CrdtKind::Set => None,
        }
    }

    /// Whether remove operations have any effect for this kind
    pub fn supports_remove(self) -> bool {
        match self {
            CrdtKind::FirstWriterWins | CrdtKind::LastWriterWins => false,
            CrdtKind::LastWriterWinsNullable | CrdtKind::Set => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CrdtKind::FirstWriterWins => "FIRST_WRITER_WINS",
            CrdtKind::LastWriterWins => "LAST_WRITER_WINS",
            CrdtKind::LastWriterWinsNullable => "LAST_WRITER_WINS_NULLABLE",
            CrdtKind::Set => "SET",
        }
    }
}

impl fmt::Display for CrdtKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrdtKind {
    type Err = CrdtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CrdtKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CrdtError::InvalidTracker(format!("unknown crdt kind: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_strings() {
        for kind in CrdtKind::ALL {
            assert_eq!(kind.as_str().parse::<CrdtKind>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }

        assert_eq!("set".parse::<CrdtKind>().unwrap(), CrdtKind::Set);
        assert!("LWW".parse::<CrdtKind>().is_err());
    }

    #[test]
    fn test_policy_table() {
        assert_eq!(CrdtKind::Set.max_live_records(), None);
        assert_eq!(CrdtKind::LastWriterWins.max_live_records(), Some(1));

        assert!(!CrdtKind::FirstWriterWins.supports_remove());
        assert!(!CrdtKind::LastWriterWins.supports_remove());
        assert!(CrdtKind::LastWriterWinsNullable.supports_remove());
        assert!(CrdtKind::Set.supports_remove());
    }
}
