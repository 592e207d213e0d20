//! Typed creation time for pickup records.
//!
//! The store stamps `created_at` on every record it creates, but older data
//! and partial writes can leave the field missing or unparseable. Views need
//! a time to sort by either way, so the gap is made explicit instead of
//! silently substituting a value.

use chrono::{DateTime, Utc};

use carline_store_protocol::{parse_rfc3339, PickupRecord};

/// A record's creation time as a view should treat it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordTime {
    /// The store committed a parseable timestamp.
    Committed(DateTime<Utc>),
    /// No usable timestamp; sorting assumes the observation time.
    Pending { assumed: DateTime<Utc> },
}

impl RecordTime {
    pub fn from_wire(raw: Option<&str>, now: DateTime<Utc>) -> Self {
        match raw.and_then(parse_rfc3339) {
            Some(committed) => RecordTime::Committed(committed),
            None => RecordTime::Pending { assumed: now },
        }
    }

    /// The instant to sort and display by, regardless of provenance.
    pub fn effective(&self) -> DateTime<Utc> {
        match self {
            RecordTime::Committed(at) => *at,
            RecordTime::Pending { assumed } => *assumed,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RecordTime::Pending { .. })
    }
}

pub fn created_time(record: &PickupRecord, now: DateTime<Utc>) -> RecordTime {
    RecordTime::from_wire(record.created_at.as_deref(), now)
}
