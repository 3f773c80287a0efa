use chrono::NaiveDateTime;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

pub mod time_conversion;

pub const UNKNOWN: &str = "Unknown";

/// One slow statement reported by the Firebird trace manager, ready to become a row in
/// the slow log table. Never updated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// Taken from the event header, or the ingestion clock when the block has none
    pub occurred_at: NaiveDateTime,
    pub transaction_id: i64,
    pub duration_ms: i64,
    /// Verbatim from the capture start to the end of the block, plan and counters included
    pub statement_text: String,
    pub user: String,
    pub remote_address: String,
}

/// Header layout the trace manager uses for the first line of every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    /// `2026-02-12 15:05:09`
    Spaced,
    /// `2026-02-12T15:05:09.4410`
    IsoT,
}

impl FromStr for TraceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spaced" => Ok(Self::Spaced),
            "iso-t" => Ok(Self::IsoT),
            other => Err(format!(
                "unknown trace format {other:?}, expected one of: spaced, iso-t"
            )),
        }
    }
}

impl Display for TraceFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceFormat::Spaced => write!(f, "spaced"),
            TraceFormat::IsoT => write!(f, "iso-t"),
        }
    }
}

/// Where the stored statement text starts inside an event block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementCapture {
    /// From the literal `Statement <N>:` token to the end of the block
    StatementToken,
    /// From the first SELECT/INSERT/UPDATE/DELETE/EXECUTE/WITH keyword to the end of the block
    SqlKeyword,
}

impl FromStr for StatementCapture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "statement-token" => Ok(Self::StatementToken),
            "sql-keyword" => Ok(Self::SqlKeyword),
            other => Err(format!(
                "unknown statement capture {other:?}, expected one of: statement-token, sql-keyword"
            )),
        }
    }
}

impl Display for StatementCapture {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StatementCapture::StatementToken => write!(f, "statement-token"),
            StatementCapture::SqlKeyword => write!(f, "sql-keyword"),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{StatementCapture, TraceFormat};
    use std::str::FromStr;

    #[test]
    fn options_parse_back_from_their_display() {
        for format in [TraceFormat::Spaced, TraceFormat::IsoT] {
            assert_eq!(TraceFormat::from_str(&format.to_string()), Ok(format));
        }
        for capture in [StatementCapture::StatementToken, StatementCapture::SqlKeyword] {
            assert_eq!(
                StatementCapture::from_str(&capture.to_string()),
                Ok(capture)
            );
        }
        assert!(TraceFormat::from_str("iso").is_err());
    }
}
