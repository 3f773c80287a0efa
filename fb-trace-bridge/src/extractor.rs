use regex::{Captures, Regex};
use std::collections::HashMap;
use thiserror::Error;
use trace_structs::time_conversion::{now_naive_local, parse_trace_timestamp};
use trace_structs::{StatementCapture, TraceEvent, UNKNOWN};
use tracing::{instrument, trace};

const ADDRESS_PROTOCOL_PREFIXES: [&str; 4] = ["TCPv4:", "IPv4:", "TCPv6:", "IPv6:"];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Duration {0:?} doesn't fit a 64 bit integer")]
    DurationOutOfRange(String),
    #[error("Transaction id {0:?} doesn't fit a 64 bit integer")]
    TransactionIdOutOfRange(String),
    #[error("Timestamp {0:?} is not a valid date and time")]
    InvalidTimestamp(String),
}

/// The fields pulled out of an event block. Each one is searched independently over the
/// whole block and the first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceField {
    OccurredAt,
    TransactionId,
    DurationMs,
    Statement,
    User,
    RemoteAddress,
}

impl TraceField {
    /// Value used when the field's pattern doesn't match.
    /// None means the field is required and the block is not a slow statement without it.
    /// OccurredAt has no textual default, it falls back to the ingestion clock.
    pub fn default_value(&self) -> Option<&'static str> {
        match self {
            TraceField::OccurredAt => None,
            TraceField::TransactionId => Some("0"),
            TraceField::DurationMs => None,
            TraceField::Statement => None,
            TraceField::User => Some(UNKNOWN),
            TraceField::RemoteAddress => Some(UNKNOWN),
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self, TraceField::DurationMs | TraceField::Statement)
    }
}

struct FieldRule {
    field: TraceField,
    pattern: Regex,
}

impl FieldRule {
    fn new(field: TraceField, pattern: &str) -> Self {
        Self {
            field,
            pattern: Regex::new(pattern).expect("Invalid regex"),
        }
    }

    /// Capture groups are joined with a space, a pattern without groups yields the whole match.
    fn find(&self, block: &str) -> Option<String> {
        let captures: Captures = self.pattern.captures(block)?;
        if captures.len() == 1 {
            return Some(captures[0].to_string());
        }
        let groups: Vec<&str> = captures
            .iter()
            .skip(1)
            .flatten()
            .map(|group| group.as_str())
            .collect();
        Some(groups.join(" "))
    }
}

pub struct FieldExtractor {
    rules: Vec<FieldRule>,
}

impl FieldExtractor {
    pub fn new(statement_capture: StatementCapture) -> Self {
        let statement_pattern = match statement_capture {
            StatementCapture::StatementToken => r"(?is)Statement\s+[0-9]+:.*",
            // a keyword only counts as a whole word, not inside a path like /data/with.fdb
            StatementCapture::SqlKeyword => {
                r"(?is)(?:^|[\s:(])((?:SELECT|INSERT|UPDATE|DELETE|EXECUTE|WITH)\b.*)"
            }
        };
        // ASCII digits only, anything else can't be parsed as a number
        let rules = vec![
            FieldRule::new(
                TraceField::OccurredAt,
                r"([0-9]{4}-[0-9]{2}-[0-9]{2})[ T]([0-9]{2}:[0-9]{2}:[0-9]{2}(?:\.[0-9]+)?)",
            ),
            FieldRule::new(TraceField::TransactionId, r"TRA_([0-9]+)"),
            FieldRule::new(TraceField::DurationMs, r"([0-9]+)\s+ms\b"),
            FieldRule::new(TraceField::Statement, statement_pattern),
            FieldRule::new(TraceField::User, r"\(ATT_[0-9]+,\s*([^:,)]+)"),
            FieldRule::new(
                TraceField::RemoteAddress,
                r"(?:TCPv4|IPv4|TCPv6|IPv6):[^\s,)]+",
            ),
        ];
        Self { rules }
    }

    /// Raw text of every field that matched.
    pub fn find_fields(&self, block: &str) -> HashMap<TraceField, String> {
        self.rules
            .iter()
            .filter_map(|rule| rule.find(block).map(|value| (rule.field, value)))
            .collect()
    }

    /// Ok(None) when the block carries no duration or no statement, which is the normal
    /// outcome for every trace event that isn't a finished statement.
    #[instrument(level = "trace", skip_all)]
    pub fn extract(&self, block: &str) -> Result<Option<TraceEvent>, ExtractError> {
        let mut fields = self.find_fields(block);
        if let Some(missing) = self
            .rules
            .iter()
            .map(|rule| rule.field)
            .find(|field| field.is_required() && !fields.contains_key(field))
        {
            trace!(?missing, "Skipping block without required field");
            return Ok(None);
        }
        let occurred_at = match fields.remove(&TraceField::OccurredAt) {
            None => now_naive_local(),
            Some(timestamp) => {
                let (date, time) = timestamp
                    .split_once(' ')
                    .unwrap_or((timestamp.as_str(), ""));
                parse_trace_timestamp(date, time)
                    .ok_or_else(|| ExtractError::InvalidTimestamp(timestamp.clone()))?
            }
        };
        let duration = take_or_default(&mut fields, TraceField::DurationMs);
        let duration_ms = duration
            .parse::<i64>()
            .map_err(|_| ExtractError::DurationOutOfRange(duration))?;
        let transaction = take_or_default(&mut fields, TraceField::TransactionId);
        let transaction_id = transaction
            .parse::<i64>()
            .map_err(|_| ExtractError::TransactionIdOutOfRange(transaction))?;
        let user = take_or_default(&mut fields, TraceField::User)
            .trim()
            .to_string();
        let remote_address =
            normalize_address(&take_or_default(&mut fields, TraceField::RemoteAddress));
        Ok(Some(TraceEvent {
            occurred_at,
            transaction_id,
            duration_ms,
            statement_text: take_or_default(&mut fields, TraceField::Statement),
            user,
            remote_address,
        }))
    }
}

fn take_or_default(fields: &mut HashMap<TraceField, String>, field: TraceField) -> String {
    fields
        .remove(&field)
        .or_else(|| field.default_value().map(str::to_string))
        .unwrap_or_default()
}

/// `TCPv4:192.168.0.173/4521` -> `192.168.0.173`
pub fn normalize_address(raw: &str) -> String {
    let mut address = raw.trim();
    for prefix in ADDRESS_PROTOCOL_PREFIXES {
        if let Some(stripped) = address.strip_prefix(prefix) {
            address = stripped;
            break;
        }
    }
    let address = match address.split_once('/') {
        Some((before_slash, _)) => before_slash,
        None => address,
    };
    address.trim().to_string()
}
