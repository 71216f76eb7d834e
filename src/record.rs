//! Transport records and Graphite plaintext parsing
//!
//! A `Record` is what the log delivers: raw payload bytes plus out-of-band
//! headers and its position in the log. `MetricRecord` is the decoded metric
//! observation: `path value [timestamp]` with the headers as tags.

use crate::error::ParseError;
use std::collections::HashMap;

/// One record delivered by the log
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Broker timestamp in milliseconds since the UNIX epoch, when known
    pub timestamp_ms: Option<i64>,
    pub payload: Vec<u8>,
    /// Header key/value pairs in delivery order (duplicates allowed)
    pub headers: Vec<(String, String)>,
    /// Offset the next record produced to this partition will get, when known
    pub high_watermark: Option<i64>,
}

impl Record {
    pub fn new(topic: &str, partition: i32, offset: i64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.to_string(),
            partition,
            offset,
            timestamp_ms: None,
            payload: payload.into(),
            headers: Vec::new(),
            high_watermark: None,
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    pub fn with_high_watermark(mut self, high_watermark: i64) -> Self {
        self.high_watermark = Some(high_watermark);
        self
    }

    /// Records between this one and the partition head
    pub fn offset_lag(&self) -> Option<i64> {
        self.high_watermark
            .map(|high_watermark| high_watermark - self.offset)
    }
}

/// Expected layout of the plaintext payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordShape {
    /// Require and parse a trailing `timestamp` field
    pub timestamp: bool,
}

impl Default for RecordShape {
    fn default() -> Self {
        Self { timestamp: true }
    }
}

/// A decoded metric observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRecord {
    pub path: String,
    pub tags: HashMap<String, String>,
    pub timestamp: Option<u64>,
    pub value: Option<String>,
}

impl MetricRecord {
    /// Decode a Graphite plaintext payload with its out-of-band tags
    ///
    /// Tags are taken from `headers`; on duplicate keys the last one wins.
    /// A trailing line terminator is ignored.
    ///
    /// # Errors
    ///
    /// - `ParseError::NoPathDelimiter` if the payload has no space
    /// - `ParseError::NoTimestampDelimiter` if a timestamp is expected but the
    ///   payload has a single space
    /// - `ParseError::InvalidTimestamp` if the timestamp is not an unsigned integer
    /// - `ParseError::InvalidUtf8` if the payload is not UTF-8
    pub fn parse<'h, I>(payload: &[u8], headers: I, shape: RecordShape) -> Result<Self, ParseError>
    where
        I: IntoIterator<Item = (&'h str, &'h str)>,
    {
        let line = std::str::from_utf8(payload).map_err(|e| ParseError::InvalidUtf8 {
            valid_up_to: e.valid_up_to(),
        })?;
        let line = line.trim_end_matches(['\r', '\n']);

        let first_space = line.find(' ').ok_or(ParseError::NoPathDelimiter)?;
        let path = line[..first_space].to_string();

        let tags = headers
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        if !shape.timestamp {
            return Ok(Self {
                path,
                tags,
                timestamp: None,
                value: Some(line[first_space + 1..].to_string()),
            });
        }

        let last_space = line
            .rfind(' ')
            .filter(|&index| index != first_space)
            .ok_or(ParseError::NoTimestampDelimiter)?;

        let raw_timestamp = &line[last_space + 1..];
        let timestamp = raw_timestamp
            .parse::<u64>()
            .map_err(|_| ParseError::InvalidTimestamp {
                value: raw_timestamp.to_string(),
            })?;

        Ok(Self {
            path,
            tags,
            timestamp: Some(timestamp),
            value: Some(line[first_space + 1..last_space].to_string()),
        })
    }

    /// Decode a delivered `Record`, using its headers as tags
    ///
    /// # Errors
    ///
    /// See [`MetricRecord::parse`].
    pub fn from_record(record: &Record, shape: RecordShape) -> Result<Self, ParseError> {
        Self::parse(
            &record.payload,
            record
                .headers
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str())),
            shape,
        )
    }
}
