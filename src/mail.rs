use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub mod message;
pub mod outbound;

/// Whether a record is an inbound or an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Received,
    Sent,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Received => "received",
            Direction::Sent => "sent",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Direction::Received),
            "sent" => Ok(Direction::Sent),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

/// The views a mail list can be requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    Direction(Direction),
    Starred,
}

impl FromStr for ListFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starred" => Ok(ListFilter::Starred),
            other => other.parse().map(ListFilter::Direction),
        }
    }
}

/// Outcome of an SPF, DKIM or DMARC check as reported by the receiving MTA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthResult {
    Pass,
    Fail,
    SoftFail,
    Neutral,
    None,
    TempError,
    PermError,
    #[default]
    Unknown,
}

impl AuthResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthResult::Pass => "pass",
            AuthResult::Fail => "fail",
            AuthResult::SoftFail => "softfail",
            AuthResult::Neutral => "neutral",
            AuthResult::None => "none",
            AuthResult::TempError => "temperror",
            AuthResult::PermError => "permerror",
            AuthResult::Unknown => "unknown",
        }
    }

    /// Accepts bare verdicts as well as header fragments like
    /// `spf=pass (sender authorized)`.
    pub fn parse_lenient(value: &str) -> AuthResult {
        let value = value.trim().to_ascii_lowercase();
        let verdict = value
            .split_once('=')
            .map(|(_, rest)| rest)
            .unwrap_or(value.as_str())
            .split(|c: char| c.is_whitespace() || c == ';' || c == '(')
            .next()
            .unwrap_or_default();
        match verdict {
            "pass" => AuthResult::Pass,
            "fail" => AuthResult::Fail,
            "softfail" => AuthResult::SoftFail,
            "neutral" => AuthResult::Neutral,
            "none" => AuthResult::None,
            "temperror" => AuthResult::TempError,
            "permerror" => AuthResult::PermError,
            _ => AuthResult::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailRecord {
    pub id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub received_at: String,
    pub spf_status: AuthResult,
    pub dkim_status: AuthResult,
    pub dmarc_status: AuthResult,
    pub headers: BTreeMap<String, String>,
    pub size: i64,
    /// Base64 of the RFC 5322 message bytes.
    pub raw_email: String,
    #[serde(rename = "type")]
    pub direction: Direction,
    pub starred: bool,
    #[serde(alias = "readed")]
    pub read: bool,
}

/// Formats a timestamp the way records store it, so that string order
/// matches time order.
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn normalize_timestamp(value: &str) -> Result<String, chrono::ParseError> {
    let parsed = DateTime::parse_from_rfc3339(value)?;
    Ok(format_timestamp(parsed.with_timezone(&Utc)))
}

/// Body accepted by the ingestion hook. Everything except the addresses and
/// the raw message can be derived.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEmail {
    pub id: Option<String>,
    pub from: String,
    pub to: String,
    pub subject: Option<String>,
    pub received_at: Option<String>,
    pub spf_status: Option<String>,
    pub dkim_status: Option<String>,
    pub dmarc_status: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub size: Option<i64>,
    pub raw_email: String,
}

impl InboundEmail {
    pub fn into_record(self, now: DateTime<Utc>) -> Result<MailRecord, chrono::ParseError> {
        let received_at = match &self.received_at {
            Some(value) => normalize_timestamp(value)?,
            None => format_timestamp(now),
        };
        let raw = message::decode_stored(&self.raw_email);
        let subject = self
            .subject
            .filter(|s| !s.is_empty())
            .or_else(|| message::parse_raw(&raw).ok().and_then(|m| m.subject))
            .unwrap_or_else(|| "(no subject)".to_string());
        let status = |value: &Option<String>| {
            value.as_deref().map(AuthResult::parse_lenient).unwrap_or_default()
        };

        Ok(MailRecord {
            id: self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            spf_status: status(&self.spf_status),
            dkim_status: status(&self.dkim_status),
            dmarc_status: status(&self.dmarc_status),
            size: self.size.unwrap_or(raw.len() as i64),
            from: self.from,
            to: self.to,
            subject,
            received_at,
            headers: self.headers,
            raw_email: self.raw_email,
            direction: Direction::Received,
            starred: false,
            read: false,
        })
    }
}
