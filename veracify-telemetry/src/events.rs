//! Event model and wire records
//!
//! Two event kinds flow through the engine. [`AnalyticsEvent`] is produced
//! by the fact-check pipeline when a check completes; [`FeedbackEvent`] is
//! produced when the user rates a result. Both are immutable once recorded
//! and are dropped only after the sink confirms delivery.
//!
//! The queue stores events in their local shape; the sync engine maps them
//! to the sink's wire schema ([`AnalyticsRecord`], [`FeedbackRecord`]) at
//! submission time, stamping in the client and session identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Usage event for one completed fact check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    /// When the check completed
    pub timestamp: DateTime<Utc>,
    /// Domain of the checked page (never the full URL)
    pub domain: String,
    /// Length of the extracted article text
    pub text_length: usize,
    /// Length of the generated search query
    pub query_length: usize,
    /// Model that produced the assessment
    pub model: String,
    /// Accuracy rating, if the pipeline produced one
    pub rating: Option<f64>,
    /// Whether web search was used for the assessment
    pub search_used: bool,
    /// Whether the domain is on the credible-source list
    pub is_credible_source: bool,
    /// Whether the domain is a known fact-check outlet
    pub is_fact_check_source: bool,
}

/// User feedback on one fact-check result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    /// When the feedback was given
    pub timestamp: DateTime<Utc>,
    /// Correlation reference to the analytics event, when known
    pub analytics_id: Option<String>,
    /// Thumbs up or down
    pub rating: FeedbackRating,
    /// Domain of the rated page
    pub domain: String,
}

/// Feedback polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackRating {
    Positive,
    Negative,
}

/// Wire schema for one analytics row, as the sink's batch insert expects it
#[derive(Debug, Serialize)]
pub struct AnalyticsRecord<'a> {
    pub domain: &'a str,
    pub text_length: usize,
    pub model_used: &'a str,
    pub rating: Option<f64>,
    pub search_used: bool,
    pub is_credible_source: bool,
    pub is_fact_check_source: bool,
    pub client_id: &'a str,
    pub session_id: &'a str,
    /// ISO-8601 timestamp string
    pub timestamp: String,
}

impl<'a> AnalyticsRecord<'a> {
    /// Build a wire record from a local event, stamping in identity
    pub fn from_event(event: &'a AnalyticsEvent, client_id: &'a str, session_id: &'a str) -> Self {
        Self {
            domain: &event.domain,
            text_length: event.text_length,
            model_used: &event.model,
            rating: event.rating,
            search_used: event.search_used,
            is_credible_source: event.is_credible_source,
            is_fact_check_source: event.is_fact_check_source,
            client_id,
            session_id,
            timestamp: event.timestamp.to_rfc3339(),
        }
    }
}

/// Wire schema for one feedback row
#[derive(Debug, Serialize)]
pub struct FeedbackRecord<'a> {
    pub analytics_id: Option<&'a str>,
    pub rating: FeedbackRating,
    pub domain: &'a str,
    pub client_id: &'a str,
    pub session_id: &'a str,
    /// ISO-8601 timestamp string
    pub timestamp: String,
}

impl<'a> FeedbackRecord<'a> {
    /// Build a wire record from a local event, stamping in identity
    pub fn from_event(event: &'a FeedbackEvent, client_id: &'a str, session_id: &'a str) -> Self {
        Self {
            analytics_id: event.analytics_id.as_deref(),
            rating: event.rating,
            domain: &event.domain,
            client_id,
            session_id,
            timestamp: event.timestamp.to_rfc3339(),
        }
    }
}

/// Map a raw queued analytics event to its wire record
pub(crate) fn analytics_wire_record(
    raw: &serde_json::Value,
    client_id: &str,
    session_id: &str,
) -> Result<serde_json::Value> {
    let event: AnalyticsEvent = serde_json::from_value(raw.clone())?;
    Ok(serde_json::to_value(AnalyticsRecord::from_event(
        &event, client_id, session_id,
    ))?)
}

/// Map a raw queued feedback event to its wire record
pub(crate) fn feedback_wire_record(
    raw: &serde_json::Value,
    client_id: &str,
    session_id: &str,
) -> Result<serde_json::Value> {
    let event: FeedbackEvent = serde_json::from_value(raw.clone())?;
    Ok(serde_json::to_value(FeedbackRecord::from_event(
        &event, client_id, session_id,
    ))?)
}
