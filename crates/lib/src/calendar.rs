//! Google Calendar free/busy client.
//!
//! Authenticates with a long-lived OAuth refresh token (exchanged for a
//! short-lived access token on every query; no token cache) and fetches
//! busy intervals for one calendar over a time window.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::slots::BusyInterval;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const FREEBUSY_URL: &str = "https://www.googleapis.com/calendar/v3/freeBusy";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum CalendarError {
    /// Credentials absent. Surfaced to the patient as a distinct message
    /// because no availability answer is possible at all.
    #[error("calendar credentials not configured")]
    NotConfigured,
    #[error("calendar request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("calendar api returned {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("calendar response malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone)]
pub struct CalendarCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    calendars: std::collections::HashMap<String, CalendarBusy>,
}

#[derive(Debug, Default, Deserialize)]
struct CalendarBusy {
    #[serde(default)]
    busy: Vec<BusyPeriod>,
}

#[derive(Debug, Deserialize)]
struct BusyPeriod {
    start: String,
    end: String,
}

/// Free/busy client for the clinic's calendar.
pub struct CalendarClient {
    credentials: Option<CalendarCredentials>,
    calendar_id: String,
    client: reqwest::Client,
}

impl CalendarClient {
    pub fn new(credentials: Option<CalendarCredentials>, calendar_id: String) -> Self {
        Self {
            credentials,
            calendar_id,
            client: reqwest::Client::new(),
        }
    }

    pub fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    async fn access_token(&self) -> Result<String, CalendarError> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or(CalendarError::NotConfigured)?;
        let res = self
            .client
            .post(TOKEN_URL)
            .timeout(REQUEST_TIMEOUT)
            .form(&[
                ("client_id", creds.client_id.as_str()),
                ("client_secret", creds.client_secret.as_str()),
                ("refresh_token", creds.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CalendarError::Api { status, body });
        }
        let token: TokenResponse = res.json().await?;
        Ok(token.access_token)
    }

    /// Busy intervals for the calendar between `time_min` and `time_max`.
    pub async fn busy_intervals(
        &self,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CalendarError> {
        let token = self.access_token().await?;
        let res = self
            .client
            .post(FREEBUSY_URL)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(token)
            .json(&json!({
                "timeMin": time_min.to_rfc3339(),
                "timeMax": time_max.to_rfc3339(),
                "items": [{ "id": self.calendar_id }],
                "timeZone": "America/Sao_Paulo",
            }))
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CalendarError::Api { status, body });
        }
        let parsed: FreeBusyResponse = res.json().await?;
        let busy = parsed
            .calendars
            .get(&self.calendar_id)
            .map(|c| c.busy.as_slice())
            .unwrap_or_default();
        busy.iter().map(parse_busy_period).collect()
    }
}

fn parse_busy_period(period: &BusyPeriod) -> Result<BusyInterval, CalendarError> {
    let parse = |s: &str| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| CalendarError::Malformed(format!("bad busy timestamp {:?}: {}", s, e)))
    };
    Ok(BusyInterval {
        start: parse(&period.start)?,
        end: parse(&period.end)?,
    })
}
