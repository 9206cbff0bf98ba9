//! Patient contact lookup against the clinic's Supabase database.
//!
//! Queries the PostgREST API by CPF or phone. The primary `contacts` table
//! is tried first; a non-200 falls back to the `google_contacts_cache`
//! mirror before giving up.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CPF_DIGITS: usize = 11;

#[derive(Debug, Error)]
pub enum ContactError {
    #[error("supabase not configured")]
    NotConfigured,
    #[error("CPF inválido: deve ter 11 dígitos.")]
    InvalidCpf,
    #[error("no CPF or phone provided")]
    MissingQuery,
    #[error("contact request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("contact lookup returned {0}")]
    Api(reqwest::StatusCode),
}

/// A contact row, tolerant of the schema drift between the two tables
/// (`name` vs `full_name`, `phone` vs `phone_number`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub name: String,
    pub phone: String,
    pub email: String,
}

impl Contact {
    fn from_row(row: &Value) -> Self {
        let field = |keys: &[&str], fallback: &str| {
            keys.iter()
                .filter_map(|k| row.get(*k).and_then(Value::as_str))
                .find(|s| !s.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };
        Self {
            name: field(&["name", "full_name"], "Nome não informado"),
            phone: field(&["phone", "phone_number"], "Não informado"),
            email: field(&["email"], "Não informado"),
        }
    }

    /// Card shown to the agent (and ultimately the patient).
    pub fn card(&self) -> String {
        format!(
            "Paciente encontrado:\n- Nome: {}\n- Telefone: {}\n- Email: {}",
            self.name, self.phone, self.email
        )
    }
}

/// Lookup query: exactly one identifying field, pre-normalized to digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactQuery {
    Cpf(String),
    Phone(String),
}

impl ContactQuery {
    /// Build a query from raw user-supplied strings. CPF takes precedence
    /// and must normalize to exactly 11 digits; phone accepts any digits.
    pub fn parse(cpf: Option<&str>, phone: Option<&str>) -> Result<Self, ContactError> {
        if let Some(raw) = cpf.filter(|s| !s.trim().is_empty()) {
            let digits = keep_digits(raw);
            if digits.len() != CPF_DIGITS {
                return Err(ContactError::InvalidCpf);
            }
            return Ok(Self::Cpf(digits));
        }
        if let Some(raw) = phone.filter(|s| !s.trim().is_empty()) {
            return Ok(Self::Phone(keep_digits(raw)));
        }
        Err(ContactError::MissingQuery)
    }

    fn filter_param(&self) -> (&'static str, String) {
        match self {
            Self::Cpf(digits) => ("cpf", format!("eq.{}", digits)),
            Self::Phone(digits) => ("phone", format!("eq.{}", digits)),
        }
    }

    /// The value echoed in the not-found message.
    pub fn term(&self) -> &str {
        match self {
            Self::Cpf(d) | Self::Phone(d) => d,
        }
    }
}

fn keep_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Supabase PostgREST client for patient records.
pub struct ContactStore {
    url: Option<String>,
    key: Option<String>,
    client: reqwest::Client,
}

impl ContactStore {
    pub fn new(url: Option<String>, key: Option<String>) -> Self {
        Self {
            url: url.map(|u| u.trim_end_matches('/').to_string()),
            key,
            client: reqwest::Client::new(),
        }
    }

    fn credentials(&self) -> Result<(&str, &str), ContactError> {
        match (self.url.as_deref(), self.key.as_deref()) {
            (Some(url), Some(key)) if !url.is_empty() && !key.is_empty() => Ok((url, key)),
            _ => Err(ContactError::NotConfigured),
        }
    }

    async fn fetch_table(
        &self,
        table: &str,
        query: &ContactQuery,
    ) -> Result<reqwest::Response, ContactError> {
        let (url, key) = self.credentials()?;
        let (column, filter) = query.filter_param();
        let res = self
            .client
            .get(format!("{}/rest/v1/{}", url, table))
            .header("apikey", key)
            .bearer_auth(key)
            .timeout(REQUEST_TIMEOUT)
            .query(&[(column, filter.as_str()), ("limit", "1")])
            .send()
            .await?;
        Ok(res)
    }

    /// Look up one contact. `Ok(None)` means no matching patient.
    pub async fn find(&self, query: &ContactQuery) -> Result<Option<Contact>, ContactError> {
        let mut res = self.fetch_table("contacts", query).await?;
        if res.status() != reqwest::StatusCode::OK {
            log::warn!(
                "contacts table returned {}, trying google_contacts_cache",
                res.status()
            );
            res = self.fetch_table("google_contacts_cache", query).await?;
        }
        if res.status() != reqwest::StatusCode::OK {
            return Err(ContactError::Api(res.status()));
        }
        let rows: Vec<Value> = res.json().await?;
        Ok(rows.first().map(Contact::from_row))
    }
}
