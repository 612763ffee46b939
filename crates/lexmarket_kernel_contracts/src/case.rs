#![forbid(unsafe_code)]

use serde::{Deserialize, Deserializer, Serialize};

use crate::common::validate_path_token;
use crate::{ContractViolation, Validate};

macro_rules! path_id {
    ($name:ident, $field:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
                let v = Self(id.into());
                v.validate()?;
                Ok(v)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Validate for $name {
            fn validate(&self) -> Result<(), ContractViolation> {
                validate_path_token($field, &self.0, 64)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ContractViolation;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

path_id!(CaseId, "case_id");
path_id!(QuoteId, "quote_id");
path_id!(FileId, "file_id");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Open,
    Engaged,
    Closed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl CaseStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Engaged => "engaged",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    pub const fn accepts_quotes(self) -> bool {
        matches!(self, Self::Open)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStatus {
    Proposed,
    Accepted,
    Rejected,
    #[serde(other)]
    Unknown,
}

impl QuoteStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "proposed" => Some(Self::Proposed),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

// The backend sends quote amounts as decimal strings, older rows as numbers.
fn amount_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "amount must be a string or number, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub id: CaseId,
    pub title: String,
    pub category: String,
    pub status: CaseStatus,
    #[serde(default)]
    pub quotes_count: u32,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseFile {
    pub id: FileId,
    pub file_name: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientQuote {
    pub id: QuoteId,
    #[serde(default)]
    pub lawyer_name: Option<String>,
    #[serde(deserialize_with = "amount_text")]
    pub amount: String,
    pub expected_days: u32,
    #[serde(default)]
    pub note: Option<String>,
    pub status: QuoteStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: CaseId,
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub status: CaseStatus,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub quotes: Vec<ClientQuote>,
    #[serde(default)]
    pub files: Vec<CaseFile>,
}

impl CaseRecord {
    pub fn quote(&self, quote_id: &QuoteId) -> Option<&ClientQuote> {
        self.quotes.iter().find(|q| &q.id == quote_id)
    }
}

/// Anonymized case as a lawyer sees it in the marketplace. Files appear only
/// once the lawyer's quote has been accepted and paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplaceCase {
    pub id: CaseId,
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: Option<CaseStatus>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub has_submitted: bool,
    #[serde(default)]
    pub files: Vec<CaseFile>,
}

impl MarketplaceCase {
    pub fn can_submit_quote(&self, existing: Option<&LawyerQuote>) -> bool {
        if !self.has_submitted {
            return true;
        }
        existing.is_some_and(|q| q.status != QuoteStatus::Accepted)
    }

    pub fn can_view_full_details(&self) -> bool {
        !self.files.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LawyerQuote {
    pub id: QuoteId,
    #[serde(default)]
    pub case_id: Option<CaseId>,
    #[serde(default)]
    pub case_title: Option<String>,
    #[serde(default)]
    pub case_category: Option<String>,
    #[serde(default)]
    pub case_status: Option<CaseStatus>,
    #[serde(deserialize_with = "amount_text")]
    pub amount: String,
    pub expected_days: u32,
    #[serde(default)]
    pub note: Option<String>,
    pub status: QuoteStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MyQuoteForCase {
    #[serde(default)]
    pub quote: Option<LawyerQuote>,
}

/// List responses wrap rows in `data`. Only the first page is consumed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateCaseInput {
    pub title: String,
    pub category: String,
    pub description: String,
}

impl CreateCaseInput {
    pub fn v1(
        title: impl Into<String>,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, ContractViolation> {
        let v = Self {
            title: title.into().trim().to_string(),
            category: category.into().trim().to_string(),
            description: description.into().trim().to_string(),
        };
        v.validate()?;
        Ok(v)
    }
}

impl Validate for CreateCaseInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        for (field, value, max) in [
            ("create_case.title", &self.title, 200),
            ("create_case.category", &self.category, 64),
            ("create_case.description", &self.description, 20_000),
        ] {
            if value.is_empty() {
                return Err(ContractViolation::MissingField { field });
            }
            if value.len() > max {
                return Err(ContractViolation::InvalidValue {
                    field,
                    reason: "too long",
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteInput {
    pub amount: String,
    pub expected_days: u32,
    pub note: String,
}

impl QuoteInput {
    pub fn v1(amount: f64, expected_days: u32, note: impl Into<String>) -> Result<Self, ContractViolation> {
        if !amount.is_finite() {
            return Err(ContractViolation::NotFinite {
                field: "quote.amount",
            });
        }
        if amount <= 0.0 {
            return Err(ContractViolation::InvalidRange {
                field: "quote.amount",
                min: f64::MIN_POSITIVE,
                max: f64::MAX,
                got: amount,
            });
        }
        let v = Self {
            amount: amount.to_string(),
            expected_days,
            note: note.into().trim().to_string(),
        };
        v.validate()?;
        Ok(v)
    }
}

impl Validate for QuoteInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.expected_days == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "quote.expected_days",
                reason: "must be > 0",
            });
        }
        if self.note.len() > 4_000 {
            return Err(ContractViolation::InvalidValue {
                field: "quote.note",
                reason: "must be <= 4000 chars",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptQuoteInput {
    pub quote_id: QuoteId,
}

/// Accept-quote response. The hosted payment page URL is the only field the
/// client acts on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AcceptQuoteResult {
    #[serde(default)]
    pub payment_link_url: Option<String>,
    #[serde(default)]
    pub payment_link_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileDownload {
    pub download_url: String,
}
