#![forbid(unsafe_code)]

use std::env;
use std::time::Duration;

use lexmarket_kernel_contracts::case::{
    AcceptQuoteInput, AcceptQuoteResult, CaseId, CaseRecord, CaseSummary, CreateCaseInput, FileDownload,
    FileId, LawyerQuote, ListEnvelope, MarketplaceCase, MyQuoteForCase, QuoteId, QuoteInput,
};
use lexmarket_kernel_contracts::session::{
    AuthResponse, LoginInput, Role, SessionToken, SignupInput, UserProfile,
};
use lexmarket_kernel_contracts::{ContractViolation, Validate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/v1";
pub const API_TIMEOUT_MS_DEFAULT: u64 = 10_000;

const FALLBACK_ERROR_MESSAGE: &str = "Request failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Http,
    Transport,
    Decode,
    InvalidRequest,
}

/// Uniform failure shape for every backend call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Http,
            status: Some(status),
            message: message.into(),
        }
    }

    fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Transport,
            status: None,
            message: message.into(),
        }
    }

    fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Decode,
            status: None,
            message: message.into(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status, Some(401) | Some(403))
    }
}

impl From<ContractViolation> for ApiError {
    fn from(value: ContractViolation) -> Self {
        Self {
            kind: ApiErrorKind::InvalidRequest,
            status: None,
            message: value.to_string(),
        }
    }
}

/// Turns a non-2xx response into an [`ApiError`]: the body's `error` field
/// when present, a generic status message when the body is JSON without one,
/// and a fixed fallback when the body is not JSON at all.
pub fn error_from_response(status: u16, body: &str) -> ApiError {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => {
            let message = value
                .get("error")
                .and_then(serde_json::Value::as_str)
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP error! status: {status}"));
            ApiError::http(status, message)
        }
        Err(_) => ApiError::http(status, FALLBACK_ERROR_MESSAGE),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl ApiClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = match lookup("LEXMARKET_API_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
        {
            Some(url) => url,
            None => {
                warn!(
                    default = DEFAULT_API_BASE_URL,
                    "LEXMARKET_API_URL is not set, using default"
                );
                DEFAULT_API_BASE_URL.to_string()
            }
        };
        let timeout_ms = lookup("LEXMARKET_API_TIMEOUT_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| (100..=120_000).contains(v))
            .unwrap_or(API_TIMEOUT_MS_DEFAULT);
        Self {
            base_url,
            timeout_ms,
            user_agent: format!("lexmarket-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn url_for(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }
}

pub trait AuthApi {
    fn login(&self, input: &LoginInput) -> Result<AuthResponse, ApiError>;
    fn signup(&self, input: &SignupInput) -> Result<AuthResponse, ApiError>;
    fn get_profile(&self, token: &SessionToken) -> Result<UserProfile, ApiError>;
}

pub trait QuoteApi {
    fn accept_quote(
        &self,
        token: &SessionToken,
        quote_id: &QuoteId,
    ) -> Result<AcceptQuoteResult, ApiError>;
}

/// Client-side case writes and file access.
pub trait CaseApi {
    fn create_case(&self, token: &SessionToken, input: &CreateCaseInput)
        -> Result<CaseRecord, ApiError>;
    fn get_file_download_url(&self, token: &SessionToken, file_id: &FileId)
        -> Result<String, ApiError>;
}

/// Lawyer-side marketplace case detail and quote submission.
pub trait MarketplaceApi {
    fn get_marketplace_case(
        &self,
        token: &SessionToken,
        case_id: &CaseId,
    ) -> Result<MarketplaceCase, ApiError>;
    fn get_my_quote_for_case(
        &self,
        token: &SessionToken,
        case_id: &CaseId,
    ) -> Result<Option<LawyerQuote>, ApiError>;
    fn create_quote(
        &self,
        token: &SessionToken,
        case_id: &CaseId,
        input: &QuoteInput,
    ) -> Result<LawyerQuote, ApiError>;
    fn update_quote(
        &self,
        token: &SessionToken,
        case_id: &CaseId,
        input: &QuoteInput,
    ) -> Result<LawyerQuote, ApiError>;
}

// `/auth/profile` has shipped both bare and wrapped in `{ "user": ... }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ProfileEnvelope {
    Wrapped { user: UserProfile },
    Bare(UserProfile),
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    config: ApiClientConfig,
    agent: ureq::Agent,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> Self {
        let timeout = Duration::from_millis(config.timeout_ms.max(100));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(&config.user_agent)
            .build();
        Self { config, agent }
    }

    pub fn from_env() -> Self {
        Self::new(ApiClientConfig::from_env())
    }

    pub fn config(&self) -> &ApiClientConfig {
        &self.config
    }

    pub fn get_my_cases(&self, token: &SessionToken) -> Result<Vec<CaseSummary>, ApiError> {
        let page: ListEnvelope<CaseSummary> = self.get("/client/cases", Some(token))?;
        Ok(page.data)
    }

    pub fn get_case(&self, token: &SessionToken, case_id: &CaseId) -> Result<CaseRecord, ApiError> {
        self.get(&format!("/client/cases/{}", case_id.as_str()), Some(token))
    }

    pub fn get_marketplace_cases(
        &self,
        token: &SessionToken,
    ) -> Result<Vec<MarketplaceCase>, ApiError> {
        let page: ListEnvelope<MarketplaceCase> = self.get("/lawyer/marketplace", Some(token))?;
        Ok(page.data)
    }

    pub fn get_my_quotes(&self, token: &SessionToken) -> Result<Vec<LawyerQuote>, ApiError> {
        let page: ListEnvelope<LawyerQuote> = self.get("/lawyer/quotes", Some(token))?;
        Ok(page.data)
    }

    fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        token: Option<&SessionToken>,
    ) -> Result<T, ApiError> {
        self.send::<(), T>("GET", endpoint, token, None)
    }

    fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        endpoint: &str,
        token: Option<&SessionToken>,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let url = self.config.url_for(endpoint);
        let mut req = self
            .agent
            .request(method, &url)
            .set("Content-Type", "application/json")
            .set("Accept", "application/json");
        if let Some(token) = token {
            req = req.set("Authorization", &format!("Bearer {}", token.expose()));
        }

        let result = match body {
            Some(body) => {
                let payload = serde_json::to_string(body)
                    .map_err(|e| ApiError::decode(format!("request encode failed: {e}")))?;
                req.send_string(&payload)
            }
            None => req.call(),
        };

        match result {
            Ok(resp) => {
                let status = resp.status();
                debug!(method, endpoint, status, "api request succeeded");
                let raw = resp
                    .into_string()
                    .map_err(|e| ApiError::transport(format!("response read failed: {e}")))?;
                serde_json::from_str::<T>(&raw)
                    .map_err(|e| ApiError::decode(format!("response decode failed: {e}")))
            }
            Err(ureq::Error::Status(status, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                let err = error_from_response(status, &body);
                debug!(method, endpoint, status, error = %err, "api request rejected");
                Err(err)
            }
            Err(ureq::Error::Transport(transport)) => {
                let kind = classify_transport_error_kind(&format!(
                    "{:?} {}",
                    transport.kind(),
                    transport
                ));
                warn!(method, endpoint, kind, "api transport failure");
                Err(ApiError::transport(format!("Network error ({kind})")))
            }
        }
    }
}

impl AuthApi for ApiClient {
    fn login(&self, input: &LoginInput) -> Result<AuthResponse, ApiError> {
        input.validate()?;
        self.send("POST", "/auth/login", None, Some(input))
    }

    fn signup(&self, input: &SignupInput) -> Result<AuthResponse, ApiError> {
        input.validate()?;
        let endpoint = match input.role {
            Role::Lawyer => "/auth/signup/lawyer",
            Role::Client => "/auth/signup/client",
        };
        self.send("POST", endpoint, None, Some(input))
    }

    fn get_profile(&self, token: &SessionToken) -> Result<UserProfile, ApiError> {
        let envelope: ProfileEnvelope = self.get("/auth/profile", Some(token))?;
        Ok(match envelope {
            ProfileEnvelope::Wrapped { user } => user,
            ProfileEnvelope::Bare(user) => user,
        })
    }
}

impl QuoteApi for ApiClient {
    fn accept_quote(
        &self,
        token: &SessionToken,
        quote_id: &QuoteId,
    ) -> Result<AcceptQuoteResult, ApiError> {
        let body = AcceptQuoteInput {
            quote_id: quote_id.clone(),
        };
        self.send("POST", "/client/quotes/accept", Some(token), Some(&body))
    }
}

impl CaseApi for ApiClient {
    fn create_case(
        &self,
        token: &SessionToken,
        input: &CreateCaseInput,
    ) -> Result<CaseRecord, ApiError> {
        input.validate()?;
        self.send("POST", "/client/cases", Some(token), Some(input))
    }

    fn get_file_download_url(
        &self,
        token: &SessionToken,
        file_id: &FileId,
    ) -> Result<String, ApiError> {
        let out: FileDownload =
            self.get(&format!("/files/{}/download", file_id.as_str()), Some(token))?;
        Ok(out.download_url)
    }
}

impl MarketplaceApi for ApiClient {
    fn get_marketplace_case(
        &self,
        token: &SessionToken,
        case_id: &CaseId,
    ) -> Result<MarketplaceCase, ApiError> {
        self.get(
            &format!("/lawyer/marketplace/cases/{}", case_id.as_str()),
            Some(token),
        )
    }

    fn get_my_quote_for_case(
        &self,
        token: &SessionToken,
        case_id: &CaseId,
    ) -> Result<Option<LawyerQuote>, ApiError> {
        let out: MyQuoteForCase = self.get(
            &format!("/lawyer/marketplace/cases/{}/quotes/my", case_id.as_str()),
            Some(token),
        )?;
        Ok(out.quote)
    }

    fn create_quote(
        &self,
        token: &SessionToken,
        case_id: &CaseId,
        input: &QuoteInput,
    ) -> Result<LawyerQuote, ApiError> {
        input.validate()?;
        self.send("POST", &quotes_endpoint(case_id), Some(token), Some(input))
    }

    fn update_quote(
        &self,
        token: &SessionToken,
        case_id: &CaseId,
        input: &QuoteInput,
    ) -> Result<LawyerQuote, ApiError> {
        input.validate()?;
        self.send("PUT", &quotes_endpoint(case_id), Some(token), Some(input))
    }
}

fn quotes_endpoint(case_id: &CaseId) -> String {
    format!("/lawyer/marketplace/cases/{}/quotes", case_id.as_str())
}

fn classify_transport_error_kind(raw: &str) -> &'static str {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("tls") || lower.contains("ssl") {
        "tls"
    } else if lower.contains("dns") {
        "dns"
    } else if lower.contains("connection") || lower.contains("connect") {
        "connection"
    } else {
        "transport"
    }
}
