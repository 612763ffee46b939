#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use url::{form_urlencoded, Url};

use crate::case::CaseId;
use crate::payment::{TransactionRef, PAYMENT_LINK_QUERY_PARAM};
use crate::session::Role;
use crate::ContractViolation;

// Base used to resolve app-relative locations; never dialed.
const LOCATION_BASE: &str = "http://app.invalid";

/// Screen table of the client. Paths are the browser routes the backend and
/// the hosted payment page link to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AppRoute {
    Landing,
    SignupClient,
    SignupLawyer,
    Login,
    ClientDashboard,
    ClientCaseNew,
    ClientCase(CaseId),
    ClientPaymentProcessing(CaseId),
    LawyerMarketplace,
    LawyerMarketplaceCase(CaseId),
    LawyerMyQuotes,
}

impl AppRoute {
    /// Matches a path against the route table. Unknown paths yield `None`.
    pub fn parse(path: &str) -> Option<Self> {
        let trimmed = path.trim();
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        let segments: Vec<&str> = trimmed
            .trim_start_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let id = |raw: &str| CaseId::new(raw).ok();
        match segments.as_slice() {
            [] => Some(Self::Landing),
            ["signup", "client"] => Some(Self::SignupClient),
            ["signup", "lawyer"] => Some(Self::SignupLawyer),
            ["login"] => Some(Self::Login),
            ["client", "dashboard"] => Some(Self::ClientDashboard),
            ["client", "cases", "new"] => Some(Self::ClientCaseNew),
            ["client", "cases", raw] => id(*raw).map(Self::ClientCase),
            ["client", "cases", raw, "payment", "processing"] => {
                id(*raw).map(Self::ClientPaymentProcessing)
            }
            ["lawyer", "marketplace"] => Some(Self::LawyerMarketplace),
            ["lawyer", "marketplace", "cases", raw] => id(*raw).map(Self::LawyerMarketplaceCase),
            ["lawyer", "my-quotes"] => Some(Self::LawyerMyQuotes),
            _ => None,
        }
    }

    /// Like [`AppRoute::parse`], but unknown paths fall back to the landing
    /// screen (the catch-all redirect).
    pub fn resolve(path: &str) -> Self {
        Self::parse(path).unwrap_or(Self::Landing)
    }

    pub fn path(&self) -> String {
        match self {
            Self::Landing => "/".to_string(),
            Self::SignupClient => "/signup/client".to_string(),
            Self::SignupLawyer => "/signup/lawyer".to_string(),
            Self::Login => "/login".to_string(),
            Self::ClientDashboard => "/client/dashboard".to_string(),
            Self::ClientCaseNew => "/client/cases/new".to_string(),
            Self::ClientCase(id) => format!("/client/cases/{}", id.as_str()),
            Self::ClientPaymentProcessing(id) => {
                format!("/client/cases/{}/payment/processing", id.as_str())
            }
            Self::LawyerMarketplace => "/lawyer/marketplace".to_string(),
            Self::LawyerMarketplaceCase(id) => {
                format!("/lawyer/marketplace/cases/{}", id.as_str())
            }
            Self::LawyerMyQuotes => "/lawyer/my-quotes".to_string(),
        }
    }

    pub const fn required_role(&self) -> Option<Role> {
        match self {
            Self::Landing | Self::SignupClient | Self::SignupLawyer | Self::Login => None,
            Self::ClientDashboard
            | Self::ClientCaseNew
            | Self::ClientCase(_)
            | Self::ClientPaymentProcessing(_) => Some(Role::Client),
            Self::LawyerMarketplace | Self::LawyerMarketplaceCase(_) | Self::LawyerMyQuotes => {
                Some(Role::Lawyer)
            }
        }
    }

    pub const fn home_for(role: Role) -> Self {
        match role {
            Role::Client => Self::ClientDashboard,
            Role::Lawyer => Self::LawyerMarketplace,
        }
    }

    /// Location the hosted payment page returns the client to.
    pub fn payment_processing_location(case_id: &CaseId, transaction_ref: &TransactionRef) -> String {
        let encoded: String = form_urlencoded::byte_serialize(transaction_ref.as_str().as_bytes()).collect();
        format!(
            "{}?{PAYMENT_LINK_QUERY_PARAM}={encoded}",
            Self::ClientPaymentProcessing(case_id.clone()).path()
        )
    }
}

impl fmt::Display for AppRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// A location split into the resolved route and its query parameters, read
/// once when a screen mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationState {
    pub route: AppRoute,
    pub matched: bool,
    pub query: BTreeMap<String, String>,
}

impl NavigationState {
    pub fn parse(location: &str) -> Result<Self, ContractViolation> {
        let location = location.trim();
        let url = if location.starts_with("http://") || location.starts_with("https://") {
            Url::parse(location)
        } else {
            Url::parse(LOCATION_BASE).and_then(|base| base.join(location))
        }
        .map_err(|_| ContractViolation::InvalidValue {
            field: "navigation.location",
            reason: "must be an app path or absolute URL",
        })?;

        let parsed = AppRoute::parse(url.path());
        let mut query = BTreeMap::new();
        for (k, v) in url.query_pairs() {
            // First occurrence wins, as URLSearchParams.get does.
            query.entry(k.into_owned()).or_insert_with(|| v.into_owned());
        }

        Ok(Self {
            matched: parsed.is_some(),
            route: parsed.unwrap_or(AppRoute::Landing),
            query,
        })
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Raw transaction reference from the navigation parameters, if any.
    /// Empty values count as absent.
    pub fn transaction_ref(&self) -> Option<&str> {
        self.query_param(PAYMENT_LINK_QUERY_PARAM)
            .filter(|v| !v.trim().is_empty())
    }
}
