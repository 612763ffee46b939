#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::case::CaseId;
use crate::common::validate_path_token;
use crate::{ContractViolation, ReasonCodeId, Validate};

/// Query parameter the hosted payment page appends when it sends the client
/// back to the processing screen.
pub const PAYMENT_LINK_QUERY_PARAM: &str = "payment_link_id";

/// Event the backend publishes on the transaction channel once the payment
/// provider has confirmed the payment.
pub const PAYMENT_COMPLETED_EVENT: &str = "payment-completed";

pub const PAYMENT_CHANNEL_PREFIX: &str = "payment-";

/// Opaque identifier minted by the payment provider for one payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionRef(String);

impl TransactionRef {
    pub fn new(raw: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(raw.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for TransactionRef {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_path_token("transaction_ref", &self.0, 128)
    }
}

/// Channel the backend publishes completion on. Both sides derive it from the
/// transaction reference alone, so it must stay byte-for-byte `payment-<ref>`.
pub fn payment_channel_name(transaction_ref: &TransactionRef) -> String {
    format!("{PAYMENT_CHANNEL_PREFIX}{}", transaction_ref.as_str())
}

/// Data carried by the completion event. Treated as untrusted: only the
/// presence of `case_id` and `payment_status` is checked, everything else is
/// kept for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionPayload {
    pub case_id: CaseId,
    pub payment_status: String,
    pub extra: BTreeMap<String, Value>,
}

impl CompletionPayload {
    pub fn from_json(data: &Value) -> Result<Self, ContractViolation> {
        let Some(obj) = data.as_object() else {
            return Err(ContractViolation::InvalidValue {
                field: "completion_payload",
                reason: "must be a JSON object",
            });
        };

        let case_id = match obj.get("case_id") {
            Some(Value::String(s)) => CaseId::new(s.clone())?,
            Some(Value::Number(n)) => CaseId::new(n.to_string())?,
            Some(Value::Null) | None => {
                return Err(ContractViolation::MissingField {
                    field: "completion_payload.case_id",
                })
            }
            Some(_) => {
                return Err(ContractViolation::InvalidValue {
                    field: "completion_payload.case_id",
                    reason: "must be a string or number",
                })
            }
        };

        let payment_status = match obj.get("payment_status") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::String(_)) | Some(Value::Null) | None => {
                return Err(ContractViolation::MissingField {
                    field: "completion_payload.payment_status",
                })
            }
            Some(_) => {
                return Err(ContractViolation::InvalidValue {
                    field: "completion_payload.payment_status",
                    reason: "must be a string",
                })
            }
        };

        let extra = obj
            .iter()
            .filter(|(k, _)| k.as_str() != "case_id" && k.as_str() != "payment_status")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            case_id,
            payment_status,
            extra,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherState {
    Processing,
    Success,
    Failed,
}

impl WatcherState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Processing)
    }
}

pub mod reason_codes {
    use crate::ReasonCodeId;

    pub const PAYMENT_WATCH_MISSING_TRANSACTION_REF: ReasonCodeId = ReasonCodeId(0x5041_00F1);
    pub const PAYMENT_WATCH_MISSING_REALTIME_CONFIG: ReasonCodeId = ReasonCodeId(0x5041_00F2);
    pub const PAYMENT_WATCH_REALTIME_UNAVAILABLE: ReasonCodeId = ReasonCodeId(0x5041_00F3);
    pub const PAYMENT_WATCH_INCOMPLETE_PAYLOAD: ReasonCodeId = ReasonCodeId(0x5041_00F4);
    pub const PAYMENT_WATCH_TIMED_OUT: ReasonCodeId = ReasonCodeId(0x5041_00F5);
}

/// Every way a payment watch can end in `failed`. All are terminal, local and
/// recovered from only by navigating to the case manually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentWatchFailure {
    MissingTransactionRef,
    MissingRealtimeConfig,
    RealtimeUnavailable,
    IncompletePayload,
    TimedOut,
}

impl PaymentWatchFailure {
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::MissingTransactionRef => "Payment link ID is missing",
            Self::MissingRealtimeConfig => "Real-time payment updates are not configured",
            Self::RealtimeUnavailable => {
                "Could not connect to real-time payment updates. Please check your case details."
            }
            Self::IncompletePayload => {
                "Payment confirmation arrived without its case details. Please check your case details or contact support."
            }
            Self::TimedOut => {
                "Payment processing is taking longer than expected. Please check your case details or refresh the page."
            }
        }
    }

    pub const fn reason_code(self) -> ReasonCodeId {
        match self {
            Self::MissingTransactionRef => reason_codes::PAYMENT_WATCH_MISSING_TRANSACTION_REF,
            Self::MissingRealtimeConfig => reason_codes::PAYMENT_WATCH_MISSING_REALTIME_CONFIG,
            Self::RealtimeUnavailable => reason_codes::PAYMENT_WATCH_REALTIME_UNAVAILABLE,
            Self::IncompletePayload => reason_codes::PAYMENT_WATCH_INCOMPLETE_PAYLOAD,
            Self::TimedOut => reason_codes::PAYMENT_WATCH_TIMED_OUT,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingTransactionRef => "missing_transaction_ref",
            Self::MissingRealtimeConfig => "missing_realtime_config",
            Self::RealtimeUnavailable => "realtime_unavailable",
            Self::IncompletePayload => "incomplete_payload",
            Self::TimedOut => "timed_out",
        }
    }
}
