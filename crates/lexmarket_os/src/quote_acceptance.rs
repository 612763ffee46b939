#![forbid(unsafe_code)]

use lexmarket_engines::api_client::{ApiError, QuoteApi};
use lexmarket_kernel_contracts::case::{CaseRecord, QuoteId};
use lexmarket_kernel_contracts::payment::TransactionRef;
use lexmarket_kernel_contracts::route::AppRoute;
use lexmarket_kernel_contracts::session::SessionToken;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum QuoteAcceptanceError {
    #[error("This case is no longer open for quotes")]
    CaseNotOpen,
    #[error("Payment link not received")]
    MissingPaymentLink,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Where to send the client to pay, and where the payment page will send
/// them back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRedirect {
    pub payment_url: String,
    pub transaction_ref: Option<TransactionRef>,
    pub return_location: Option<String>,
}

pub fn accept_quote_for_case(
    api: &dyn QuoteApi,
    token: &SessionToken,
    case: &CaseRecord,
    quote_id: &QuoteId,
) -> Result<PaymentRedirect, QuoteAcceptanceError> {
    if !case.status.accepts_quotes() {
        return Err(QuoteAcceptanceError::CaseNotOpen);
    }

    let result = api.accept_quote(token, quote_id)?;
    let payment_url = result
        .payment_link_url
        .as_deref()
        .map(str::trim)
        .filter(|u| {
            Url::parse(u)
                .map(|url| matches!(url.scheme(), "http" | "https"))
                .unwrap_or(false)
        })
        .map(str::to_string)
        .ok_or_else(|| {
            warn!(case_id = %case.id, quote_id = %quote_id, "accept-quote returned no usable payment link");
            QuoteAcceptanceError::MissingPaymentLink
        })?;

    let transaction_ref = result
        .payment_link_id
        .as_deref()
        .and_then(|raw| TransactionRef::new(raw).ok());
    let return_location = transaction_ref
        .as_ref()
        .map(|r| AppRoute::payment_processing_location(&case.id, r));

    info!(case_id = %case.id, quote_id = %quote_id, "quote accepted, awaiting payment");
    Ok(PaymentRedirect {
        payment_url,
        transaction_ref,
        return_location,
    })
}
