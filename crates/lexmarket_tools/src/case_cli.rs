#![forbid(unsafe_code)]

use lexmarket_engines::api_client::{CaseApi, MarketplaceApi, QuoteApi};
use lexmarket_kernel_contracts::case::{
    CaseId, CaseRecord, CaseStatus, CaseSummary, CreateCaseInput, FileId, LawyerQuote,
    MarketplaceCase, QuoteId, QuoteInput, QuoteStatus,
};
use lexmarket_kernel_contracts::session::SessionToken;
use lexmarket_os::quote_acceptance::accept_quote_for_case;
use tracing::warn;

pub fn render_cases(cases: &[CaseSummary]) -> String {
    if cases.is_empty() {
        return "no cases yet".to_string();
    }
    cases
        .iter()
        .map(|c| {
            format!(
                "{}\t{}\t{}\t{} quote(s)\t{}",
                c.id,
                c.status.as_str(),
                c.category,
                c.quotes_count,
                c.title
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_case(case: &CaseRecord) -> String {
    let mut out = format!(
        "{} [{}] {}\ncategory: {}",
        case.id,
        case.status.as_str(),
        case.title,
        case.category
    );
    if !case.description.is_empty() {
        out.push_str(&format!("\n\n{}", case.description));
    }
    out.push_str(&format!("\n\nquotes ({}):", case.quotes.len()));
    for q in &case.quotes {
        out.push_str(&format!(
            "\n  {}\t{}\t{} in {} day(s)\t{}",
            q.id,
            q.status.as_str(),
            q.amount,
            q.expected_days,
            q.lawyer_name.as_deref().unwrap_or("-")
        ));
    }
    if !case.files.is_empty() {
        out.push_str(&format!("\n\nfiles ({}):", case.files.len()));
        for f in &case.files {
            out.push_str(&format!(
                "\n  {}\t{}\t{:.2} KB",
                f.id,
                f.file_name,
                f.file_size as f64 / 1024.0
            ));
        }
    }
    out
}

pub fn render_marketplace(cases: &[MarketplaceCase]) -> String {
    if cases.is_empty() {
        return "no open cases".to_string();
    }
    cases
        .iter()
        .map(|c| {
            let marker = if c.has_submitted { "quoted" } else { "new" };
            format!("{}\t{}\t{}\t{}", c.id, marker, c.category, c.title)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_quotes(quotes: &[LawyerQuote]) -> String {
    if quotes.is_empty() {
        return "no quotes submitted".to_string();
    }
    quotes
        .iter()
        .map(|q| {
            format!(
                "{}\t{}\t{} in {} day(s)\t{}",
                q.id,
                q.status.as_str(),
                q.amount,
                q.expected_days,
                q.case_title.as_deref().unwrap_or("-")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn execute_accept_quote(
    api: &dyn QuoteApi,
    token: &SessionToken,
    case: &CaseRecord,
    quote_id: &QuoteId,
) -> Result<String, String> {
    let redirect = accept_quote_for_case(api, token, case, quote_id).map_err(|e| e.to_string())?;
    let mut out = format!("Complete payment at: {}", redirect.payment_url);
    if let Some(location) = redirect.return_location {
        out.push_str(&format!(
            "\nThen watch for confirmation with: lexmarket watch-payment '{location}'"
        ));
    }
    Ok(out)
}

pub fn execute_create_case(
    api: &dyn CaseApi,
    token: &SessionToken,
    title: &str,
    category: &str,
    description: &str,
) -> Result<String, String> {
    let input = CreateCaseInput::v1(title, category, description).map_err(|e| e.to_string())?;
    let case = api.create_case(token, &input).map_err(|e| e.to_string())?;
    Ok(format!(
        "Created case {} [{}]\nOpen it with: lexmarket case {}",
        case.id,
        case.status.as_str(),
        case.id
    ))
}

pub fn execute_file_url(
    api: &dyn CaseApi,
    token: &SessionToken,
    file_id: &FileId,
) -> Result<String, String> {
    api.get_file_download_url(token, file_id)
        .map_err(|e| e.to_string())
}

/// A marketplace case plus the lawyer's own quote on it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketplaceCaseView {
    pub case: MarketplaceCase,
    pub my_quote: Option<LawyerQuote>,
}

impl MarketplaceCaseView {
    pub fn can_submit_quote(&self) -> bool {
        self.case.can_submit_quote(self.my_quote.as_ref())
    }
}

/// The own-quote lookup only runs once the case says a quote exists; a failed
/// lookup leaves the case readable.
pub fn load_marketplace_case(
    api: &dyn MarketplaceApi,
    token: &SessionToken,
    case_id: &CaseId,
) -> Result<MarketplaceCaseView, String> {
    let case = api
        .get_marketplace_case(token, case_id)
        .map_err(|e| e.to_string())?;
    let my_quote = if case.has_submitted {
        match api.get_my_quote_for_case(token, case_id) {
            Ok(quote) => quote,
            Err(err) => {
                warn!(case_id = %case_id, error = %err, "own quote lookup failed");
                None
            }
        }
    } else {
        None
    };
    Ok(MarketplaceCaseView { case, my_quote })
}

pub fn render_marketplace_case(view: &MarketplaceCaseView) -> String {
    let case = &view.case;
    let status = case.status.map_or("-", CaseStatus::as_str);
    let mut out = format!(
        "{} [{}] {}\ncategory: {}",
        case.id, status, case.title, case.category
    );
    if !case.description.is_empty() {
        out.push_str(&format!("\n\n{}", case.description));
    }
    if case.can_view_full_details() {
        out.push_str(&format!("\n\nfiles ({}):", case.files.len()));
        for f in &case.files {
            out.push_str(&format!("\n  {}\t{}", f.id, f.file_name));
        }
    } else {
        out.push_str("\n\nDescription is anonymized. Full details and files will be available after your quote is accepted and payment is completed.");
    }

    if let Some(q) = &view.my_quote {
        out.push_str(&format!(
            "\n\nyour quote: {}\t{}\t{} in {} day(s)",
            q.id,
            q.status.as_str(),
            q.amount,
            q.expected_days
        ));
        if let Some(note) = q.note.as_deref().filter(|n| !n.is_empty()) {
            out.push_str(&format!("\n  {note}"));
        }
    }

    if view.can_submit_quote() {
        out.push_str(if case.has_submitted {
            "\n\nYou can update your quote until the case is engaged: lexmarket quote <case> --amount .. --days .."
        } else {
            "\n\nSubmit a quote with: lexmarket quote <case> --amount .. --days .."
        });
    } else if view.my_quote.as_ref().is_some_and(|q| q.status == QuoteStatus::Accepted) {
        out.push_str(if case.status == Some(CaseStatus::Engaged) {
            "\n\nYour quote has been accepted. The case is now in progress."
        } else {
            "\n\nYour quote has been accepted. Waiting for payment to begin work."
        });
    } else {
        out.push_str("\n\nQuote Already Submitted");
    }
    out
}

/// Submits a new quote, or updates the existing one while the case still
/// allows it.
pub fn execute_submit_quote(
    api: &dyn MarketplaceApi,
    token: &SessionToken,
    case_id: &CaseId,
    amount: f64,
    expected_days: u32,
    note: &str,
) -> Result<String, String> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err("Amount must be greater than 0".to_string());
    }
    if expected_days == 0 {
        return Err("Expected days must be greater than 0".to_string());
    }
    let input = QuoteInput::v1(amount, expected_days, note).map_err(|e| e.to_string())?;

    let view = load_marketplace_case(api, token, case_id)?;
    if !view.can_submit_quote() {
        return Err("Your quote for this case can no longer be changed".to_string());
    }
    let (quote, verb) = if view.case.has_submitted && view.my_quote.is_some() {
        (api.update_quote(token, case_id, &input), "updated")
    } else {
        (api.create_quote(token, case_id, &input), "submitted")
    };
    let quote = quote.map_err(|e| e.to_string())?;
    Ok(format!(
        "Quote {verb}: {}\t{} in {} day(s)",
        quote.id, quote.amount, quote.expected_days
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexmarket_engines::api_client::{ApiError, ApiErrorKind};
    use lexmarket_kernel_contracts::case::AcceptQuoteResult;
    use std::cell::RefCell;

    fn case_json() -> &'static str {
        r#"{
            "id": "c1",
            "title": "Tenancy deposit",
            "category": "property",
            "description": "Landlord kept the deposit.",
            "status": "open",
            "quotes": [
                {"id": "q1", "lawyer_name": "Lee", "amount": 450, "expected_days": 10, "status": "proposed"}
            ],
            "files": [
                {"id": "f1", "file_name": "lease.pdf", "file_size": 2048}
            ]
        }"#
    }

    struct LinkApi;

    impl QuoteApi for LinkApi {
        fn accept_quote(
            &self,
            _token: &SessionToken,
            _quote_id: &QuoteId,
        ) -> Result<AcceptQuoteResult, ApiError> {
            Ok(AcceptQuoteResult {
                payment_link_url: Some("https://pay.example.com/plink_5".to_string()),
                payment_link_id: Some("plink_5".to_string()),
                client_secret: None,
            })
        }
    }

    #[test]
    fn at_case_cli_01_case_rendering_includes_quotes_and_files() {
        let case: CaseRecord = serde_json::from_str(case_json()).unwrap();
        let out = render_case(&case);
        assert!(out.starts_with("c1 [open] Tenancy deposit"));
        assert!(out.contains("q1\tproposed\t450 in 10 day(s)\tLee"));
        assert!(out.contains("lease.pdf\t2.00 KB"));
        assert_eq!(render_cases(&[]), "no cases yet");
    }

    #[test]
    fn at_case_cli_02_accept_prints_payment_link_and_return_location() {
        let case: CaseRecord = serde_json::from_str(case_json()).unwrap();
        let token = SessionToken::new("tok").unwrap();
        let out = execute_accept_quote(&LinkApi, &token, &case, &QuoteId::new("q1").unwrap()).unwrap();
        assert!(out.contains("https://pay.example.com/plink_5"));
        assert!(out.contains("/client/cases/c1/payment/processing?payment_link_id=plink_5"));

        let mut closed = case.clone();
        closed.status = CaseStatus::Closed;
        assert_eq!(
            execute_accept_quote(&LinkApi, &token, &closed, &QuoteId::new("q1").unwrap()).unwrap_err(),
            "This case is no longer open for quotes"
        );
    }

    struct DeskApi {
        case: MarketplaceCase,
        my_quote: Option<LawyerQuote>,
        quote_lookup_fails: bool,
        calls: RefCell<Vec<String>>,
    }

    impl DeskApi {
        fn new(case_json: &str, my_quote: Option<&str>) -> Self {
            Self {
                case: serde_json::from_str(case_json).unwrap(),
                my_quote: my_quote.map(|q| serde_json::from_str(q).unwrap()),
                quote_lookup_fails: false,
                calls: RefCell::new(Vec::new()),
            }
        }

        fn echo(&self, input: &QuoteInput) -> LawyerQuote {
            LawyerQuote {
                id: QuoteId::new("q_new").unwrap(),
                case_id: Some(self.case.id.clone()),
                case_title: None,
                case_category: None,
                case_status: None,
                amount: input.amount.clone(),
                expected_days: input.expected_days,
                note: Some(input.note.clone()),
                status: QuoteStatus::Proposed,
            }
        }
    }

    impl MarketplaceApi for DeskApi {
        fn get_marketplace_case(
            &self,
            _token: &SessionToken,
            _case_id: &CaseId,
        ) -> Result<MarketplaceCase, ApiError> {
            self.calls.borrow_mut().push("case".to_string());
            Ok(self.case.clone())
        }

        fn get_my_quote_for_case(
            &self,
            _token: &SessionToken,
            _case_id: &CaseId,
        ) -> Result<Option<LawyerQuote>, ApiError> {
            self.calls.borrow_mut().push("my_quote".to_string());
            if self.quote_lookup_fails {
                return Err(ApiError {
                    kind: ApiErrorKind::Http,
                    status: Some(500),
                    message: "boom".to_string(),
                });
            }
            Ok(self.my_quote.clone())
        }

        fn create_quote(
            &self,
            _token: &SessionToken,
            _case_id: &CaseId,
            input: &QuoteInput,
        ) -> Result<LawyerQuote, ApiError> {
            self.calls.borrow_mut().push("create".to_string());
            Ok(self.echo(input))
        }

        fn update_quote(
            &self,
            _token: &SessionToken,
            _case_id: &CaseId,
            input: &QuoteInput,
        ) -> Result<LawyerQuote, ApiError> {
            self.calls.borrow_mut().push("update".to_string());
            Ok(self.echo(input))
        }
    }

    const FRESH_CASE: &str =
        r#"{"id":"m1","title":"Unpaid invoice","category":"commercial","description":"Client owes 3k.","status":"open","has_submitted":false}"#;
    const QUOTED_CASE: &str =
        r#"{"id":"m1","title":"Unpaid invoice","category":"commercial","description":"Client owes 3k.","status":"open","has_submitted":true}"#;
    const MY_QUOTE: &str =
        r#"{"id":"q7","amount":"1200.00","expected_days":14,"note":"Fixed fee","status":"proposed"}"#;
    const MY_ACCEPTED_QUOTE: &str =
        r#"{"id":"q7","amount":"1200.00","expected_days":14,"status":"accepted"}"#;

    fn case_id() -> CaseId {
        CaseId::new("m1").unwrap()
    }

    fn token() -> SessionToken {
        SessionToken::new("tok").unwrap()
    }

    struct FileDesk;

    impl CaseApi for FileDesk {
        fn create_case(
            &self,
            _token: &SessionToken,
            input: &CreateCaseInput,
        ) -> Result<CaseRecord, ApiError> {
            Ok(CaseRecord {
                id: CaseId::new("c_new").unwrap(),
                title: input.title.clone(),
                category: input.category.clone(),
                description: input.description.clone(),
                status: CaseStatus::Open,
                created_at: None,
                quotes: Vec::new(),
                files: Vec::new(),
            })
        }

        fn get_file_download_url(
            &self,
            _token: &SessionToken,
            file_id: &FileId,
        ) -> Result<String, ApiError> {
            Ok(format!("https://files.example.com/{file_id}?sig=abc"))
        }
    }

    #[test]
    fn at_case_cli_03_create_case_validates_then_reports_new_id() {
        let out = execute_create_case(&FileDesk, &token(), " Deposit ", "property", "Kept it").unwrap();
        assert!(out.starts_with("Created case c_new [open]"));
        assert!(out.ends_with("lexmarket case c_new"));
        assert!(execute_create_case(&FileDesk, &token(), "", "property", "x").is_err());
    }

    #[test]
    fn at_case_cli_04_file_url_returns_signed_link() {
        let url = execute_file_url(&FileDesk, &token(), &FileId::new("f9").unwrap()).unwrap();
        assert_eq!(url, "https://files.example.com/f9?sig=abc");
    }

    #[test]
    fn at_case_cli_05_first_quote_is_created_without_own_quote_lookup() {
        let api = DeskApi::new(FRESH_CASE, None);
        let out = execute_submit_quote(&api, &token(), &case_id(), 950.5, 10, "Can start Monday").unwrap();
        assert_eq!(out, "Quote submitted: q_new\t950.5 in 10 day(s)");
        assert_eq!(*api.calls.borrow(), vec!["case".to_string(), "create".to_string()]);
    }

    #[test]
    fn at_case_cli_06_existing_quote_is_updated() {
        let api = DeskApi::new(QUOTED_CASE, Some(MY_QUOTE));
        let out = execute_submit_quote(&api, &token(), &case_id(), 1100.0, 12, "").unwrap();
        assert!(out.starts_with("Quote updated: "));
        assert_eq!(
            *api.calls.borrow(),
            vec!["case".to_string(), "my_quote".to_string(), "update".to_string()]
        );
    }

    #[test]
    fn at_case_cli_07_accepted_quote_cannot_change_and_bad_input_is_refused_early() {
        let api = DeskApi::new(QUOTED_CASE, Some(MY_ACCEPTED_QUOTE));
        assert_eq!(
            execute_submit_quote(&api, &token(), &case_id(), 1.0, 1, "").unwrap_err(),
            "Your quote for this case can no longer be changed"
        );

        let api = DeskApi::new(FRESH_CASE, None);
        assert_eq!(
            execute_submit_quote(&api, &token(), &case_id(), 0.0, 5, "").unwrap_err(),
            "Amount must be greater than 0"
        );
        assert_eq!(
            execute_submit_quote(&api, &token(), &case_id(), 10.0, 0, "").unwrap_err(),
            "Expected days must be greater than 0"
        );
        assert!(api.calls.borrow().is_empty());
    }

    #[test]
    fn at_case_cli_08_marketplace_case_view_follows_quote_state() {
        let api = DeskApi::new(FRESH_CASE, None);
        let out = render_marketplace_case(&load_marketplace_case(&api, &token(), &case_id()).unwrap());
        assert!(out.starts_with("m1 [open] Unpaid invoice"));
        assert!(out.contains("Description is anonymized."));
        assert!(out.ends_with("Submit a quote with: lexmarket quote <case> --amount .. --days .."));

        let api = DeskApi::new(QUOTED_CASE, Some(MY_QUOTE));
        let out = render_marketplace_case(&load_marketplace_case(&api, &token(), &case_id()).unwrap());
        assert!(out.contains("your quote: q7\tproposed\t1200.00 in 14 day(s)\n  Fixed fee"));
        assert!(out.contains("You can update your quote until the case is engaged"));

        let api = DeskApi::new(QUOTED_CASE, Some(MY_ACCEPTED_QUOTE));
        let out = render_marketplace_case(&load_marketplace_case(&api, &token(), &case_id()).unwrap());
        assert!(out.ends_with("Your quote has been accepted. Waiting for payment to begin work."));
    }

    #[test]
    fn at_case_cli_09_failed_own_quote_lookup_keeps_case_readable() {
        let mut api = DeskApi::new(QUOTED_CASE, Some(MY_QUOTE));
        api.quote_lookup_fails = true;
        let view = load_marketplace_case(&api, &token(), &case_id()).unwrap();
        assert_eq!(view.my_quote, None);
        assert!(!view.can_submit_quote());
        assert!(render_marketplace_case(&view).ends_with("Quote Already Submitted"));
    }
}
