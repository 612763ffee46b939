#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use lexmarket_engines::api_client::{
    ApiClient, ApiClientConfig, ApiError, ApiErrorKind, AuthApi, CaseApi, MarketplaceApi,
};
use lexmarket_kernel_contracts::case::{CaseId, CreateCaseInput, FileId, QuoteInput};
use lexmarket_kernel_contracts::session::{Role, SessionToken};
use parking_lot::Mutex;
use serde_json::{json, Value};

const LIVE_TOKEN: &str = "tok_live";

#[derive(Debug, Clone)]
struct SeenRequest {
    method: Method,
    path: String,
    authorization: Option<String>,
    body: String,
}

type Seen = Arc<Mutex<Vec<SeenRequest>>>;

async fn backend(
    State(seen): State<Seen>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let authorized = authorization.as_deref() == Some("Bearer tok_live");
    seen.lock().push(SeenRequest {
        method: method.clone(),
        path: uri.path().to_string(),
        authorization,
        body: body.clone(),
    });

    if !authorized {
        return (StatusCode::UNAUTHORIZED, json!({"error": "Invalid token"}).to_string());
    }
    let sent: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    match (method, uri.path()) {
        (Method::GET, "/auth/profile") => (
            StatusCode::OK,
            json!({"user": {"id": "u_1", "email": "pat@example.com", "role": "lawyer"}}).to_string(),
        ),
        (Method::POST, "/client/cases") => (
            StatusCode::CREATED,
            json!({
                "id": "c_new",
                "title": sent["title"],
                "category": sent["category"],
                "description": sent["description"],
                "status": "open"
            })
            .to_string(),
        ),
        (Method::GET, "/lawyer/marketplace/cases/m1/quotes/my") => (
            StatusCode::OK,
            json!({"quote": {"id": "q7", "amount": "1200.00", "expected_days": 14, "status": "proposed"}})
                .to_string(),
        ),
        (Method::PUT, "/lawyer/marketplace/cases/m1/quotes") => (
            StatusCode::OK,
            json!({
                "id": "q7",
                "amount": sent["amount"],
                "expected_days": sent["expected_days"],
                "note": sent["note"],
                "status": "proposed"
            })
            .to_string(),
        ),
        (Method::GET, "/files/f1/download") => (
            StatusCode::OK,
            json!({"download_url": "https://files.example.com/f1?sig=abc"}).to_string(),
        ),
        (Method::GET, "/files/broken/download") => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "<html>upstream down</html>".to_string(),
        ),
        (Method::GET, "/lawyer/marketplace/cases/gone") => {
            (StatusCode::NOT_FOUND, json!({"error": "   "}).to_string())
        }
        _ => (StatusCode::NOT_FOUND, json!({"error": "Not found"}).to_string()),
    }
}

fn start_backend() -> (SocketAddr, Seen) {
    let seen: Seen = Arc::default();
    let app = Router::new().fallback(backend).with_state(Arc::clone(&seen));
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });
    (addr, seen)
}

fn client_for(addr: SocketAddr) -> ApiClient {
    ApiClient::new(ApiClientConfig {
        base_url: format!("http://{addr}"),
        timeout_ms: 5_000,
        user_agent: "lexmarket-tests".to_string(),
    })
}

fn live() -> SessionToken {
    SessionToken::new(LIVE_TOKEN).unwrap()
}

#[test]
fn at_api_http_01_bearer_token_is_sent_and_error_body_becomes_api_error() {
    let (addr, seen) = start_backend();
    let api = client_for(addr);

    let user = api.get_profile(&live()).unwrap();
    assert_eq!(user.email, "pat@example.com");
    assert_eq!(user.role, Role::Lawyer);

    let err = api.get_profile(&SessionToken::new("tok_stale").unwrap()).unwrap_err();
    assert_eq!(
        err,
        ApiError {
            kind: ApiErrorKind::Http,
            status: Some(401),
            message: "Invalid token".to_string(),
        }
    );

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].method, Method::GET);
    assert_eq!(seen[0].path, "/auth/profile");
    assert_eq!(seen[0].authorization.as_deref(), Some("Bearer tok_live"));
    assert_eq!(seen[1].authorization.as_deref(), Some("Bearer tok_stale"));
}

#[test]
fn at_api_http_02_case_and_quote_writes_reach_their_endpoints() {
    let (addr, seen) = start_backend();
    let api = client_for(addr);
    let case_id = CaseId::new("m1").unwrap();

    let input = CreateCaseInput::v1("Unpaid invoice", "commercial", "Client owes 3k.").unwrap();
    let created = api.create_case(&live(), &input).unwrap();
    assert_eq!(created.id.as_str(), "c_new");
    assert_eq!(created.title, "Unpaid invoice");

    let mine = api.get_my_quote_for_case(&live(), &case_id).unwrap().unwrap();
    assert_eq!(mine.id.as_str(), "q7");

    let updated = api
        .update_quote(&live(), &case_id, &QuoteInput::v1(950.0, 7, "Fixed fee").unwrap())
        .unwrap();
    assert_eq!(updated.amount, "950");
    assert_eq!(updated.expected_days, 7);

    let url = api
        .get_file_download_url(&live(), &FileId::new("f1").unwrap())
        .unwrap();
    assert_eq!(url, "https://files.example.com/f1?sig=abc");

    let seen = seen.lock();
    let post: Value = serde_json::from_str(&seen[0].body).unwrap();
    assert_eq!((&seen[0].method, seen[0].path.as_str()), (&Method::POST, "/client/cases"));
    assert_eq!(post["title"], "Unpaid invoice");
    let put: Value = serde_json::from_str(&seen[2].body).unwrap();
    assert_eq!(
        (&seen[2].method, seen[2].path.as_str()),
        (&Method::PUT, "/lawyer/marketplace/cases/m1/quotes")
    );
    assert_eq!(put, json!({"amount": "950", "expected_days": 7, "note": "Fixed fee"}));
    assert!(seen.iter().all(|r| r.authorization.as_deref() == Some("Bearer tok_live")));
}

#[test]
fn at_api_http_03_unreadable_errors_fall_back_and_transport_failures_are_classified() {
    let (addr, _seen) = start_backend();
    let api = client_for(addr);

    let err = api
        .get_file_download_url(&live(), &FileId::new("broken").unwrap())
        .unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Http);
    assert_eq!(err.status, Some(500));
    assert_eq!(err.message, "Request failed");

    let err = api
        .get_marketplace_case(&live(), &CaseId::new("gone").unwrap())
        .unwrap_err();
    assert_eq!(err.status, Some(404));
    assert_eq!(err.message, "HTTP error! status: 404");

    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let closed_addr = closed.local_addr().unwrap();
    drop(closed);
    let err = client_for(closed_addr).get_profile(&live()).unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Transport);
    assert_eq!(err.status, None);
    assert!(err.message.starts_with("Network error ("));
}
