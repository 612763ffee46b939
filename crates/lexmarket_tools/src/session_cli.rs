#![forbid(unsafe_code)]

use lexmarket_engines::api_client::AuthApi;
use lexmarket_kernel_contracts::route::AppRoute;
use lexmarket_kernel_contracts::session::{Role, SessionToken, SignupInput};
use lexmarket_os::route_guard::{guard_route, resolve_and_guard, GuardDecision};
use lexmarket_os::session::{Session, SessionContext, SessionPhase};

pub fn execute_login(
    ctx: &mut SessionContext,
    api: &dyn AuthApi,
    email: &str,
    password: &str,
) -> Result<String, String> {
    let session = ctx.login(api, email, password).map_err(|e| e.to_string())?;
    Ok(signed_in_line(&session, ctx.home_route()))
}

pub fn execute_signup(
    ctx: &mut SessionContext,
    api: &dyn AuthApi,
    input: &SignupInput,
) -> Result<String, String> {
    let session = ctx.signup(api, input).map_err(|e| e.to_string())?;
    Ok(signed_in_line(&session, ctx.home_route()))
}

pub fn execute_logout(ctx: &mut SessionContext) -> Result<String, String> {
    ctx.logout()
        .map_err(|e| format!("signed out, but the stored token could not be removed: {e}"))?;
    Ok("OK".to_string())
}

pub fn execute_whoami(ctx: &SessionContext) -> String {
    let mut out = match ctx.phase() {
        SessionPhase::Authenticated(s) => format!(
            "{} <{}> role={}",
            s.user.display_name(),
            s.user.email,
            s.user.role
        ),
        SessionPhase::Anonymous => "anonymous".to_string(),
        SessionPhase::Loading => "loading".to_string(),
    };
    for link in ctx.nav_links() {
        out.push_str(&format!("\n  {} -> {}", link.label, link.route));
    }
    out
}

/// `route <location>`: where the app would actually land.
pub fn execute_route(ctx: &SessionContext, location: &str) -> String {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    let (route, decision) = resolve_and_guard(path, ctx);
    let decision = match decision {
        GuardDecision::Pending => "pending".to_string(),
        GuardDecision::Allow => "allow".to_string(),
        GuardDecision::Redirect(to) => format!("redirect {to}"),
    };
    format!("route={route} decision={decision}")
}

/// Token for a command that belongs to `route`'s screen, if the session may
/// open it.
pub fn require_access<'a>(ctx: &'a SessionContext, route: &AppRoute) -> Result<&'a SessionToken, String> {
    match guard_route(route, ctx) {
        GuardDecision::Allow => ctx
            .token()
            .ok_or_else(|| "not signed in; run `lexmarket login` first".to_string()),
        GuardDecision::Pending => Err("session not initialised".to_string()),
        GuardDecision::Redirect(AppRoute::Login) => {
            Err("not signed in; run `lexmarket login` first".to_string())
        }
        GuardDecision::Redirect(_) => {
            let needed = route.required_role().map_or("another", Role::as_str);
            Err(format!("this command needs a {needed} account"))
        }
    }
}

fn signed_in_line(session: &Session, home: AppRoute) -> String {
    format!(
        "Signed in as {} ({}). Home: {home}",
        session.user.display_name(),
        session.user.role
    )
}
