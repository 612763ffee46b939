#![forbid(unsafe_code)]

use lexmarket_kernel_contracts::route::AppRoute;

use crate::session::{SessionContext, SessionPhase};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session still loading; show the spinner, decide later.
    Pending,
    Allow,
    Redirect(AppRoute),
}

pub fn guard_route(route: &AppRoute, session: &SessionContext) -> GuardDecision {
    let Some(required) = route.required_role() else {
        return match session.phase() {
            SessionPhase::Loading => GuardDecision::Pending,
            _ => GuardDecision::Allow,
        };
    };
    match session.phase() {
        SessionPhase::Loading => GuardDecision::Pending,
        SessionPhase::Anonymous => GuardDecision::Redirect(AppRoute::Login),
        SessionPhase::Authenticated(s) if s.user.role != required => {
            GuardDecision::Redirect(AppRoute::home_for(s.user.role))
        }
        SessionPhase::Authenticated(_) => GuardDecision::Allow,
    }
}

/// Resolves a location (unknown paths land on `/`) and guards the result.
pub fn resolve_and_guard(path: &str, session: &SessionContext) -> (AppRoute, GuardDecision) {
    let route = AppRoute::resolve(path);
    let decision = guard_route(&route, session);
    (route, decision)
}
