#![forbid(unsafe_code)]

use lexmarket_engines::api_client::{ApiError, AuthApi};
use lexmarket_engines::device_vault::VaultError;
use lexmarket_engines::token_store::TokenStore;
use lexmarket_kernel_contracts::route::AppRoute;
use lexmarket_kernel_contracts::session::{
    AuthResponse, LoginInput, Role, SessionToken, SignupInput, UserProfile,
};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: SessionToken,
    pub user: UserProfile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// Persisted token not looked at yet.
    Loading,
    Anonymous,
    Authenticated(Session),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("token store: {0}")]
    Store(#[from] VaultError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavLink {
    pub label: &'static str,
    pub route: AppRoute,
}

/// Who is signed in, owned by the app and handed to whatever needs it.
pub struct SessionContext {
    store: Box<dyn TokenStore>,
    phase: SessionPhase,
}

impl SessionContext {
    pub fn new(store: Box<dyn TokenStore>) -> Self {
        Self {
            store,
            phase: SessionPhase::Loading,
        }
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.phase {
            SessionPhase::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.session().map(|s| &s.user)
    }

    pub fn token(&self) -> Option<&SessionToken> {
        self.session().map(|s| &s.token)
    }

    pub fn role(&self) -> Option<Role> {
        self.user().map(|u| u.role)
    }

    /// Restores the previous session from the token store. A token the backend
    /// no longer accepts is discarded.
    pub fn init(&mut self, api: &dyn AuthApi) -> &SessionPhase {
        let stored = match self.store.load() {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "stored session token unreadable, discarding");
                self.clear_store();
                None
            }
        };

        self.phase = match stored {
            None => SessionPhase::Anonymous,
            Some(token) => match api.get_profile(&token) {
                Ok(user) => {
                    info!(user_id = %user.id.as_str(), token_fp = %token.fingerprint(), "session restored");
                    SessionPhase::Authenticated(Session { token, user })
                }
                Err(err) => {
                    warn!(status = ?err.status, error = %err, "stored session rejected");
                    self.clear_store();
                    SessionPhase::Anonymous
                }
            },
        };
        &self.phase
    }

    pub fn login(
        &mut self,
        api: &dyn AuthApi,
        email: &str,
        password: &str,
    ) -> Result<Session, SessionError> {
        let attempt = LoginInput::v1(email, password)
            .map_err(ApiError::from)
            .and_then(|input| api.login(&input));
        self.finish_auth(attempt)
    }

    pub fn signup(&mut self, api: &dyn AuthApi, input: &SignupInput) -> Result<Session, SessionError> {
        let attempt = api.signup(input);
        self.finish_auth(attempt)
    }

    /// Always ends `Anonymous`; a store failure is still reported.
    pub fn logout(&mut self) -> Result<(), SessionError> {
        if let Some(session) = self.session() {
            info!(token_fp = %session.token.fingerprint(), "logging out");
        }
        self.phase = SessionPhase::Anonymous;
        self.store.clear()?;
        Ok(())
    }

    /// Where a freshly authenticated user lands.
    pub fn home_route(&self) -> AppRoute {
        match self.role() {
            Some(role) => AppRoute::home_for(role),
            None => AppRoute::Landing,
        }
    }

    pub fn nav_links(&self) -> Vec<NavLink> {
        let link = |label, route| NavLink { label, route };
        match self.role() {
            Some(Role::Client) => vec![
                link("My Cases", AppRoute::ClientDashboard),
                link("Create Case", AppRoute::ClientCaseNew),
            ],
            Some(Role::Lawyer) => vec![
                link("Marketplace", AppRoute::LawyerMarketplace),
                link("My Quotes", AppRoute::LawyerMyQuotes),
            ],
            None if self.phase == SessionPhase::Loading => Vec::new(),
            None => vec![
                link("Login", AppRoute::Login),
                link("Sign up as Client", AppRoute::SignupClient),
                link("Sign up as Lawyer", AppRoute::SignupLawyer),
            ],
        }
    }

    fn finish_auth(&mut self, attempt: Result<AuthResponse, ApiError>) -> Result<Session, SessionError> {
        let auth = match attempt {
            Ok(auth) => auth,
            Err(err) => {
                if self.session().is_none() {
                    self.phase = SessionPhase::Anonymous;
                }
                return Err(err.into());
            }
        };
        self.store.save(&auth.token)?;
        info!(
            user_id = %auth.user.id.as_str(),
            role = auth.user.role.as_str(),
            token_fp = %auth.token.fingerprint(),
            "signed in"
        );
        let session = Session {
            token: auth.token,
            user: auth.user,
        };
        self.phase = SessionPhase::Authenticated(session.clone());
        Ok(session)
    }

    fn clear_store(&self) {
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "failed to clear stored session token");
        }
    }
}
