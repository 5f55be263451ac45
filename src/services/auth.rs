//! Session establishment: form login, login-status checks, and handing off
//! to a human when automation is not enough.

use std::io::{self, Write};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use console::style;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::AuthConfig;
use crate::context::RunContext;
use crate::error::HarvestError;
use crate::models::ResourceRef;
use crate::scrapers::driver::PageDriver;

/// Best-effort login status.
///
/// Detection is heuristic, so `Unknown` is common. Policy: `Unknown` counts
/// as authenticated; only a positive logged-out signal blocks retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Authenticated,
    NotAuthenticated,
    Unknown,
}

impl AuthStatus {
    pub fn is_usable(self) -> bool {
        !matches!(self, Self::NotAuthenticated)
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn from_config(config: &AuthConfig) -> Option<Self> {
        match (&config.username, &config.password) {
            (Some(username), Some(password)) if !username.is_empty() => Some(Self {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// How the session came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMethod {
    Anonymous,
    Form,
    Manual,
}

/// The established session. Cookies live in the driver; this only records
/// how and when the session was set up.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub method: SessionMethod,
    pub username: Option<String>,
    pub status: AuthStatus,
    pub established_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(method: SessionMethod, username: Option<String>, status: AuthStatus) -> Self {
        Self {
            method,
            username,
            status,
            established_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub enum LoginOutcome {
    Session(SessionContext),
    /// Automation could not log in; a human has to.
    RequiresHumanInput(String),
}

#[async_trait]
pub trait Authenticator<D: PageDriver>: Send + Sync {
    async fn login(
        &self,
        driver: &mut D,
        credentials: Option<&Credentials>,
    ) -> Result<LoginOutcome, HarvestError>;

    async fn check_status(&self, driver: &D) -> AuthStatus;

    /// Where a human should log in, if anywhere.
    fn login_url(&self) -> Option<&ResourceRef> {
        None
    }
}

/// For sites that need no login.
pub struct AnonymousAuthenticator;

#[async_trait]
impl<D: PageDriver> Authenticator<D> for AnonymousAuthenticator {
    async fn login(
        &self,
        _driver: &mut D,
        _credentials: Option<&Credentials>,
    ) -> Result<LoginOutcome, HarvestError> {
        Ok(LoginOutcome::Session(SessionContext::new(
            SessionMethod::Anonymous,
            None,
            AuthStatus::Unknown,
        )))
    }

    async fn check_status(&self, _driver: &D) -> AuthStatus {
        AuthStatus::Unknown
    }
}

/// Fills and submits a login form.
pub struct FormAuthenticator {
    config: AuthConfig,
    login_url: ResourceRef,
}

impl FormAuthenticator {
    pub fn new(config: AuthConfig, base: &Url) -> Result<Self, HarvestError> {
        let login_url = ResourceRef::resolve(base, &config.login_url).ok_or_else(|| {
            HarvestError::FatalConfiguration(format!(
                "auth.login_url {:?} is not a valid URL",
                config.login_url
            ))
        })?;
        Ok(Self { config, login_url })
    }

    async fn first_visible<D: PageDriver>(
        driver: &D,
        selector: &str,
    ) -> anyhow::Result<Option<D::Element>> {
        for element in driver.find_all(selector).await? {
            if driver.is_visible(&element).await? {
                return Ok(Some(element));
            }
        }
        Ok(None)
    }

    async fn any_visible<D: PageDriver>(driver: &D, selectors: &[String]) -> bool {
        for selector in selectors {
            if matches!(Self::first_visible(driver, selector).await, Ok(Some(_))) {
                return true;
            }
        }
        false
    }

    async fn submit_form<D: PageDriver>(
        &self,
        driver: &mut D,
        credentials: &Credentials,
    ) -> anyhow::Result<()> {
        let username = Self::first_visible(&*driver, &self.config.username_selector)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No username field on login page"))?;
        driver.fill(&username, &credentials.username).await?;

        let password = Self::first_visible(&*driver, &self.config.password_selector)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No password field on login page"))?;
        driver.fill(&password, &credentials.password).await?;

        let submit = Self::first_visible(&*driver, &self.config.submit_selector)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No submit control on login page"))?;
        driver.activate(&submit).await
    }
}

#[async_trait]
impl<D: PageDriver> Authenticator<D> for FormAuthenticator {
    async fn login(
        &self,
        driver: &mut D,
        credentials: Option<&Credentials>,
    ) -> Result<LoginOutcome, HarvestError> {
        driver
            .navigate(&self.login_url)
            .await
            .map_err(|e| HarvestError::navigation(&self.login_url, e))?;

        if <Self as Authenticator<D>>::check_status(self, driver).await == AuthStatus::Authenticated
        {
            info!("Already logged in");
            return Ok(LoginOutcome::Session(SessionContext::new(
                SessionMethod::Form,
                credentials.map(|c| c.username.clone()),
                AuthStatus::Authenticated,
            )));
        }

        let Some(credentials) = credentials else {
            return Ok(LoginOutcome::RequiresHumanInput(
                "no credentials configured".to_string(),
            ));
        };

        if let Err(e) = self.submit_form(driver, credentials).await {
            warn!("Automatic login failed: {}", e);
            return Ok(LoginOutcome::RequiresHumanInput(e.to_string()));
        }

        let status = <Self as Authenticator<D>>::check_status(self, driver).await;
        debug!("Login status after submit: {:?}", status);
        if !status.is_usable() {
            return Ok(LoginOutcome::RequiresHumanInput(
                "login form did not accept the credentials".to_string(),
            ));
        }

        info!("Logged in as {}", credentials.username);
        Ok(LoginOutcome::Session(SessionContext::new(
            SessionMethod::Form,
            Some(credentials.username.clone()),
            status,
        )))
    }

    async fn check_status(&self, driver: &D) -> AuthStatus {
        if Self::any_visible(driver, &self.config.logged_in_selectors).await {
            AuthStatus::Authenticated
        } else if Self::any_visible(driver, &self.config.logged_out_selectors).await {
            AuthStatus::NotAuthenticated
        } else {
            AuthStatus::Unknown
        }
    }

    fn login_url(&self) -> Option<&ResourceRef> {
        Some(&self.login_url)
    }
}

/// A human who can log in when automation fails.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Ask for a manual login. Returns `false` if the operator declined.
    async fn request_login(&self, login_url: Option<&ResourceRef>, reason: &str) -> bool;
}

/// Prompts on the terminal and waits for Enter.
pub struct ConsoleOperator;

#[async_trait]
impl Operator for ConsoleOperator {
    async fn request_login(&self, login_url: Option<&ResourceRef>, reason: &str) -> bool {
        println!(
            "\n{} Login needed: {}",
            style("!").yellow(),
            reason
        );
        if let Some(url) = login_url {
            println!("  Log in at {}", style(url).cyan());
        }
        print!("  Press Enter once logged in (or type q to abort): ");
        let _ = io::stdout().flush();

        let answer = tokio::task::spawn_blocking(|| {
            let mut input = String::new();
            io::stdin().read_line(&mut input).map(|_| input)
        })
        .await;

        match answer {
            Ok(Ok(input)) => !input.trim().eq_ignore_ascii_case("q"),
            _ => false,
        }
    }
}

/// Log in once for the run and store the session in `ctx`.
///
/// Falls back to the operator when automation needs a human. Without one
/// (non-interactive runs) this fails with `AuthenticationRequired`, since
/// nothing downstream can work without a session.
pub async fn establish_session<D: PageDriver>(
    authenticator: &dyn Authenticator<D>,
    driver: &mut D,
    ctx: &mut RunContext,
    credentials: Option<&Credentials>,
    operator: Option<&dyn Operator>,
) -> Result<SessionContext, HarvestError> {
    let reason = match authenticator.login(driver, credentials).await? {
        LoginOutcome::Session(session) => {
            ctx.session = Some(session.clone());
            return Ok(session);
        }
        LoginOutcome::RequiresHumanInput(reason) => reason,
    };

    let operator = match operator {
        Some(operator) if ctx.interactive => operator,
        _ => return Err(HarvestError::AuthenticationRequired(reason)),
    };

    if !operator
        .request_login(authenticator.login_url(), &reason)
        .await
    {
        return Err(HarvestError::AuthenticationRequired(format!(
            "{} (operator declined)",
            reason
        )));
    }

    let status = authenticator.check_status(driver).await;
    if !status.is_usable() {
        return Err(HarvestError::AuthenticationRequired(
            "still logged out after manual login".to_string(),
        ));
    }

    let session = SessionContext::new(
        SessionMethod::Manual,
        credentials.map(|c| c.username.clone()),
        status,
    );
    ctx.session = Some(session.clone());
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_status_is_usable() {
        assert!(AuthStatus::Authenticated.is_usable());
        assert!(AuthStatus::Unknown.is_usable());
        assert!(!AuthStatus::NotAuthenticated.is_usable());
    }

    #[test]
    fn test_credentials_require_username_and_password() {
        let mut config = AuthConfig {
            login_url: "/login".into(),
            username_selector: String::new(),
            password_selector: String::new(),
            submit_selector: String::new(),
            logged_in_selectors: vec![],
            logged_out_selectors: vec![],
            username: Some("reader".into()),
            password: None,
        };
        assert!(Credentials::from_config(&config).is_none());
        config.password = Some("pw".into());
        let creds = Credentials::from_config(&config).unwrap();
        assert_eq!(creds.username, "reader");
        assert!(!format!("{:?}", creds).contains("pw"));
    }

    #[test]
    fn test_form_authenticator_rejects_bad_login_url() {
        let base = Url::parse("https://example.org").unwrap();
        let config = AuthConfig {
            login_url: "javascript:void(0)".into(),
            username_selector: String::new(),
            password_selector: String::new(),
            submit_selector: String::new(),
            logged_in_selectors: vec![],
            logged_out_selectors: vec![],
            username: None,
            password: None,
        };
        assert!(matches!(
            FormAuthenticator::new(config, &base),
            Err(HarvestError::FatalConfiguration(_))
        ));
    }
}
