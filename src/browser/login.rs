//! Naver login, automated or by hand.

use super::{PageElement, Session};
use crate::error::{BrowserError, ScrapeError};
use crate::progress::ProgressSink;
use std::fmt;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub const LOGIN_URL: &str = "https://nid.naver.com/nidlogin.login";

const ID_FIELD: &str = "#id";
const PW_FIELD: &str = "#pw";
const LOGIN_BUTTON: &str = r#"[id="log.login"]"#;
/// Present on the Naver landing page once a session is authenticated.
pub const LOGGED_IN_MARKER: &str = "#account";

/// How the session gets authenticated.
#[derive(Clone)]
pub enum LoginMethod {
    /// Type stored credentials into the login form.
    Automated { username: String, password: String },
    /// Wait for the user to log in in the visible browser window.
    Manual,
}

impl fmt::Debug for LoginMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginMethod::Automated { username, .. } => f
                .debug_struct("Automated")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            LoginMethod::Manual => f.write_str("Manual"),
        }
    }
}

impl LoginMethod {
    /// Build the method from optional credentials.
    ///
    /// `automated` without both credentials is a configuration error.
    pub fn from_config(
        automated: bool,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, ScrapeError> {
        if !automated {
            return Ok(LoginMethod::Manual);
        }
        match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Ok(LoginMethod::Automated { username, password })
            }
            _ => Err(ScrapeError::Config(
                "automated login needs NAVER_ID and NAVER_PW".to_string(),
            )),
        }
    }
}

/// Bounded waits used while logging in.
#[derive(Debug, Clone, Copy)]
pub struct LoginTimeouts {
    /// Wait for each form element and for the success marker in automated mode.
    pub automated: Duration,
    /// Wait for the success marker in manual mode.
    pub manual: Duration,
}

impl Default for LoginTimeouts {
    fn default() -> Self {
        Self {
            automated: Duration::from_secs(30),
            manual: Duration::from_secs(60),
        }
    }
}

impl LoginTimeouts {
    pub fn for_method(&self, method: &LoginMethod) -> Duration {
        match method {
            LoginMethod::Automated { .. } => self.automated,
            LoginMethod::Manual => self.manual,
        }
    }
}

/// Log the session in. Returns whether the success marker was seen in time.
#[instrument(level = "info", skip_all, fields(method = ?method))]
pub async fn perform_login<S: Session>(
    session: &mut S,
    method: &LoginMethod,
    timeouts: &LoginTimeouts,
    reporter: &dyn ProgressSink,
) -> Result<bool, BrowserError> {
    let wait = timeouts.for_method(method);
    session.navigate(LOGIN_URL).await?;

    match method {
        LoginMethod::Automated { username, password } => {
            reporter.report("Logging in with stored credentials.");
            let Some(id_field) = session.wait_for(ID_FIELD, wait).await? else {
                warn!("login form did not appear");
                reporter.report("[error] The login form did not appear.");
                return Ok(false);
            };
            id_field.send_keys(username).await?;

            let pw_field = session
                .wait_for(PW_FIELD, wait)
                .await?
                .ok_or_else(|| BrowserError::MissingElement(PW_FIELD.to_string()))?;
            pw_field.send_keys(password).await?;

            let button = session
                .wait_for(LOGIN_BUTTON, wait)
                .await?
                .ok_or_else(|| BrowserError::MissingElement(LOGIN_BUTTON.to_string()))?;
            button.click().await?;
        }
        LoginMethod::Manual => {
            reporter.report("Opening the browser for Naver login.");
            reporter.report(&format!(
                "Please log in within {} seconds. The run continues automatically.",
                wait.as_secs()
            ));
        }
    }

    if session.wait_for(LOGGED_IN_MARKER, wait).await?.is_some() {
        info!("login confirmed");
        reporter.report("Login confirmed.");
        Ok(true)
    } else {
        warn!(?wait, "login not confirmed in time");
        reporter.report(&format!(
            "[error] Login was not confirmed within {} seconds.",
            wait.as_secs()
        ));
        Ok(false)
    }
}
