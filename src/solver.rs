//! Challenge solving capability
//!
//! The dispatcher only needs to know whether a solve attempt produced a
//! credential; how the challenge is beaten is up to the [`Solver`]. The
//! Chrome implementation ticks the checkbox, hands visual challenges to an
//! external agent bundle and collects whatever tokens the widget issues.

use crate::{BrowserSession, CaptchaError, Config};
use async_trait::async_trait;
use chromiumoxide::layout::Point;
use chromiumoxide::page::Page;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Demo page that renders an hCaptcha widget for an arbitrary sitekey.
pub const CHALLENGE_HOST: &str = "https://accounts.hcaptcha.com/demo";

/// Build the page a session is pointed at for `sitekey`.
pub fn site_link(sitekey: &str) -> Result<Url, CaptchaError> {
    Url::parse_with_params(CHALLENGE_HOST, &[("sitekey", sitekey)])
        .map_err(|e| CaptchaError::Validation(format!("invalid sitekey: {e}")))
}

/// Works a challenge in a session that is already on the challenge page.
#[async_trait]
pub trait Solver<S: Send + Sync + 'static>: Send + Sync {
    /// Returns every credential issued, oldest first. An empty list means the
    /// challenge was not passed. Must return promptly once `cancel` fires.
    async fn solve(&self, session: &S, cancel: CancellationToken)
        -> Result<Vec<String>, CaptchaError>;
}

const CHECKBOX_FRAME: &str = r#"iframe[src*="frame=checkbox"]"#;

// Reports the issued token and whether the agent gave up.
const TOKEN_PROBE: &str = r#"(() => {
    const field = document.querySelector('[name="h-captcha-response"]');
    return {
        token: field ? field.value : "",
        done: window.__hcaptchaAgentDone === true,
    };
})()"#;

#[derive(Debug, Default, Deserialize)]
struct Probe {
    #[serde(default)]
    token: String,
    #[serde(default)]
    done: bool,
}

pub struct ChromeSolver {
    api_key: String,
    agent_script: Option<String>,
    poll_interval: Duration,
    checkbox_attempts: usize,
}

impl ChromeSolver {
    pub fn new(api_key: impl Into<String>, agent_script: Option<String>, poll_interval: Duration) -> Self {
        Self {
            api_key: api_key.into(),
            agent_script,
            poll_interval,
            checkbox_attempts: 20,
        }
    }

    pub async fn from_config(config: &Config) -> Result<Self, CaptchaError> {
        let agent_script = match &config.agent_script {
            Some(path) => Some(tokio::fs::read_to_string(path).await.map_err(|e| {
                CaptchaError::Configuration(format!(
                    "cannot read agent script {}: {e}",
                    path.display()
                ))
            })?),
            None => None,
        };

        Ok(Self::new(
            config.api_key.clone(),
            agent_script,
            config.token_poll_interval,
        ))
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<(), CaptchaError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(CaptchaError::Cancelled),
            _ = sleep(self.poll_interval) => Ok(()),
        }
    }

    async fn click_checkbox(&self, page: &Page, cancel: &CancellationToken) -> Result<(), CaptchaError> {
        for _ in 0..self.checkbox_attempts {
            if let Ok(frame) = page.find_element(CHECKBOX_FRAME).await {
                let bounds = frame
                    .bounding_box()
                    .await
                    .map_err(|e| CaptchaError::Solver(e.to_string()))?;

                // The tick box sits at the left edge of the widget.
                let target = Point::new(bounds.x + 30.0, bounds.y + bounds.height / 2.0);
                page.click(target)
                    .await
                    .map_err(|e| CaptchaError::Solver(e.to_string()))?;
                return Ok(());
            }
            self.pause(cancel).await?;
        }

        Err(CaptchaError::Solver("checkbox frame never appeared".to_string()))
    }

    async fn start_agent(&self, page: &Page) -> Result<(), CaptchaError> {
        let Some(script) = &self.agent_script else {
            return Ok(());
        };

        let bootstrap = format!(
            "window.__hcaptchaAgent = {{ apiKey: {} }};",
            serde_json::to_string(&self.api_key)?
        );
        page.evaluate(bootstrap)
            .await
            .map_err(|e| CaptchaError::Solver(e.to_string()))?;
        page.evaluate(script.as_str())
            .await
            .map_err(|e| CaptchaError::Solver(e.to_string()))?;
        Ok(())
    }

    async fn probe(&self, page: &Page) -> Result<Probe, CaptchaError> {
        page.evaluate(TOKEN_PROBE)
            .await
            .map_err(|e| CaptchaError::Solver(e.to_string()))?
            .into_value::<Probe>()
            .map_err(|e| CaptchaError::Solver(e.to_string()))
    }
}

#[async_trait]
impl Solver<BrowserSession> for ChromeSolver {
    async fn solve(
        &self,
        session: &BrowserSession,
        cancel: CancellationToken,
    ) -> Result<Vec<String>, CaptchaError> {
        let page = &session.page;

        self.click_checkbox(page, &cancel).await?;
        self.start_agent(page).await?;

        loop {
            self.pause(&cancel).await?;

            let probe = self.probe(page).await?;
            if !probe.token.is_empty() {
                debug!("Challenge issued a token");
                return Ok(vec![probe.token]);
            }

            if probe.done {
                return Ok(Vec::new());
            }
        }
    }
}
