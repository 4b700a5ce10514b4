//! Chrome-backed worker resources and per-task sessions
//!
//! Every pooled worker is one Chrome process driven over the DevTools
//! protocol. Each task runs in its own incognito browser context, so cookies
//! and proxy settings never leak between tasks sharing a browser.

use crate::{create_browser_config, CaptchaError, Config, ProxyConfig};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams, EventAuthRequired, EventRequestPaused,
};
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams};
use chromiumoxide::page::Page;
use futures::{Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Creates and tears down worker resources and the isolated sessions tasks
/// run in.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Resource: Send + Sync + 'static;
    type Session: Send + Sync + 'static;

    /// Build the resource for pool slot `slot`.
    async fn create(&self, slot: usize) -> Result<Self::Resource, CaptchaError>;

    /// Open an isolated session on `resource`, routed through `proxy` if given.
    async fn open_session(
        &self,
        resource: &Self::Resource,
        proxy: Option<&ProxyConfig>,
    ) -> Result<Self::Session, CaptchaError>;

    async fn navigate(&self, session: &Self::Session, url: &Url) -> Result<(), CaptchaError>;

    /// Tear a session down. Never fails; problems are logged.
    async fn close_session(&self, resource: &Self::Resource, session: Self::Session);

    async fn destroy(&self, resource: Self::Resource);
}

/// One running Chrome process and its DevTools event loop.
pub struct BrowserInstance {
    pub slot: usize,
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
}

impl BrowserInstance {
    pub fn is_alive(&self) -> bool {
        !self.handler.is_finished()
    }
}

/// Incognito context plus the page a task works on.
#[derive(Debug)]
pub struct BrowserSession {
    pub page: Page,
    context_id: BrowserContextId,
    proxy_auth: Option<JoinHandle<()>>,
}

pub struct ChromeFactory {
    config: Config,
}

impl ChromeFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for ChromeFactory {
    type Resource = BrowserInstance;
    type Session = BrowserSession;

    async fn create(&self, slot: usize) -> Result<BrowserInstance, CaptchaError> {
        let user_data_dir = format!("/tmp/hcaptcha-pool-{}-{}", std::process::id(), slot);
        let temp_dir = format!("/tmp/hcaptcha-pool-temp-{}-{}", std::process::id(), slot);

        for dir in [&user_data_dir, &temp_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                CaptchaError::ResourceCreation(format!("Failed to create {dir}: {e}"))
            })?;
        }

        let browser_config = create_browser_config(&self.config, slot)?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| CaptchaError::ResourceCreation(e.to_string()))?;

        // The handler is a stream that must be polled for the browser to make progress.
        let handler = tokio::spawn(async move {
            drive_handler(slot, handler).await;
        });

        info!(slot, "Browser initialized successfully");

        Ok(BrowserInstance {
            slot,
            browser: Mutex::new(browser),
            handler,
        })
    }

    async fn open_session(
        &self,
        resource: &BrowserInstance,
        proxy: Option<&ProxyConfig>,
    ) -> Result<BrowserSession, CaptchaError> {
        if !resource.is_alive() {
            return Err(CaptchaError::Session(format!(
                "browser {} is no longer running",
                resource.slot
            )));
        }

        let mut context_params = CreateBrowserContextParams::default();
        if let Some(proxy) = proxy {
            context_params.proxy_server = Some(proxy.server.clone());
        }

        let (context_id, page) = {
            let mut browser = resource.browser.lock().await;
            let context_id = browser.create_browser_context(context_params).await?;

            let mut target = CreateTargetParams::new("about:blank");
            target.browser_context_id = Some(context_id.clone());
            let page = browser.new_page(target).await?;
            (context_id, page)
        };

        let proxy_auth = match proxy.filter(|p| p.requires_auth()) {
            Some(proxy) => Some(answer_proxy_auth(&page, proxy).await?),
            None => None,
        };

        Ok(BrowserSession {
            page,
            context_id,
            proxy_auth,
        })
    }

    async fn navigate(&self, session: &BrowserSession, url: &Url) -> Result<(), CaptchaError> {
        session
            .page
            .goto(url.as_str())
            .await
            .map_err(|e| CaptchaError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn close_session(&self, resource: &BrowserInstance, session: BrowserSession) {
        debug!(slot = resource.slot, "Clearing page state");

        if let Some(task) = session.proxy_auth {
            task.abort();
        }

        if let Err(e) = session.page.close().await {
            debug!(slot = resource.slot, "Failed to close page: {}", e);
        }

        let browser = resource.browser.lock().await;
        if let Err(e) = browser.dispose_browser_context(session.context_id).await {
            warn!(slot = resource.slot, "Failed to dispose browser context: {}", e);
        }
    }

    async fn destroy(&self, resource: BrowserInstance) {
        let mut browser = resource.browser.lock().await;
        if let Err(e) = browser.close().await {
            debug!(slot = resource.slot, "Failed to close browser: {}", e);
        }
        let _ = browser.wait().await;
        resource.handler.abort();
    }
}

/// Poll a DevTools handler stream until the browser connection closes.
///
/// Errors on the stream are per-message (an undecodable CDP event, a dropped
/// response) and do not end the connection, so polling carries on after
/// them. Returns the number of errors seen.
pub async fn drive_handler<S, T, E>(slot: usize, mut events: S) -> usize
where
    S: Stream<Item = Result<T, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut errors = 0;
    while let Some(event) = events.next().await {
        if let Err(e) = event {
            errors += 1;
            warn!(slot, "Browser handler error: {}", e);
        }
    }
    debug!(slot, errors, "Browser handler stream ended");
    errors
}

/// Answer proxy authentication challenges for `page` with the proxy's
/// credentials. Interception stays on for the page's lifetime, so paused
/// requests are released as they arrive.
async fn answer_proxy_auth(
    page: &Page,
    proxy: &ProxyConfig,
) -> Result<JoinHandle<()>, CaptchaError> {
    let mut auth_required = page.event_listener::<EventAuthRequired>().await?;
    let mut request_paused = page.event_listener::<EventRequestPaused>().await?;

    let mut enable = EnableParams::default();
    enable.handle_auth_requests = Some(true);
    page.execute(enable).await?;

    let page = page.clone();
    let username = proxy.username.clone();
    let password = proxy.password.clone();

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = auth_required.next() => {
                    let mut answer = AuthChallengeResponse::new(
                        AuthChallengeResponseResponse::ProvideCredentials,
                    );
                    answer.username = username.clone();
                    answer.password = password.clone();

                    let params = ContinueWithAuthParams::new(event.request_id.clone(), answer);
                    if let Err(e) = page.execute(params).await {
                        debug!("Failed to answer proxy auth challenge: {}", e);
                    }
                }
                Some(event) = request_paused.next() => {
                    let params = ContinueRequestParams::new(event.request_id.clone());
                    if let Err(e) = page.execute(params).await {
                        debug!("Failed to continue paused request: {}", e);
                    }
                }
                else => break,
            }
        }
    }))
}
