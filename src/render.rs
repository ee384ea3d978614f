//! Optional headless-browser pass for pages that only produce content after
//! their scripts run. Without the `render` feature the extractor simply skips
//! this stage.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::ExtractionError;

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Load `url` in a browser, let scripts settle, and return the resulting markup.
    async fn render(&self, url: &Url, timeout: Duration) -> Result<String, ExtractionError>;
}

#[cfg(feature = "render")]
pub use chromium::ChromiumRenderer;

#[cfg(feature = "render")]
mod chromium {
    use std::future::Future;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chromiumoxide::{Browser, BrowserConfig, Page};
    use futures::StreamExt;
    use tokio::sync::Mutex;
    use tokio::time::Instant;
    use tracing::{info, warn};
    use url::Url;

    use super::Renderer;
    use crate::error::ExtractionError;

    /// Extra time given to late XHR/fetch calls after the load event.
    const SETTLE_DELAY: Duration = Duration::from_millis(750);

    /// Cleared when the CDP handler task ends, however it ends.
    struct Liveness(Arc<AtomicBool>);

    impl Liveness {
        fn new() -> (Self, Arc<AtomicBool>) {
            let flag = Arc::new(AtomicBool::new(true));
            (Self(flag.clone()), flag)
        }
    }

    impl Drop for Liveness {
        fn drop(&mut self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }

    struct Session {
        browser: Arc<Browser>,
        alive: Arc<AtomicBool>,
    }

    impl Session {
        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    /// Chromium driven over CDP. The browser is launched on first use and
    /// shared; a browser whose connection died is relaunched on the next render.
    #[derive(Default)]
    pub struct ChromiumRenderer {
        session: Mutex<Option<Session>>,
    }

    impl ChromiumRenderer {
        pub fn new() -> Self {
            Self::default()
        }

        async fn browser(&self) -> Result<Arc<Browser>, ExtractionError> {
            let mut guard = self.session.lock().await;
            if let Some(session) = guard.as_ref() {
                if session.is_alive() {
                    return Ok(session.browser.clone());
                }
                warn!("Chromium connection lost; relaunching");
                *guard = None;
            }

            let mut builder = BrowserConfig::builder()
                .arg("--disable-dev-shm-usage")
                .arg("--disable-gpu")
                .arg("--disable-extensions");
            if std::env::var("CI").is_ok() || std::env::var("NO_SANDBOX").is_ok() {
                builder = builder.no_sandbox();
            }
            let config = builder.build().map_err(ExtractionError::Render)?;

            info!("Launching headless chromium");
            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| ExtractionError::Render(e.to_string()))?;

            let (liveness, alive) = Liveness::new();
            tokio::spawn(async move {
                let _liveness = liveness;
                while let Some(event) = handler.next().await {
                    if let Err(e) = event {
                        warn!("Chromium handler stopped: {}", e);
                        break;
                    }
                }
            });

            let browser = Arc::new(browser);
            *guard = Some(Session {
                browser: browser.clone(),
                alive,
            });
            Ok(browser)
        }

        /// Drop the cached browser if it is still the one that failed.
        async fn invalidate(&self, failed: &Arc<Browser>) {
            let mut guard = self.session.lock().await;
            if guard
                .as_ref()
                .is_some_and(|session| Arc::ptr_eq(&session.browser, failed))
            {
                *guard = None;
            }
        }
    }

    async fn load_content(page: &Page, url: &Url) -> Result<String, ExtractionError> {
        page.goto(url.as_str())
            .await
            .map_err(|e| ExtractionError::Render(e.to_string()))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| ExtractionError::Render(e.to_string()))?;
        tokio::time::sleep(SETTLE_DELAY).await;
        page.content()
            .await
            .map_err(|e| ExtractionError::Render(e.to_string()))
    }

    /// Run `work` until `deadline`; on expiry the work is abandoned and an
    /// error returned, so the caller still gets to clean up.
    async fn until_deadline<T>(
        deadline: Instant,
        budget: Duration,
        work: impl Future<Output = Result<T, ExtractionError>>,
    ) -> Result<T, ExtractionError> {
        tokio::time::timeout_at(deadline, work)
            .await
            .unwrap_or_else(|_| Err(ExtractionError::Render(format!("timed out after {:?}", budget))))
    }

    #[async_trait]
    impl Renderer for ChromiumRenderer {
        async fn render(&self, url: &Url, timeout: Duration) -> Result<String, ExtractionError> {
            let deadline = Instant::now() + timeout;
            let browser = until_deadline(deadline, timeout, self.browser()).await?;

            // A blank tab involves no network; everything slow happens under the deadline.
            let page = match until_deadline(deadline, timeout, async {
                browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| ExtractionError::Render(e.to_string()))
            })
            .await
            {
                Ok(page) => page,
                Err(e) => {
                    self.invalidate(&browser).await;
                    return Err(e);
                }
            };

            let outcome = until_deadline(deadline, timeout, load_content(&page, url)).await;

            if let Err(e) = page.close().await {
                warn!("Failed to close rendered page: {}", e);
            }
            outcome
        }
    }

}
