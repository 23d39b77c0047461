use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BrowserSettings;
use crate::error::{DispatchError, Result};

/// One headless Chromium process shared by all form submissions of a source.
pub struct BrowserManager {
    browser: Mutex<Option<Browser>>,
    handler_task: Mutex<Option<JoinHandle<()>>>,
    user_data_dir: PathBuf,
}

impl BrowserManager {
    pub async fn launch(settings: &BrowserSettings, owner: &str) -> Result<Self> {
        // unique user data dir to avoid singleton lock issues
        let user_data_dir = settings
            .user_data_root
            .join(format!("{}-{}-{}", owner, std::process::id(), uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&user_data_dir)
            .map_err(|e| DispatchError::Browser(format!("Failed to create user data dir: {}", e)))?;

        let mut builder = BrowserConfig::builder().no_sandbox().args(vec![
            format!("--user-data-dir={}", user_data_dir.display()),
            "--disable-gpu".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-extensions".to_string(),
            "--no-first-run".to_string(),
            "--disable-default-apps".to_string(),
            "--window-size=1920,1080".to_string(),
        ]);
        if !settings.headless {
            builder = builder.with_head();
        }

        let browser_config = builder
            .build()
            .map_err(|e| DispatchError::Browser(format!("Failed to create browser config: {}", e)))?;

        info!("Launching browser for {}", owner);
        let launch = Browser::launch(browser_config);
        let (browser, mut handler) = match tokio::time::timeout(settings.launch_timeout, launch).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                error!("Browser launch failed for {}: {}", owner, e);
                return Err(DispatchError::from(e).into());
            }
            Err(_) => {
                return Err(DispatchError::Browser(format!(
                    "Browser launch timed out after {:?}",
                    settings.launch_timeout
                ))
                .into());
            }
        };

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {}", e);
                }
            }
            debug!("Browser handler task ended");
        });

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler_task: Mutex::new(Some(handler_task)),
            user_data_dir,
        })
    }

    pub async fn open_page(&self, url: &str) -> Result<Page> {
        let browser = self.browser.lock().await;
        let browser = browser
            .as_ref()
            .ok_or_else(|| DispatchError::Browser("Browser already shut down".to_string()))?;

        let page = browser
            .new_page(url)
            .await
            .map_err(|e| DispatchError::Browser(format!("Failed to open {}: {}", url, e)))?;
        debug!("Opened page {}", url);
        Ok(page)
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(mut browser) = self.browser.lock().await.take() {
            info!("Shutting down browser");
            if let Err(e) = browser.close().await {
                warn!("Failed to close browser cleanly: {}", e);
            }
        }
        if let Some(task) = self.handler_task.lock().await.take() {
            task.abort();
        }
        let _ = std::fs::remove_dir_all(&self.user_data_dir);
        Ok(())
    }
}
