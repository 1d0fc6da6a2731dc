use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use scraper::{ElementRef, Html, Selector};

use super::errors::OffwatchError;
use super::model::{RowSnapshot, StatusIndicator};

const ROW_SELECTOR: &str = "#tabelaUrls tbody tr";
const URL_SELECTOR: &str = "td a.url";
const STATUS_SELECTOR: &str = "td span.status";
const ICON_SELECTOR: &str = "i";

const CHROME_TIMEOUT: Duration = Duration::from_secs(30);

/// Live view of the dashboard table.
///
/// Rows are addressed by position and every call re-resolves its target, so
/// implementations must not hand out handles that outlive a call.
#[async_trait(?Send)]
pub trait PageSource {
    /// Re-read live state. Called before every settle poll and before scraping.
    async fn refresh(&mut self) -> Result<(), OffwatchError>;

    async fn row_count(&mut self) -> Result<usize, OffwatchError>;

    async fn row_at(&mut self, index: usize) -> Result<RowSnapshot, OffwatchError>;

    /// Release the underlying session. Must be safe to call more than once.
    async fn close(&mut self);
}

struct DashboardSelectors {
    row: Selector,
    url: Selector,
    status: Selector,
    icon: Selector,
}

impl DashboardSelectors {
    fn new() -> Result<Self, OffwatchError> {
        let parse = |s: &str| {
            Selector::parse(s).map_err(|e| OffwatchError::Other(format!("selector {s}: {e}")))
        };
        Ok(DashboardSelectors {
            row: parse(ROW_SELECTOR)?,
            url: parse(URL_SELECTOR)?,
            status: parse(STATUS_SELECTOR)?,
            icon: parse(ICON_SELECTOR)?,
        })
    }
}

fn indicator_from(element: ElementRef, icon: Option<ElementRef>) -> StatusIndicator {
    StatusIndicator {
        text: element.text().collect(),
        class_attr: element.value().attr("class").unwrap_or_default().to_string(),
        outer_markup: element.html(),
        nested_icon: icon.map(|i| Box::new(indicator_from(i, None))),
    }
}

/// A parsed snapshot of the dashboard markup.
pub struct HtmlPage {
    document: Html,
    selectors: DashboardSelectors,
}

impl HtmlPage {
    pub fn parse(html: &str) -> Result<Self, OffwatchError> {
        Ok(HtmlPage {
            document: Html::parse_document(html),
            selectors: DashboardSelectors::new()?,
        })
    }

    pub fn row_count(&self) -> usize {
        self.document.select(&self.selectors.row).count()
    }

    pub fn row_at(&self, index: usize) -> Result<RowSnapshot, OffwatchError> {
        let row_err = |reason: &str| OffwatchError::RowRead {
            index,
            reason: reason.to_string(),
        };

        let row = self
            .document
            .select(&self.selectors.row)
            .nth(index)
            .ok_or_else(|| row_err("row no longer present"))?;

        let url_text = row
            .select(&self.selectors.url)
            .next()
            .ok_or_else(|| row_err("missing url cell"))?
            .text()
            .collect::<String>()
            .trim()
            .to_string();
        if url_text.is_empty() {
            return Err(row_err("empty url cell"));
        }

        let status = row
            .select(&self.selectors.status)
            .next()
            .ok_or_else(|| row_err("missing status indicator"))?;
        let icon = status.select(&self.selectors.icon).next();

        Ok(RowSnapshot {
            url_text,
            indicator: indicator_from(status, icon),
        })
    }
}

#[async_trait(?Send)]
impl PageSource for HtmlPage {
    async fn refresh(&mut self) -> Result<(), OffwatchError> {
        Ok(())
    }

    async fn row_count(&mut self) -> Result<usize, OffwatchError> {
        Ok(HtmlPage::row_count(self))
    }

    async fn row_at(&mut self, index: usize) -> Result<RowSnapshot, OffwatchError> {
        HtmlPage::row_at(self, index)
    }

    async fn close(&mut self) {}
}

/// Dashboard rendered by headless Chrome; each refresh dumps a fresh DOM.
pub struct ChromePage {
    chrome_bin: String,
    url: String,
    render_budget_ms: u64,
    current: Option<HtmlPage>,
}

impl ChromePage {
    pub fn new(chrome_bin: &str, url: &str, render_budget_ms: u64) -> Self {
        ChromePage {
            chrome_bin: chrome_bin.to_string(),
            url: url.to_string(),
            render_budget_ms,
            current: None,
        }
    }

    async fn dump_dom(&self) -> Result<String, OffwatchError> {
        let profile = tempfile::tempdir()
            .map_err(|e| OffwatchError::PageLoad(format!("temp profile dir: {e}")))?;

        debug!("dumping DOM of {} with {}", self.url, self.chrome_bin);
        let output = tokio::time::timeout(
            CHROME_TIMEOUT,
            tokio::process::Command::new(&self.chrome_bin)
                .args([
                    "--headless",
                    "--no-sandbox",
                    "--disable-gpu",
                    "--disable-dev-shm-usage",
                    &format!("--user-data-dir={}", profile.path().display()),
                    &format!("--virtual-time-budget={}", self.render_budget_ms),
                    "--dump-dom",
                    &self.url,
                ])
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            OffwatchError::PageLoad(format!(
                "{} timed out after {}s",
                self.chrome_bin,
                CHROME_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|e| OffwatchError::PageLoad(format!("failed to launch {}: {e}", self.chrome_bin)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OffwatchError::PageLoad(format!(
                "{} exited with {}: {}",
                self.chrome_bin,
                output.status,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(OffwatchError::PageLoad(format!("empty DOM for {}", self.url)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn loaded(&self) -> Result<&HtmlPage, OffwatchError> {
        self.current
            .as_ref()
            .ok_or_else(|| OffwatchError::PageLoad(format!("{} not loaded yet", self.url)))
    }
}

#[async_trait(?Send)]
impl PageSource for ChromePage {
    async fn refresh(&mut self) -> Result<(), OffwatchError> {
        let html = self.dump_dom().await?;
        let page = HtmlPage::parse(&html)?;
        debug!("{} rows on {}", page.row_count(), self.url);
        self.current = Some(page);
        Ok(())
    }

    async fn row_count(&mut self) -> Result<usize, OffwatchError> {
        Ok(self.loaded()?.row_count())
    }

    async fn row_at(&mut self, index: usize) -> Result<RowSnapshot, OffwatchError> {
        self.loaded()?.row_at(index)
    }

    async fn close(&mut self) {
        if self.current.take().is_some() {
            info!("released page session for {}", self.url);
        } else {
            warn!("closing page session for {} that never loaded", self.url);
        }
    }
}
