use std::collections::HashSet;

use log::{debug, warn};

use super::classifier::{classify_indicator, matching_rule};
use super::errors::OffwatchError;
use super::model::{SkippedRow, Status, StatusObservation};
use super::page::PageSource;

#[derive(Debug, Clone, Default)]
pub struct ScrapeOutcome {
    pub observations: Vec<StatusObservation>,
    pub skipped: Vec<SkippedRow>,
}

impl ScrapeOutcome {
    /// Urls classified offline, in table order.
    pub fn offline_urls(&self) -> Vec<String> {
        self.with_status(Status::Offline)
    }

    pub fn with_status(&self, status: Status) -> Vec<String> {
        self.observations
            .iter()
            .filter(|o| o.status == status)
            .map(|o| o.url.clone())
            .collect()
    }

    /// At least one row is online and none is offline or still checking.
    pub fn confirms_all_online(&self) -> bool {
        let mut online = false;
        for o in &self.observations {
            match o.status {
                Status::Online => online = true,
                Status::Offline | Status::Checking => return false,
                Status::Unknown => {}
            }
        }
        online
    }
}

/// Read every row by position, classifying as we go.
///
/// Only a failure to count rows is fatal. A row that cannot be read is logged
/// and skipped, and a url seen twice keeps its first observation.
pub async fn scrape_rows(page: &mut dyn PageSource) -> Result<ScrapeOutcome, OffwatchError> {
    let count = page.row_count().await?;
    debug!("scraping {} rows", count);

    let mut outcome = ScrapeOutcome::default();
    let mut seen = HashSet::new();

    for index in 0..count {
        let row = match page.row_at(index).await {
            Ok(row) => row,
            Err(e) => {
                warn!("skipping row {}: {}", index, e);
                let reason = match e {
                    OffwatchError::RowRead { reason, .. } => reason,
                    other => other.to_string(),
                };
                outcome.skipped.push(SkippedRow { index, reason });
                continue;
            }
        };

        if !seen.insert(row.url_text.clone()) {
            debug!("row {} repeats {}, keeping first", index, row.url_text);
            continue;
        }

        let status = classify_indicator(&row.indicator);
        if status == Status::Unknown {
            warn!(
                "row {} ({}) has unrecognised status markup: {}",
                index, row.url_text, row.indicator.outer_markup
            );
        } else if log::log_enabled!(log::Level::Debug) {
            let rule = matching_rule(
                &row.indicator.text,
                &row.indicator.class_attr,
                row.indicator.nested_icon.as_deref().map(|i| i.class_attr.as_str()),
                &row.indicator.outer_markup,
            )
            .map(|(name, _)| name)
            .unwrap_or("none");
            debug!("row {} ({}) is {} via {}", index, row.url_text, status, rule);
        }

        outcome.observations.push(StatusObservation {
            url: row.url_text,
            status,
        });
    }

    Ok(outcome)
}

/// Count rows still checking. Unreadable rows are ignored.
pub async fn count_checking(page: &mut dyn PageSource) -> Result<usize, OffwatchError> {
    let count = page.row_count().await?;
    let mut checking = 0;
    for index in 0..count {
        if let Ok(row) = page.row_at(index).await {
            if classify_indicator(&row.indicator) == Status::Checking {
                checking += 1;
            }
        }
    }
    Ok(checking)
}
