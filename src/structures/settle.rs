use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::Instant;

use super::errors::OffwatchError;
use super::page::PageSource;
use super::scraper::count_checking;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        SettlePolicy {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Settled { polls: u32 },
    /// Gave up waiting; the pass carries on with whatever is on the page.
    TimedOut { polls: u32, still_checking: usize },
}

/// Poll the page until no row is checking or the timeout elapses.
///
/// Every poll refreshes the page first. A failed refresh aborts the wait.
pub async fn wait_until_settled(
    page: &mut dyn PageSource,
    policy: SettlePolicy,
) -> Result<SettleOutcome, OffwatchError> {
    let started = Instant::now();
    let mut polls = 0;

    loop {
        page.refresh().await?;
        polls += 1;

        let checking = count_checking(page).await?;
        if checking == 0 {
            info!("dashboard settled after {} poll(s)", polls);
            return Ok(SettleOutcome::Settled { polls });
        }

        let elapsed = started.elapsed();
        if elapsed + policy.poll_interval > policy.timeout {
            warn!(
                "dashboard still has {} checking row(s) after {:?}, proceeding anyway",
                checking, elapsed
            );
            return Ok(SettleOutcome::TimedOut {
                polls,
                still_checking: checking,
            });
        }

        debug!("{} row(s) still checking, polling again in {:?}", checking, policy.poll_interval);
        tokio::time::sleep(policy.poll_interval).await;
    }
}
