use std::{fmt, path::PathBuf};

use log::{debug, error, info, warn};

use super::cache::DailyCache;
use super::clock::{date_key, timestamp, Clock};
use super::config::{Config, NotifyFailurePolicy};
use super::errors::OffwatchError;
use super::model::{SkippedRow, Status, StatusObservation};
use super::notify::Notifier;
use super::page::PageSource;
use super::scraper::{scrape_rows, ScrapeOutcome};
use super::settle::{wait_until_settled, SettleOutcome, SettlePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Waiting,
    Scraping,
    Classifying,
    Diffing,
    Notifying,
    Persisting,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Sites not yet alerted on today.
    Alert(Vec<String>),
    /// Every offline site was already alerted on today.
    StillOffline(Vec<String>),
    AllClear,
    Quiet,
}

impl Decision {
    pub fn message(&self, ts: &str) -> Option<String> {
        match self {
            Decision::Alert(urls) => Some(format!(
                "🚨 ALERT - {} site(s) offline at {}:\n{}",
                urls.len(),
                ts,
                urls.join("\n")
            )),
            Decision::StillOffline(urls) => Some(format!(
                "⚠️ STILL OFFLINE - {} site(s) already reported today, at {}:\n{}",
                urls.len(),
                ts,
                urls.join("\n")
            )),
            Decision::AllClear => Some(format!("✅ All sites online at {}.", ts)),
            Decision::Quiet => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Alert(urls) => write!(f, "alerted {}", urls.join(", ")),
            Decision::StillOffline(urls) => write!(f, "still offline {}", urls.join(", ")),
            Decision::AllClear => f.write_str("all clear"),
            Decision::Quiet => f.write_str("nothing to send"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub settle: SettlePolicy,
    pub failure_policy: NotifyFailurePolicy,
    pub still_offline_notice: bool,
    pub all_clear_notice: bool,
}

impl From<&Config> for RunOptions {
    fn from(config: &Config) -> Self {
        RunOptions {
            settle: SettlePolicy::from(&config.settle),
            failure_policy: config.notify_failure_policy,
            still_offline_notice: config.still_offline_notice,
            all_clear_notice: config.all_clear_notice,
        }
    }
}

/// Everything one pass saw and decided.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: RunState,
    pub date: String,
    pub started_at: String,
    pub settle: Option<SettleOutcome>,
    pub observations: Vec<StatusObservation>,
    pub skipped: Vec<SkippedRow>,
    pub decision: Option<Decision>,
    pub notify_error: Option<String>,
    pub cache_persisted: bool,
    pub error: Option<String>,
}

impl RunReport {
    fn new() -> Self {
        RunReport {
            state: RunState::Idle,
            date: String::new(),
            started_at: String::new(),
            settle: None,
            observations: Vec::new(),
            skipped: Vec::new(),
            decision: None,
            notify_error: None,
            cache_persisted: false,
            error: None,
        }
    }

    fn enter(&mut self, state: RunState) {
        debug!("run {} -> {}", self.state, state);
        self.state = state;
    }

    pub fn failed(&self) -> bool {
        self.state == RunState::Failed
    }
}

/// Split today's offline urls into those not yet alerted and those already
/// alerted, then pick the notification.
pub fn decide(
    cache: &DailyCache,
    date: &str,
    scrape: &ScrapeOutcome,
    options: &RunOptions,
) -> Decision {
    let (new_offline, stale_offline): (Vec<_>, Vec<_>) = scrape
        .offline_urls()
        .into_iter()
        .partition(|url| !cache.is_already_alerted(date, url));

    if !new_offline.is_empty() {
        return Decision::Alert(new_offline);
    }
    if !stale_offline.is_empty() {
        if options.still_offline_notice {
            return Decision::StillOffline(stale_offline);
        }
        return Decision::Quiet;
    }
    if !scrape.confirms_all_online() {
        warn!("no confirmed online rows or rows still checking, not treating {} as all clear", date);
        return Decision::Quiet;
    }
    if options.all_clear_notice && !cache.all_clear_already_sent(date) {
        return Decision::AllClear;
    }
    Decision::Quiet
}

pub struct RunController<'a> {
    options: RunOptions,
    cache_path: PathBuf,
    retain_days: Option<usize>,
    clock: &'a dyn Clock,
    notifier: &'a dyn Notifier,
}

impl<'a> RunController<'a> {
    pub fn new(
        options: RunOptions,
        cache_path: impl Into<PathBuf>,
        retain_days: Option<usize>,
        clock: &'a dyn Clock,
        notifier: &'a dyn Notifier,
    ) -> Self {
        RunController {
            options,
            cache_path: cache_path.into(),
            retain_days,
            clock,
            notifier,
        }
    }

    /// Run one monitoring pass. The page is closed on every exit path.
    pub async fn run(&self, page: &mut dyn PageSource) -> RunReport {
        let mut report = RunReport::new();
        let result = self.drive(page, &mut report).await;
        page.close().await;

        match result {
            Ok(()) => report.enter(RunState::Done),
            Err(e) => {
                error!("run failed during {}: {}", report.state, e);
                report.error = Some(e.to_string());
                report.enter(RunState::Failed);
            }
        }
        report
    }

    async fn drive(
        &self,
        page: &mut dyn PageSource,
        report: &mut RunReport,
    ) -> Result<(), OffwatchError> {
        let now = self.clock.now();
        report.date = date_key(now)?;
        report.started_at = timestamp(now)?;
        info!("starting check at {}", report.started_at);

        report.enter(RunState::Waiting);
        report.settle = Some(wait_until_settled(page, self.options.settle).await?);

        report.enter(RunState::Scraping);
        let scrape = scrape_rows(page).await?;
        report.observations = scrape.observations.clone();
        report.skipped = scrape.skipped.clone();

        // rows were classified while scraping; this step only tallies them
        report.enter(RunState::Classifying);
        let offline = scrape.offline_urls();
        let unknown = scrape.with_status(Status::Unknown);
        info!(
            "{} row(s) read, {} offline, {} unknown, {} skipped",
            scrape.observations.len(),
            offline.len(),
            unknown.len(),
            scrape.skipped.len()
        );
        if !unknown.is_empty() {
            warn!("unclassified sites: {}", unknown.join(", "));
        }

        report.enter(RunState::Diffing);
        let date = report.date.clone();
        let mut cache = DailyCache::load(&self.cache_path).with_retention(self.retain_days);
        let decision = decide(&cache, &date, &scrape, &self.options);
        report.decision = Some(decision.clone());

        let Some(message) = decision.message(&report.started_at) else {
            info!("nothing new to report for {}", date);
            return Ok(());
        };

        report.enter(RunState::Notifying);
        match &decision {
            Decision::Alert(urls) => info!("offline sites detected: {}", urls.join(", ")),
            Decision::StillOffline(urls) => info!("still offline: {}", urls.join(", ")),
            _ => info!("no offline sites on {}", date),
        }
        let delivered = match self.notifier.send(&message).await {
            Ok(()) => true,
            Err(e) => {
                error!("failed to send notification for {}: {}", date, e);
                report.notify_error = Some(e.to_string());
                false
            }
        };

        let mutated = match &decision {
            Decision::StillOffline(_) | Decision::Quiet => false,
            _ if !delivered && self.options.failure_policy == NotifyFailurePolicy::Retry => {
                warn!("leaving cache untouched so the next run retries");
                false
            }
            Decision::Alert(urls) => {
                for url in urls {
                    cache.record_alerted(&date, url);
                }
                true
            }
            Decision::AllClear => {
                cache.mark_all_clear_sent(&date);
                true
            }
        };
        if !mutated {
            return Ok(());
        }

        report.enter(RunState::Persisting);
        // a failed save is logged inside; the decision already stands
        report.cache_persisted = cache.save().is_ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::{macros::datetime, OffsetDateTime};

    use super::*;
    use crate::structures::notify::tests::RecordingNotifier;
    use crate::structures::scraper::tests::{row, FakePage};

    struct FixedClock(OffsetDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> OffsetDateTime {
            self.0
        }
    }

    const TODAY: &str = "05-03-2024";

    fn clock() -> FixedClock {
        FixedClock(datetime!(2024-03-05 10:15:00 -3))
    }

    fn options() -> RunOptions {
        RunOptions {
            settle: SettlePolicy::default(),
            failure_policy: NotifyFailurePolicy::Record,
            still_offline_notice: true,
            all_clear_notice: true,
        }
    }

    fn page_with_offline(offline: &[&str], online: &[&str]) -> FakePage {
        let mut rows: Vec<_> = offline
            .iter()
            .map(|u| row(u, "status offline", "Offline"))
            .collect();
        rows.extend(online.iter().map(|u| row(u, "status online", "Online")));
        FakePage::single(rows)
    }

    struct Harness {
        dir: tempfile::TempDir,
        clock: FixedClock,
        notifier: RecordingNotifier,
        options: RunOptions,
    }

    impl Harness {
        fn new() -> Self {
            Harness {
                dir: tempfile::tempdir().unwrap(),
                clock: clock(),
                notifier: RecordingNotifier::default(),
                options: options(),
            }
        }

        fn cache_path(&self) -> PathBuf {
            self.dir.path().join("offline_cache.json")
        }

        fn controller(&self) -> RunController<'_> {
            RunController::new(self.options, self.cache_path(), None, &self.clock, &self.notifier)
        }

        fn cache(&self) -> DailyCache {
            DailyCache::load(self.cache_path())
        }

        fn sent(&self) -> Vec<String> {
            self.notifier.sent.borrow().clone()
        }
    }

    #[tokio::test]
    async fn alerts_on_all_new_offline_sites() {
        let h = Harness::new();
        let mut page = page_with_offline(&["a.com", "b.com"], &["ok.com"]);

        let report = h.controller().run(&mut page).await;

        assert_eq!(report.state, RunState::Done);
        assert_eq!(
            report.decision,
            Some(Decision::Alert(vec!["a.com".into(), "b.com".into()]))
        );
        assert_eq!(
            h.sent(),
            vec!["🚨 ALERT - 2 site(s) offline at 05-03-2024 10:15:00:\na.com\nb.com".to_string()]
        );
        assert!(report.cache_persisted);
        let cache = h.cache();
        assert!(cache.is_already_alerted(TODAY, "a.com"));
        assert!(cache.is_already_alerted(TODAY, "b.com"));
        assert!(!cache.is_already_alerted(TODAY, "ok.com"));
        assert!(page.closed);
    }

    #[tokio::test]
    async fn second_run_alerts_only_the_newcomer() {
        let h = Harness::new();
        h.controller()
            .run(&mut page_with_offline(&["a.com", "b.com"], &[]))
            .await;

        let report = h
            .controller()
            .run(&mut page_with_offline(&["a.com", "b.com", "c.com"], &[]))
            .await;

        assert_eq!(report.decision, Some(Decision::Alert(vec!["c.com".into()])));
        let sent = h.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].contains("1 site(s) offline"));
        assert!(sent[1].ends_with("\nc.com"));
        assert_eq!(
            h.cache().get(TODAY).unwrap().alerted_offline,
            vec!["a.com".to_string(), "b.com".to_string(), "c.com".to_string()]
        );
    }

    #[tokio::test]
    async fn unchanged_offline_set_is_not_realerted() {
        let mut h = Harness::new();
        h.options.still_offline_notice = false;
        h.controller()
            .run(&mut page_with_offline(&["a.com"], &["b.com"]))
            .await;
        let report = h
            .controller()
            .run(&mut page_with_offline(&["a.com"], &["b.com"]))
            .await;

        assert_eq!(report.decision, Some(Decision::Quiet));
        assert_eq!(h.sent().len(), 1);
    }

    #[tokio::test]
    async fn still_offline_notice_leaves_cache_alone() {
        let h = Harness::new();
        h.controller().run(&mut page_with_offline(&["a.com"], &[])).await;
        let before = std::fs::read_to_string(h.cache_path()).unwrap();

        let report = h.controller().run(&mut page_with_offline(&["a.com"], &[])).await;

        assert_eq!(report.decision, Some(Decision::StillOffline(vec!["a.com".into()])));
        assert!(!report.cache_persisted);
        assert!(h.sent()[1].starts_with("⚠️ STILL OFFLINE - 1 site(s)"));
        assert_eq!(std::fs::read_to_string(h.cache_path()).unwrap(), before);
    }

    #[tokio::test]
    async fn all_clear_goes_out_once_per_day() {
        let h = Harness::new();
        for _ in 0..4 {
            h.controller()
                .run(&mut page_with_offline(&[], &["a.com", "b.com"]))
                .await;
        }

        assert_eq!(h.sent(), vec!["✅ All sites online at 05-03-2024 10:15:00.".to_string()]);
        assert!(h.cache().all_clear_already_sent(TODAY));
    }

    #[tokio::test]
    async fn all_clear_can_be_disabled() {
        let mut h = Harness::new();
        h.options.all_clear_notice = false;
        let report = h.controller().run(&mut page_with_offline(&[], &["a.com"])).await;
        assert_eq!(report.decision, Some(Decision::Quiet));
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn unreadable_table_is_not_all_clear() {
        let h = Harness::new();
        let mut page = FakePage::new(vec![vec![None, None]]);
        let report = h.controller().run(&mut page).await;

        assert_eq!(report.state, RunState::Done);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.decision, Some(Decision::Quiet));
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn broken_row_does_not_stop_the_run() {
        let h = Harness::new();
        let mut page = FakePage::new(vec![vec![
            Some(row("a.com", "status offline", "Offline")),
            None,
            Some(row("c.com", "status offline", "Offline")),
        ]]);

        let report = h.controller().run(&mut page).await;

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].index, 1);
        assert_eq!(
            report.decision,
            Some(Decision::Alert(vec!["a.com".into(), "c.com".into()]))
        );
    }

    #[tokio::test]
    async fn failed_delivery_is_recorded_by_default() {
        let mut h = Harness::new();
        h.notifier.failing = true;
        let report = h.controller().run(&mut page_with_offline(&["a.com"], &[])).await;

        assert_eq!(report.state, RunState::Done);
        assert!(report.notify_error.is_some());
        assert!(report.cache_persisted);
        assert!(h.cache().is_already_alerted(TODAY, "a.com"));
    }

    #[tokio::test]
    async fn retry_policy_keeps_cache_on_failed_delivery() {
        let mut h = Harness::new();
        h.notifier.failing = true;
        h.options.failure_policy = NotifyFailurePolicy::Retry;

        let report = h.controller().run(&mut page_with_offline(&["a.com"], &[])).await;
        assert!(!report.cache_persisted);
        assert!(!h.cache().is_already_alerted(TODAY, "a.com"));

        h.notifier.failing = false;
        let report = h.controller().run(&mut page_with_offline(&["a.com"], &[])).await;
        assert_eq!(report.decision, Some(Decision::Alert(vec!["a.com".into()])));
        assert!(h.cache().is_already_alerted(TODAY, "a.com"));
    }

    #[tokio::test]
    async fn page_failure_ends_failed_without_touching_cache() {
        let h = Harness::new();
        let mut page = page_with_offline(&["a.com"], &[]);
        page.fail_refresh = true;

        let report = h.controller().run(&mut page).await;

        assert!(report.failed());
        assert!(report.error.is_some());
        assert!(page.closed);
        assert!(h.sent().is_empty());
        assert!(!h.cache_path().exists());
    }

    #[tokio::test]
    async fn new_day_starts_fresh() {
        let mut h = Harness::new();
        h.controller().run(&mut page_with_offline(&["a.com"], &[])).await;

        h.clock = FixedClock(datetime!(2024-03-06 08:00:00 -3));
        let report = h.controller().run(&mut page_with_offline(&["a.com"], &[])).await;

        assert_eq!(report.date, "06-03-2024");
        assert_eq!(report.decision, Some(Decision::Alert(vec!["a.com".into()])));
        assert!(h.cache().is_already_alerted(TODAY, "a.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn table_still_checking_after_timeout_is_not_all_clear() {
        let mut h = Harness::new();
        h.options.settle = SettlePolicy {
            timeout: std::time::Duration::from_secs(4),
            poll_interval: std::time::Duration::from_secs(2),
        };
        let mut page = FakePage::single(vec![
            row("a.com", "status checking", ""),
            row("b.com", "status", "Verificando"),
        ]);

        let report = h.controller().run(&mut page).await;

        assert!(matches!(
            report.settle,
            Some(SettleOutcome::TimedOut { still_checking: 2, .. })
        ));
        assert_eq!(report.decision, Some(Decision::Quiet));
        assert!(h.sent().is_empty());
        assert!(!h.cache().all_clear_already_sent(TODAY));

        // the real all-clear still goes out once the checks finish
        let report = h
            .controller()
            .run(&mut page_with_offline(&[], &["a.com", "b.com"]))
            .await;
        assert_eq!(report.decision, Some(Decision::AllClear));
        assert_eq!(h.sent().len(), 1);
    }
}
