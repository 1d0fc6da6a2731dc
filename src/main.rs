mod structures;

use std::{path::Path, process::ExitCode, sync::RwLock, time::Duration};

use actix_web::{get, middleware::Logger, web, App, HttpResponse, HttpServer};
use askama::Template;
use clap::{Parser, ValueEnum};
use log::{error, info};
use reqwest::Client;

use crate::structures::{
    cache::DailyCache,
    clock::{parse_offset, SystemClock},
    config::Config,
    controller::{RunController, RunOptions, RunReport},
    errors::OffwatchError,
    notify::{LogNotifier, Notifier, TwilioNotifier, TwilioOptions},
    page::ChromePage,
    settle::SettleOutcome,
};

type LatestReport = RwLock<Option<RunReport>>;

#[derive(Debug, Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    started_at: String,
    state: String,
    decision: String,
    settle: String,
    notify_error: String,
    error: String,
    rows: Vec<(String, String)>,
    skipped: Vec<(usize, String)>,
    date: String,
    alerted: Vec<String>,
    sent_all_clear: bool,
    cache_persisted: bool,
}

impl IndexTemplate {
    fn new(report: Option<&RunReport>, cache_path: &Path) -> Self {
        let Some(report) = report else {
            return IndexTemplate {
                started_at: String::new(),
                state: String::new(),
                decision: String::new(),
                settle: String::new(),
                notify_error: String::new(),
                error: String::new(),
                rows: Vec::new(),
                skipped: Vec::new(),
                date: String::new(),
                alerted: Vec::new(),
                sent_all_clear: false,
                cache_persisted: false,
            };
        };

        let cache = DailyCache::load(cache_path);
        let today = cache.get(&report.date).cloned().unwrap_or_default();
        IndexTemplate {
            started_at: report.started_at.clone(),
            state: report.state.to_string(),
            decision: report
                .decision
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "none".to_string()),
            settle: match report.settle {
                Some(SettleOutcome::Settled { polls }) => format!("settled after {polls} poll(s)"),
                Some(SettleOutcome::TimedOut { polls, still_checking }) => format!(
                    "gave up after {polls} poll(s) with {still_checking} row(s) still checking"
                ),
                None => "not reached".to_string(),
            },
            notify_error: report.notify_error.clone().unwrap_or_default(),
            error: report.error.clone().unwrap_or_default(),
            rows: report
                .observations
                .iter()
                .map(|o| (o.url.clone(), o.status.to_string()))
                .collect(),
            skipped: report
                .skipped
                .iter()
                .map(|s| (s.index, s.reason.clone()))
                .collect(),
            date: report.date.clone(),
            alerted: today.alerted_offline,
            sent_all_clear: today.sent_all_clear,
            cache_persisted: report.cache_persisted,
        }
    }
}

#[get("/")]
pub async fn index_handler(
    latest: web::Data<LatestReport>,
    config: web::Data<Config>,
) -> Result<HttpResponse, OffwatchError> {
    let index = {
        let latest = latest
            .read()
            .map_err(|e| OffwatchError::Other(format!("report lock poisoned: {e}")))?;
        IndexTemplate::new(latest.as_ref(), Path::new(&config.cache_path))
    };
    Ok(HttpResponse::Ok()
        .content_type("text/html")
        .body(index.render()?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// one check, non-zero exit if it failed
    Once,
    /// check every `watch_interval_secs`
    Watch,
    /// watch plus a status page
    Serve,
}

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// path to config file
    #[arg(long, env, default_value = "./config.yaml")]
    config_path: String,

    #[arg(long, env, value_enum, default_value_t = Mode::Once)]
    mode: Mode,

    /// address for the status page in serve mode
    #[arg(long, env, default_value = "0.0.0.0:8080")]
    bind: String,

    /// log messages instead of sending SMS
    #[arg(long, env)]
    dry_run: bool,

    #[arg(long, env)]
    twilio_account_sid: Option<String>,

    #[arg(long, env, hide_env_values = true)]
    twilio_auth_token: Option<String>,

    /// sender number
    #[arg(long, env)]
    twilio_phone: Option<String>,

    /// recipient number
    #[arg(long, env)]
    my_phone: Option<String>,
}

impl Args {
    fn notifier(&self) -> Result<Box<dyn Notifier>, OffwatchError> {
        if self.dry_run {
            return Ok(Box::new(LogNotifier));
        }
        match (
            &self.twilio_account_sid,
            &self.twilio_auth_token,
            &self.twilio_phone,
            &self.my_phone,
        ) {
            (Some(sid), Some(token), Some(from), Some(to)) => Ok(Box::new(TwilioNotifier::new(
                Client::new(),
                TwilioOptions {
                    account_sid: sid.clone(),
                    auth_token: token.clone(),
                    from_number: from.clone(),
                    to_number: to.clone(),
                },
            ))),
            _ => Err(OffwatchError::Other(
                "TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN, TWILIO_PHONE and MY_PHONE are required unless --dry-run is set".to_string(),
            )),
        }
    }
}

fn page_for(config: &Config) -> ChromePage {
    ChromePage::new(&config.chrome_bin, &config.dashboard_url, config.render_budget_ms)
}

/// Run a pass every `watch_interval_secs`, forever.
async fn watch(
    config: &Config,
    controller: &RunController<'_>,
    latest: Option<&LatestReport>,
) -> Result<(), OffwatchError> {
    let interval = Duration::from_secs(config.watch_interval_secs);
    info!("continuous monitoring of {}", config.dashboard_url);
    loop {
        let report = controller.run(&mut page_for(config)).await;
        if report.failed() {
            error!("check failed, trying again next round");
        }
        if let Some(latest) = latest {
            let mut slot = latest
                .write()
                .map_err(|e| OffwatchError::Other(format!("report lock poisoned: {e}")))?;
            *slot = Some(report);
        }
        info!("next check in {} seconds", interval.as_secs());
        tokio::time::sleep(interval).await;
    }
}

#[actix_web::main]
async fn main() -> Result<ExitCode, OffwatchError> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args = Args::parse();
    info!("Started in {:?} mode", args.mode);

    let config = Config::load(Path::new(&args.config_path))?;
    let clock = SystemClock::new(parse_offset(&config.utc_offset)?);
    let notifier = args.notifier()?;

    match args.mode {
        Mode::Once => {
            let controller = RunController::new(
                RunOptions::from(&config),
                &config.cache_path,
                config.retain_days,
                &clock,
                &*notifier,
            );
            let report = controller.run(&mut page_for(&config)).await;
            Ok(match report.failed() {
                true => ExitCode::FAILURE,
                false => ExitCode::SUCCESS,
            })
        }
        Mode::Watch => {
            let controller = RunController::new(
                RunOptions::from(&config),
                &config.cache_path,
                config.retain_days,
                &clock,
                &*notifier,
            );
            watch(&config, &controller, None).await?;
            Ok(ExitCode::SUCCESS)
        }
        Mode::Serve => {
            let latest = web::Data::new(LatestReport::new(None));
            let config = web::Data::new(config);

            let loop_latest = latest.clone();
            let loop_config = config.clone();
            actix_web::rt::spawn(async move {
                let controller = RunController::new(
                    RunOptions::from(loop_config.get_ref()),
                    &loop_config.cache_path,
                    loop_config.retain_days,
                    &clock,
                    &*notifier,
                );
                if let Err(e) = watch(&loop_config, &controller, Some(loop_latest.get_ref())).await {
                    error!("monitoring loop stopped: {}", e);
                }
            });

            HttpServer::new(move || {
                App::new()
                    .wrap(Logger::default())
                    .app_data(latest.clone())
                    .app_data(config.clone())
                    .service(index_handler)
            })
            .bind(&args.bind)?
            .run()
            .await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
