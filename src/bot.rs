use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use teloxide::utils::command::{BotCommands, ParseError};
use tracing::{error, info, warn};

use crate::aprs::AprsClient;
use crate::config::Config;
use crate::scheduler::{ActiveJob, Scheduler};
use crate::settings::{ChatSettings, SettingsStore};

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub settings: SettingsStore,
    pub scheduler: Scheduler,
    pub aprs: AprsClient,
}

impl AppState {
    pub fn new(config: Config, scheduler: Scheduler) -> Result<Self> {
        let settings = SettingsStore::new(config.defaults.clone());
        let aprs = AprsClient::new(config.aprs.clone())?;
        Ok(Self {
            config,
            settings,
            scheduler,
            aprs,
        })
    }
}

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(
    rename_rule = "lowercase",
    description = "These commands are supported:"
)]
pub enum Command {
    #[command(description = "start periodic station reports for this chat")]
    Start,
    #[command(description = "stop periodic reports")]
    Stop,
    #[command(
        description = "set the tracked callsign",
        aliases = ["setcallsign"],
        parse_with = rest_of_line
    )]
    SetStation(String),
    #[command(
        description = "set the report interval in seconds",
        parse_with = rest_of_line
    )]
    SetInterval(String),
    #[command(description = "show this chat's callsign and interval")]
    ShowSettings,
    #[command(description = "list active report jobs across all chats")]
    ListJobs,
    #[command(description = "show this help text")]
    Help,
}

// Hand the raw argument text to the handler unchanged, empty included, so
// missing or malformed arguments get a targeted rejection reply instead of
// silently failing the command match.
fn rest_of_line(input: String) -> Result<(String,), ParseError> {
    Ok((input,))
}

/// Start the Telegram bot
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let bot = Bot::new(&state.config.telegram.bot_token);

    info!("Starting Telegram bot...");

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register command menu: {}", e);
    }

    let handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(dptree::endpoint(handle_unrecognized));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("bot"))
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let chat_id = msg.chat.id;
    info!("Command from chat {}: {:?}", chat_id, cmd);

    match cmd {
        Command::Start => start(&bot, chat_id, &state).await?,
        Command::Stop => stop(&bot, chat_id, &state).await?,
        Command::SetStation(arg) => set_station(&bot, chat_id, &state, &arg).await?,
        Command::SetInterval(arg) => set_interval(&bot, chat_id, &state, &arg).await?,
        Command::ShowSettings => show_settings(&bot, chat_id, &state).await?,
        Command::ListJobs => list_jobs(&bot, chat_id, &state).await?,
        Command::Help => {
            bot.send_message(chat_id, Command::descriptions().to_string())
                .await?;
        }
    }

    Ok(())
}

async fn handle_unrecognized(bot: Bot, msg: Message) -> ResponseResult<()> {
    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            bot.send_message(msg.chat.id, "Unrecognized command. See /help.")
                .await?;
        }
    }
    Ok(())
}

async fn start(bot: &Bot, chat_id: ChatId, state: &Arc<AppState>) -> ResponseResult<()> {
    let settings = state.settings.ensure(chat_id.0).await;

    bot.send_message(chat_id, start_summary(&settings)).await?;

    if let Err(e) = arm_reports(state, bot, chat_id, settings.interval_seconds).await {
        error!("Failed to arm reports for chat {}: {:#}", chat_id, e);
        bot.send_message(chat_id, "Failed to schedule reports. Please try again.")
            .await?;
    }

    Ok(())
}

async fn stop(bot: &Bot, chat_id: ChatId, state: &Arc<AppState>) -> ResponseResult<()> {
    match state.scheduler.disarm(chat_id.0).await {
        Ok(true) => bot.send_message(chat_id, "Stopped.").await?,
        Ok(false) => {
            bot.send_message(chat_id, "No active jobs for this chat.")
                .await?
        }
        Err(e) => {
            error!("Failed to disarm chat {}: {:#}", chat_id, e);
            bot.send_message(chat_id, "Failed to stop reports. Please try again.")
                .await?
        }
    };
    Ok(())
}

async fn set_station(
    bot: &Bot,
    chat_id: ChatId,
    state: &Arc<AppState>,
    arg: &str,
) -> ResponseResult<()> {
    let Some(station) = normalize_station(arg) else {
        bot.send_message(
            chat_id,
            "You must specify a callsign. Usage: /setstation <callsign>",
        )
        .await?;
        return Ok(());
    };

    state.settings.set_station(chat_id.0, station.clone()).await;

    // An armed chat picks the new callsign up on its next tick; no re-arm.
    bot.send_message(chat_id, format!("Callsign set to: {station}"))
        .await?;
    Ok(())
}

async fn set_interval(
    bot: &Bot,
    chat_id: ChatId,
    state: &Arc<AppState>,
    arg: &str,
) -> ResponseResult<()> {
    if arg.trim().is_empty() {
        bot.send_message(
            chat_id,
            "You must specify the interval in seconds. Usage: /setinterval 1800",
        )
        .await?;
        return Ok(());
    }

    let Some(interval) = parse_interval(arg) else {
        bot.send_message(
            chat_id,
            "Please provide a valid number of seconds (a positive integer).",
        )
        .await?;
        return Ok(());
    };

    state.settings.set_interval(chat_id.0, interval).await;

    if state.scheduler.is_armed(chat_id.0).await {
        if let Err(e) = arm_reports(state, bot, chat_id, interval).await {
            error!("Failed to re-arm chat {}: {:#}", chat_id, e);
            bot.send_message(chat_id, "Failed to reschedule reports. Please try again.")
                .await?;
            return Ok(());
        }
        bot.send_message(chat_id, format!("Interval set to {interval} seconds."))
            .await?;
    } else {
        bot.send_message(
            chat_id,
            format!("Interval set to {interval} seconds. Use /start to begin receiving reports."),
        )
        .await?;
    }

    Ok(())
}

async fn show_settings(bot: &Bot, chat_id: ChatId, state: &Arc<AppState>) -> ResponseResult<()> {
    let settings = state.settings.snapshot(chat_id.0).await;
    let armed = state.scheduler.is_armed(chat_id.0).await;

    bot.send_message(chat_id, settings_summary(&settings, armed))
        .await?;
    Ok(())
}

async fn list_jobs(bot: &Bot, chat_id: ChatId, state: &Arc<AppState>) -> ResponseResult<()> {
    let jobs = state.scheduler.list_active().await;
    bot.send_message(chat_id, format_jobs(&jobs)).await?;
    Ok(())
}

/// Register (or replace) the recurring report task for a chat. The tick
/// reads the callsign from the settings store at fire time, so a station
/// change applies on the next tick without re-arming.
async fn arm_reports(
    state: &Arc<AppState>,
    bot: &Bot,
    chat_id: ChatId,
    interval_seconds: u64,
) -> Result<()> {
    let tick_state = state.clone();
    let tick_bot = bot.clone();

    state
        .scheduler
        .arm(chat_id.0, interval_seconds, move || {
            let state = tick_state.clone();
            let bot = tick_bot.clone();
            Box::pin(async move {
                let station = state.settings.station(chat_id.0).await;
                let report = state.aprs.fetch_report(&station).await;
                if let Err(e) = bot.send_message(chat_id, report).await {
                    warn!("Failed to deliver report to chat {}: {}", chat_id, e);
                }
            }) as BoxFuture<'static, ()>
        })
        .await
}

fn normalize_station(arg: &str) -> Option<String> {
    arg.split_whitespace().next().map(|s| s.to_uppercase())
}

fn parse_interval(arg: &str) -> Option<u64> {
    arg.split_whitespace()
        .next()?
        .parse::<u64>()
        .ok()
        .filter(|n| *n > 0)
}

fn start_summary(settings: &ChatSettings) -> String {
    format!(
        "Bot started!\n\
         Current callsign: {}\n\
         Current interval: {} seconds\n\n\
         Use /setstation <callsign> to change the callsign.\n\
         Use /setinterval <seconds> to change the interval.",
        settings.station, settings.interval_seconds
    )
}

fn settings_summary(settings: &ChatSettings, armed: bool) -> String {
    format!(
        "Callsign: {}\n\
         Interval: {} seconds\n\
         Reports: {}",
        settings.station,
        settings.interval_seconds,
        if armed { "active" } else { "stopped" }
    )
}

fn format_jobs(jobs: &[ActiveJob]) -> String {
    if jobs.is_empty() {
        return "No active jobs.".to_string();
    }

    let mut lines = vec![format!("Active jobs ({}):", jobs.len())];
    for job in jobs {
        let next = job
            .next_fire
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "n/a".to_string());
        lines.push(format!(
            "chat {}: every {} s, next fire {}",
            job.chat_id, job.interval_seconds, next
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn commands_parse() {
        assert_eq!(
            Command::parse("/start", "aprsbot").unwrap(),
            Command::Start
        );
        assert_eq!(Command::parse("/stop", "aprsbot").unwrap(), Command::Stop);
        assert_eq!(
            Command::parse("/setstation iu1olt-6", "aprsbot").unwrap(),
            Command::SetStation("iu1olt-6".to_string())
        );
        assert_eq!(
            Command::parse("/setinterval 60", "aprsbot").unwrap(),
            Command::SetInterval("60".to_string())
        );
        assert_eq!(
            Command::parse("/showsettings", "aprsbot").unwrap(),
            Command::ShowSettings
        );
        assert_eq!(
            Command::parse("/listjobs", "aprsbot").unwrap(),
            Command::ListJobs
        );
    }

    #[test]
    fn setcallsign_is_an_alias_for_setstation() {
        assert_eq!(
            Command::parse("/setcallsign ab1cde", "aprsbot").unwrap(),
            Command::SetStation("ab1cde".to_string())
        );
    }

    #[test]
    fn argument_commands_accept_missing_arguments() {
        // The handler rejects these with a usage reply; parsing must not
        // drop them on the floor.
        assert_eq!(
            Command::parse("/setstation", "aprsbot").unwrap(),
            Command::SetStation(String::new())
        );
        assert_eq!(
            Command::parse("/setinterval", "aprsbot").unwrap(),
            Command::SetInterval(String::new())
        );
    }

    #[test]
    fn station_is_uppercased() {
        assert_eq!(
            normalize_station("iu1olt-6"),
            Some("IU1OLT-6".to_string())
        );
        assert_eq!(normalize_station("OH7RDA"), Some("OH7RDA".to_string()));
        assert_eq!(normalize_station("  n0call  "), Some("N0CALL".to_string()));
        assert_eq!(normalize_station("   "), None);
        assert_eq!(normalize_station(""), None);
    }

    #[test]
    fn intervals_must_be_positive_integers() {
        assert_eq!(parse_interval("60"), Some(60));
        assert_eq!(parse_interval(" 1800 "), Some(1800));
        assert_eq!(parse_interval("abc"), None);
        assert_eq!(parse_interval("0"), None);
        assert_eq!(parse_interval("-5"), None);
        assert_eq!(parse_interval("1.5"), None);
        assert_eq!(parse_interval(""), None);
    }

    #[test]
    fn start_summary_lists_current_settings() {
        let summary = start_summary(&ChatSettings {
            station: "N0CALL-99".to_string(),
            interval_seconds: 3600,
        });

        assert!(summary.contains("Current callsign: N0CALL-99"));
        assert!(summary.contains("Current interval: 3600 seconds"));
        assert!(summary.contains("/setstation"));
        assert!(summary.contains("/setinterval"));
    }

    #[test]
    fn settings_summary_reports_armed_state() {
        let settings = ChatSettings {
            station: "IU1OLT-6".to_string(),
            interval_seconds: 60,
        };

        assert!(settings_summary(&settings, true).contains("Reports: active"));
        assert!(settings_summary(&settings, false).contains("Reports: stopped"));
    }

    #[test]
    fn format_jobs_handles_empty_and_missing_fire_times() {
        assert_eq!(format_jobs(&[]), "No active jobs.");

        let fire = chrono::Utc.with_ymd_and_hms(2026, 8, 7, 12, 30, 0).unwrap();
        let jobs = vec![
            ActiveJob {
                chat_id: 42,
                interval_seconds: 60,
                next_fire: Some(fire),
            },
            ActiveJob {
                chat_id: 99,
                interval_seconds: 3600,
                next_fire: None,
            },
        ];

        let text = format_jobs(&jobs);
        assert!(text.contains("Active jobs (2):"));
        assert!(text.contains("chat 42: every 60 s, next fire 2026-08-07 12:30:00 UTC"));
        assert!(text.contains("chat 99: every 3600 s, next fire n/a"));
    }
}
