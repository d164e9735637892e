use std::sync::Arc;

use anyhow::{Context, Result};
use rem1nd_core::{
    config::Rem1ndConfig, time::format_timestamp, Reminder, SmtpCredentials, SystemClock,
};
use rem1nd_mail::{Mailer, OutboundMessage, SmtpMailer};
use rem1nd_scheduler::{
    CredentialSource, EngineSettings, ReminderStore, SchedulerContext, SchedulerEngine,
    SqliteStore, TickOutcome,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::cli::{Command, ReminderCommand, SmtpCommand};

pub async fn dispatch(command: Command, config: Rem1ndConfig) -> Result<()> {
    let store = Arc::new(open_store(&config.database.path)?);
    match command {
        Command::Run => run(store, &config).await,
        Command::Tick { json } => tick(store, &config, json).await,
        Command::Reminder(cmd) => reminder(store.as_ref(), cmd),
        Command::Smtp(cmd) => smtp(store.as_ref(), &config, cmd).await,
    }
}

/// Open (and migrate) the database. Failure here is the only fatal error.
fn open_store(path: &str) -> Result<SqliteStore> {
    ensure_parent_dir(path);
    info!(path = %path, "opening SQLite database");
    let store = SqliteStore::open(path)
        .with_context(|| format!("failed to open reminder database at {path}"))?;
    info!("database migrations complete");
    Ok(store)
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

fn build_engine(store: Arc<SqliteStore>, config: &Rem1ndConfig) -> SchedulerEngine {
    let settings = EngineSettings::from_config(config);
    let ctx = SchedulerContext {
        clock: Arc::new(SystemClock::new(config.scheduler.clock)),
        store: store.clone(),
        credentials: store,
        mailer: Arc::new(SmtpMailer::new(settings.delivery_timeout)),
    };
    SchedulerEngine::new(ctx, settings)
}

async fn run(store: Arc<SqliteStore>, config: &Rem1ndConfig) -> Result<()> {
    let engine = build_engine(store, config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { engine.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, waiting for the scheduler to stop");
    let _ = shutdown_tx.send(true);
    handle.await.context("scheduler task panicked")?;
    Ok(())
}

async fn tick(store: Arc<SqliteStore>, config: &Rem1ndConfig, json: bool) -> Result<()> {
    let engine = build_engine(store, config);
    match engine.tick().await? {
        TickOutcome::Ran(report) if json => println!("{}", serde_json::to_string_pretty(&report)?),
        TickOutcome::Ran(report) => {
            if report.no_credentials {
                println!("no SMTP credentials configured; nothing sent");
            } else {
                println!(
                    "due {}, delivered {}, failed {}, skipped {}, retired {}",
                    report.due,
                    report.delivered(),
                    report.failed,
                    report.skipped,
                    report.retired + report.gave_up
                );
            }
        }
        TickOutcome::Overlapped => println!("another tick is already running"),
    }
    Ok(())
}

fn reminder(store: &SqliteStore, cmd: ReminderCommand) -> Result<()> {
    match cmd {
        ReminderCommand::Add(fields) => {
            let created = store.create(&fields.into_new_reminder())?;
            println!("created reminder #{}", created.id);
        }
        ReminderCommand::List { json } => {
            let reminders = store.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reminders)?);
            } else if reminders.is_empty() {
                println!("no reminders");
            } else {
                for r in &reminders {
                    println!("{}", summary_line(r));
                }
            }
        }
        ReminderCommand::Show { id, json } => {
            let r = store
                .get(id)?
                .with_context(|| format!("reminder #{id} not found"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&r)?);
            } else {
                print!("{}", details(&r));
            }
        }
        ReminderCommand::Edit { id, fields } => {
            let updated = store.update(id, &fields.into_new_reminder())?;
            println!(
                "updated reminder #{}; next at {}",
                updated.id,
                format_timestamp(updated.anchor())
            );
        }
        ReminderCommand::Delete { id } => {
            store.delete(id)?;
            println!("deleted reminder #{id}");
        }
    }
    Ok(())
}

async fn smtp(store: &SqliteStore, config: &Rem1ndConfig, cmd: SmtpCommand) -> Result<()> {
    let mailer = SmtpMailer::new(EngineSettings::from_config(config).delivery_timeout);
    match cmd {
        SmtpCommand::Set { account, verify } => {
            let credentials = SmtpCredentials::from(account);
            if verify {
                let message = test_message(credentials.sender_email.clone());
                mailer
                    .send(&credentials, &message)
                    .await
                    .context("test message failed; settings not saved")?;
                println!("test message sent to {}", message.to);
            }
            store.save_credentials(&credentials)?;
            println!("SMTP settings saved");
        }
        SmtpCommand::Show { json } => match store.active_credentials()? {
            Some(credentials) => {
                let view = MaskedCredentials::from(&credentials);
                if json {
                    println!("{}", serde_json::to_string_pretty(&view)?);
                } else {
                    println!("server:   {}:{}", view.server, view.port);
                    println!("tls:      {}", view.tls);
                    println!("sender:   {} <{}>", view.sender_name, view.sender_email);
                    println!("password: {}", view.password);
                }
            }
            None => println!("no SMTP credentials configured"),
        },
        SmtpCommand::Test { to } => {
            let credentials = store
                .active_credentials()?
                .context("no SMTP credentials configured; run `rem1nd smtp set` first")?;
            let message = test_message(to.unwrap_or_else(|| credentials.sender_email.clone()));
            mailer.send(&credentials, &message).await?;
            println!("test message sent to {}", message.to);
        }
    }
    Ok(())
}

fn test_message(to: String) -> OutboundMessage {
    OutboundMessage {
        to,
        subject: "rem1nd test message".to_string(),
        body: "If you can read this, the SMTP settings are working.".to_string(),
    }
}

/// SMTP settings as printed by `smtp show`.
#[derive(Debug, Serialize)]
struct MaskedCredentials {
    server: String,
    port: u16,
    tls: &'static str,
    sender_email: String,
    sender_name: String,
    password: String,
}

impl From<&SmtpCredentials> for MaskedCredentials {
    fn from(c: &SmtpCredentials) -> Self {
        Self {
            server: c.server.clone(),
            port: c.port,
            tls: if c.implicit_tls() { "implicit" } else { "starttls" },
            sender_email: c.sender_email.clone(),
            sender_name: c.sender_name.clone(),
            password: mask(&c.password),
        }
    }
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "*".repeat(8)
    }
}

fn status(r: &Reminder) -> &'static str {
    if r.sent {
        "sent"
    } else {
        "pending"
    }
}

fn summary_line(r: &Reminder) -> String {
    format!(
        "#{:<4} {:<7} {}  {:<8} {}  {}",
        r.id,
        status(r),
        format_timestamp(r.anchor()),
        r.repeat_type,
        r.recipient_email,
        r.title
    )
}

fn details(r: &Reminder) -> String {
    let mut out = format!("#{}  {}\n", r.id, r.title);
    out.push_str(&format!("to:       {}\n", r.recipient_email));
    out.push_str(&format!("status:   {}\n", status(r)));
    out.push_str(&format!("trigger:  {}\n", format_timestamp(r.trigger_time)));
    if let Some(next) = r.next_trigger_time {
        out.push_str(&format!("next:     {}\n", format_timestamp(next)));
    }
    match r.repeat_interval {
        Some(days) => out.push_str(&format!("repeat:   {} ({days} days)\n", r.repeat_type)),
        None => out.push_str(&format!("repeat:   {}\n", r.repeat_type)),
    }
    if let Some(last) = r.last_sent_time {
        out.push_str(&format!("last sent: {}\n", format_timestamp(last)));
    }
    out.push('\n');
    out.push_str(&r.content);
    out.push('\n');
    out
}
