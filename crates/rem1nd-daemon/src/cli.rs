use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand};
use rem1nd_core::{time::parse_timestamp, NewReminder, RepeatType, SmtpCredentials};

/// Email reminder daemon.
///
/// Stores reminders in SQLite and mails each one when its trigger time
/// passes, re-arming recurring ones.
#[derive(Parser, Debug)]
#[command(name = "rem1nd", version, about = "Email reminder daemon")]
pub struct CliArgs {
    /// Path to config file (default: ./rem1nd.toml)
    #[arg(long, global = true, env = "REM1ND_CONFIG")]
    pub config: Option<String>,

    /// SQLite database path, overriding `[database] path`
    #[arg(long, global = true)]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scheduler until Ctrl-C
    Run,
    /// Run one scan-and-dispatch pass and exit
    Tick {
        /// Print the tick report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create, inspect and edit reminders
    #[command(subcommand)]
    Reminder(ReminderCommand),
    /// Manage the outgoing SMTP account
    #[command(subcommand)]
    Smtp(SmtpCommand),
}

#[derive(Subcommand, Debug)]
pub enum ReminderCommand {
    /// Create a reminder
    Add(ReminderFields),
    /// List reminders ordered by trigger time
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show a single reminder
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Replace every field of a reminder and re-arm it from the new time
    Edit {
        id: i64,
        #[command(flatten)]
        fields: ReminderFields,
    },
    /// Delete a reminder
    Delete { id: i64 },
}

#[derive(Args, Debug)]
pub struct ReminderFields {
    #[arg(long)]
    pub title: String,

    /// Mail body
    #[arg(long)]
    pub content: String,

    /// Recipient address
    #[arg(long = "to")]
    pub recipient_email: String,

    /// Trigger time in local wall-clock time, `YYYY-MM-DDTHH:MM[:SS]`
    #[arg(long = "at", value_parser = parse_trigger_time)]
    pub trigger_time: NaiveDateTime,

    #[arg(
        long = "repeat",
        default_value = "none",
        value_parser = ["none", "daily", "weekly", "monthly", "yearly", "custom"]
    )]
    pub repeat_type: String,

    /// Days between occurrences for `--repeat custom`
    #[arg(long = "every")]
    pub repeat_interval: Option<i64>,
}

impl ReminderFields {
    pub fn into_new_reminder(self) -> NewReminder {
        NewReminder {
            title: self.title,
            content: self.content,
            recipient_email: self.recipient_email,
            trigger_time: self.trigger_time,
            repeat_type: RepeatType::from(self.repeat_type.as_str()),
            repeat_interval: self.repeat_interval,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum SmtpCommand {
    /// Save the SMTP account used for every delivery
    Set {
        #[command(flatten)]
        account: SmtpAccount,

        /// Send a test message with these settings first; nothing is saved if it fails
        #[arg(long)]
        verify: bool,
    },
    /// Show the active SMTP account with the password masked
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Send a test message using the saved account
    Test {
        /// Recipient (default: the sender address)
        #[arg(long)]
        to: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct SmtpAccount {
    #[arg(long)]
    pub server: String,

    /// 465 uses implicit TLS, anything else STARTTLS
    #[arg(long, default_value_t = 465)]
    pub port: u16,

    #[arg(long)]
    pub sender_email: String,

    /// Password or app authorisation code
    #[arg(long, env = "REM1ND_SMTP_PASSWORD", hide_env_values = true)]
    pub password: String,

    #[arg(long, default_value = "")]
    pub sender_name: String,
}

impl From<SmtpAccount> for SmtpCredentials {
    fn from(a: SmtpAccount) -> Self {
        SmtpCredentials {
            server: a.server,
            port: a.port,
            sender_email: a.sender_email,
            password: a.password,
            sender_name: a.sender_name,
        }
    }
}

fn parse_trigger_time(value: &str) -> Result<NaiveDateTime, String> {
    parse_timestamp(value).map_err(|e| e.to_string())
}
