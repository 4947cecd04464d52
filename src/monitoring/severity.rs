//! Event severity: a level plus notification routing bits

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ordered importance of an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Debug = 0,
    #[default]
    Info = 1,
    Warning = 2,
    Error = 3,
    Fatal = 4,
}

impl Level {
    fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Level::Debug),
            1 => Some(Level::Info),
            2 => Some(Level::Warning),
            3 => Some(Level::Error),
            4 => Some(Level::Fatal),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

const NOTIFY_BIT: i32 = 0x100;
const EMAIL_BIT: i32 = 0x200;
const SMS_BIT: i32 = 0x400;
const LEVEL_MASK: i32 = 0xff;

/// Severity of a monitoring event
///
/// Thresholds compare levels only. The notification bits decide which
/// notification channels an accepted event is routed to; email and sms
/// always imply the plain notification channel.
///
/// Written as `level[+notify|+email|+sms]`, e.g. `"error+email"`, and stored
/// as an integer code with the level in the low byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Severity {
    level: Level,
    notify: bool,
    email: bool,
    sms: bool,
}

impl Severity {
    pub const DEBUG: Severity = Severity::new(Level::Debug);
    pub const INFO: Severity = Severity::new(Level::Info);
    pub const WARNING: Severity = Severity::new(Level::Warning);
    pub const ERROR: Severity = Severity::new(Level::Error);
    pub const FATAL: Severity = Severity::new(Level::Fatal);

    pub const fn new(level: Level) -> Self {
        Self {
            level,
            notify: false,
            email: false,
            sms: false,
        }
    }

    pub const fn with_notify(mut self) -> Self {
        self.notify = true;
        self
    }

    pub const fn with_email(mut self) -> Self {
        self.notify = true;
        self.email = true;
        self
    }

    pub const fn with_sms(mut self) -> Self {
        self.notify = true;
        self.sms = true;
        self
    }

    pub fn level(self) -> Level {
        self.level
    }

    pub fn notifies(self) -> bool {
        self.notify
    }

    pub fn emails(self) -> bool {
        self.email
    }

    pub fn texts(self) -> bool {
        self.sms
    }

    /// Threshold check, ignoring notification bits
    pub fn reaches(self, threshold: Severity) -> bool {
        self.level >= threshold.level
    }

    pub fn code(self) -> i32 {
        let mut code = self.level as i32;
        if self.notify {
            code |= NOTIFY_BIT;
        }
        if self.email {
            code |= EMAIL_BIT;
        }
        if self.sms {
            code |= SMS_BIT;
        }
        code
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let level = Level::from_code(code & LEVEL_MASK)?;
        Some(Self {
            level,
            notify: code & (NOTIFY_BIT | EMAIL_BIT | SMS_BIT) != 0,
            email: code & EMAIL_BIT != 0,
            sms: code & SMS_BIT != 0,
        })
    }
}

impl From<Level> for Severity {
    fn from(level: Level) -> Self {
        Severity::new(level)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.level.as_str())?;
        if self.email {
            f.write_str("+email")?;
        }
        if self.sms {
            f.write_str("+sms")?;
        }
        if self.notify && !self.email && !self.sms {
            f.write_str("+notify")?;
        }
        Ok(())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('+').map(|part| part.trim().to_ascii_lowercase());

        let level = match parts.next().as_deref() {
            Some("debug") => Level::Debug,
            Some("info") => Level::Info,
            Some("warning") | Some("warn") => Level::Warning,
            Some("error") => Level::Error,
            Some("fatal") => Level::Fatal,
            _ => return Err(format!("unknown severity level in '{s}'")),
        };

        parts.try_fold(Severity::new(level), |severity, flag| match flag.as_str() {
            "notify" => Ok(severity.with_notify()),
            "email" => Ok(severity.with_email()),
            "sms" => Ok(severity.with_sms()),
            other => Err(format!("unknown severity flag '{other}'")),
        })
    }
}

impl TryFrom<String> for Severity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Severity> for String {
    fn from(severity: Severity) -> Self {
        severity.to_string()
    }
}
