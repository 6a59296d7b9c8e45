//! Secondary patterns for lines that are not trace events.
//!
//! Tried in a fixed order; the protocol-return pattern is broad and must
//! stay after the more specific ones.

use std::sync::LazyLock;

use regex::Regex;

static DSID_TRAP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^DSID\s+(TRAP|ERROR)\s*:?\s*(\d+)(.*)$").expect("dsid trap pattern compiles")
});

static STATE_CHANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w+)\s+state\s*:?\s*(\d+)\s*->\s*(\d+)").expect("state pattern compiles")
});

static FLASH_READY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)ready for (data|firmware)").expect("flash ready pattern compiles")
});

static PROTOCOL_RETURN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([^;]*);\s*$").expect("return pattern compiles"));

static SENTINEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(ERROR|UNKNOWN)\b").expect("sentinel pattern compiles"));

/// Machine state names by number.
pub const STATE_NAMES: [&str; 9] = [
    "IDLE", "INIT", "READY", "BUSY", "PRINTING", "PAUSED", "ERROR", "SLEEP", "FLASH",
];

/// Name of machine state `n`, or the number itself.
pub fn state_name(n: u32) -> String {
    usize::try_from(n)
        .ok()
        .and_then(|i| STATE_NAMES.get(i))
        .map_or_else(|| n.to_string(), |s| (*s).to_string())
}

/// What a non-trace line turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackLine<'a> {
    /// `DSID TRAP|ERROR <id>`.
    DsidTrap {
        /// `TRAP` or `ERROR`.
        kind: &'a str,
        /// DSID number.
        id: u32,
        /// Text after the id.
        rest: &'a str,
    },
    /// `<machine> state <old> -> <new>`.
    StateChange {
        /// State machine name.
        machine: &'a str,
        /// Previous state number.
        from: u32,
        /// New state number.
        to: u32,
    },
    /// The target asks for the firmware payload.
    FlashReady,
    /// Reply to a query: `payload;` or an `ERROR`/`UNKNOWN` sentinel.
    Reply(&'a str),
    /// Anything else.
    Text,
}

/// Classify `line`, trying the patterns in order.
pub fn classify(line: &str) -> FallbackLine<'_> {
    if let Some(caps) = DSID_TRAP.captures(line)
        && let Ok(id) = caps[2].parse()
    {
        return FallbackLine::DsidTrap {
            kind: caps.get(1).map_or("", |m| m.as_str()),
            id,
            rest: caps.get(3).map_or("", |m| m.as_str()),
        };
    }
    if let Some(caps) = STATE_CHANGE.captures(line)
        && let (Ok(from), Ok(to)) = (caps[2].parse(), caps[3].parse())
    {
        return FallbackLine::StateChange {
            machine: caps.get(1).map_or("", |m| m.as_str()),
            from,
            to,
        };
    }
    if FLASH_READY.is_match(line) {
        return FallbackLine::FlashReady;
    }
    if let Some(caps) = PROTOCOL_RETURN.captures(line) {
        return FallbackLine::Reply(caps.get(1).map_or("", |m| m.as_str().trim()));
    }
    if SENTINEL.is_match(line) {
        return FallbackLine::Reply(line.trim());
    }
    FallbackLine::Text
}
