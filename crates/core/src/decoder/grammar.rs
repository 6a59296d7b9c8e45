//! The trace wire format.
//!
//! One compiled pattern splits a trace line into its fields:
//!
//! ```text
//! [+][header:][time][ ]<indent A-Z>[fiber]<type><id>[(args)|[index]|]][=result]rest
//! ```

use std::sync::LazyLock;

use regex::Regex;

static TRACE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\+)?(?:([A-Za-z_][\w.]*):)?(\d*)\s?([A-Z])([^A-Za-z0-9])?([A-Za-z])(\d+)(?:\(([^)]*)\)?|\[([^\]]*)\]|\])?(?:=(-?\d+))?(.*)$",
    )
    .expect("trace grammar compiles")
});

/// One trace line split into fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent<'a> {
    /// `+` prefix: the time is relative to the previous line.
    pub relative: bool,
    /// Optional `header:` prefix.
    pub header: Option<&'a str>,
    /// Timestamp digits, if any.
    pub time: Option<u64>,
    /// Call depth from the indent letter (`A` = 0).
    pub depth: usize,
    /// Fiber marker.
    pub fiber: Option<char>,
    /// Event type letter.
    pub kind: char,
    /// Numeric id; `u32::MAX` when the digits overflow.
    pub id: u32,
    /// Text inside `( )`.
    pub args: Option<&'a str>,
    /// Text inside `[ ]`.
    pub index: Option<&'a str>,
    /// Value after `=`.
    pub result: Option<i64>,
    /// Anything after the recognized fields.
    pub rest: &'a str,
}

/// Split `line` per the trace grammar, or `None` for non-trace text.
pub fn parse_event(line: &str) -> Option<TraceEvent<'_>> {
    let caps = TRACE_LINE.captures(line)?;
    let text = |i: usize| caps.get(i).map(|m| m.as_str());

    let indent = text(4)?.bytes().next()?;
    let kind = text(6)?.chars().next()?;
    Some(TraceEvent {
        relative: text(1).is_some(),
        header: text(2),
        time: text(3).filter(|t| !t.is_empty()).and_then(|t| t.parse().ok()),
        depth: usize::from(indent - b'A'),
        fiber: text(5).and_then(|f| f.chars().next()),
        kind,
        id: text(7)?.parse().unwrap_or(u32::MAX),
        args: text(8),
        index: text(9),
        result: text(10).and_then(|r| r.parse().ok()),
        rest: text(11).unwrap_or_default(),
    })
}
