//! Structured console-line parser.
//!
//! A console line is either *structured* — it begins with the fixed tag
//! opener `<line ` and ends with `</line>` — or *raw*. Structured lines
//! carry a `key="value"` attribute block followed by the free-text payload
//! between the attribute block's closing `>` and the line's closing tag:
//!
//! ```text
//! <line seq="ab" pw="0" pr="0" time="10:00:00" exec="router" pid="1a4"
//!  tid="8" status="ff" type="1" sev="2" color="3" addin="MAIL">Server started</line>
//! ```
//!
//! `seq` and `status` are hex; `pid`/`tid` radix depends on the remote OS
//! family (hex on Windows, decimal elsewhere). Any structural or numeric
//! defect degrades the whole line to a raw record carrying the original
//! text with no flags set; the parser never fails.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{ConsoleLine, ServerOs};

const TAG_OPEN: &str = "<line ";
const TAG_CLOSE: &str = "</line>";

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([a-z]+)="([^"]*)""#).unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Splits inbound console text into individual lines
///
/// Lines are split on `\n`; a trailing bare carriage return on each line is
/// stripped. Empty trailing fragments (from a terminating newline) are
/// dropped.
pub fn split_console_text(text: &str) -> Vec<&str> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .collect()
}

/// Parses one console line, degrading to raw on any defect
#[must_use]
pub fn parse_line(line: &str, os: ServerOs) -> ConsoleLine {
    parse_structured(line, os).unwrap_or_else(|| ConsoleLine::raw(line))
}

/// Attempts the structured parse; `None` means "treat as raw"
fn parse_structured(line: &str, os: ServerOs) -> Option<ConsoleLine> {
    let line = line.trim_end_matches('\r');
    if !line.starts_with(TAG_OPEN) || !line.ends_with(TAG_CLOSE) {
        return None;
    }
    let inner = &line[TAG_OPEN.len()..line.len() - TAG_CLOSE.len()];
    let attrs_end = inner.find('>')?;
    let attr_block = &inner[..attrs_end];
    let text = &inner[attrs_end + 1..];

    let mut parsed = ConsoleLine {
        text: text.to_string(),
        ..ConsoleLine::default()
    };
    let pid_radix = os.pid_radix();

    for caps in attr_regex().captures_iter(attr_block) {
        let key = caps.get(1)?.as_str();
        let value = caps.get(2)?.as_str();
        match key {
            "seq" => parsed.seq = u64::from_str_radix(value, 16).ok()?,
            "pw" => parsed.password_request = parse_flag(value)?,
            "pr" => parsed.prompt_request = parse_flag(value)?,
            "time" => parsed.timestamp = value.to_string(),
            "exec" => parsed.exec_name = value.to_string(),
            "pid" => parsed.pid = u64::from_str_radix(value, pid_radix).ok()?,
            "tid" => parsed.tid = u64::from_str_radix(value, pid_radix).ok()?,
            "status" => parsed.status = u64::from_str_radix(value, 16).ok()?,
            "type" => parsed.msg_type = value.parse().ok()?,
            "sev" => parsed.severity = value.parse().ok()?,
            "color" => parsed.color = value.parse().ok()?,
            "addin" => parsed.addin = value.to_string(),
            // Attributes from newer servers pass through unparsed.
            _ => {}
        }
    }
    Some(parsed)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "1" | "true" => Some(true),
        "0" | "false" | "" => Some(false),
        _ => None,
    }
}
