//! Property-based tests for console-line parsing
//!
//! A structured line formatted from arbitrary field values must parse back
//! to exactly those values, and no input whatsoever may panic the parser;
//! anything defective degrades to a raw line carrying the original text.

use proptest::prelude::*;

use rustadmin_core::console::parse_line;
use rustadmin_core::models::{ConsoleLine, EventFilter, ServerOs};

fn arb_fields() -> impl Strategy<Value = ConsoleLine> {
    (
        any::<u64>(),                  // seq
        any::<bool>(),                 // password flag
        any::<bool>(),                 // prompt flag
        "[0-9]{2}:[0-9]{2}:[0-9]{2}",  // timestamp
        "[a-z]{1,12}",                 // exec name
        any::<u32>(),                  // pid (kept in u32 range)
        any::<u32>(),                  // tid
        (
            any::<u16>(),              // status
            0u32..100,                 // type
            0u32..6,                   // severity
            0u32..16,                  // color
            "[A-Z]{0,8}",              // add-in
            "[a-zA-Z0-9 .,;:_-]{0,60}", // payload
        ),
    )
        .prop_map(
            |(seq, pw, pr, timestamp, exec_name, pid, tid, (status, msg_type, severity, color, addin, text))| {
                ConsoleLine {
                    seq,
                    timestamp,
                    exec_name,
                    pid: u64::from(pid),
                    tid: u64::from(tid),
                    status: u64::from(status),
                    msg_type,
                    severity,
                    color,
                    addin,
                    text,
                    password_request: pw,
                    prompt_request: pr,
                }
            },
        )
}

fn format_line(line: &ConsoleLine, os: ServerOs) -> String {
    let (pid, tid) = if os == ServerOs::Windows {
        (format!("{:x}", line.pid), format!("{:x}", line.tid))
    } else {
        (line.pid.to_string(), line.tid.to_string())
    };
    format!(
        "<line seq=\"{:x}\" pw=\"{}\" pr=\"{}\" time=\"{}\" exec=\"{}\" pid=\"{pid}\" \
         tid=\"{tid}\" status=\"{:x}\" type=\"{}\" sev=\"{}\" color=\"{}\" addin=\"{}\">{}</line>",
        line.seq,
        u8::from(line.password_request),
        u8::from(line.prompt_request),
        line.timestamp,
        line.exec_name,
        line.status,
        line.msg_type,
        line.severity,
        line.color,
        line.addin,
        line.text,
    )
}

proptest! {
    /// Formatting then parsing is the identity on every field, in both
    /// pid radix modes.
    #[test]
    fn prop_structured_line_round_trips(expected in arb_fields(), windows in any::<bool>()) {
        let os = if windows { ServerOs::Windows } else { ServerOs::Unix };
        let parsed = parse_line(&format_line(&expected, os), os);
        prop_assert_eq!(parsed, expected);
    }

    /// No input panics; input without the closing tag is returned raw with
    /// both flags clear.
    #[test]
    fn prop_unstructured_input_is_raw_identity(input in "[^\n]{0,120}") {
        prop_assume!(!input.ends_with("</line>"));
        let parsed = parse_line(&input, ServerOs::Other);
        prop_assert_eq!(parsed.text, input);
        prop_assert!(!parsed.password_request);
        prop_assert!(!parsed.prompt_request);
        prop_assert_eq!(parsed.seq, 0);
    }

    /// A severity blocked in the filter suppresses exactly the lines with
    /// that severity and no others.
    #[test]
    fn prop_severity_filter_blocks_exactly_that_level(
        line in arb_fields(),
        blocked in 0u32..6,
    ) {
        let mut filter = EventFilter::default();
        filter.block_severity(blocked);
        let parsed = parse_line(&format_line(&line, ServerOs::Unix), ServerOs::Unix);
        prop_assert_eq!(filter.allows(&parsed), line.severity != blocked);
    }
}
