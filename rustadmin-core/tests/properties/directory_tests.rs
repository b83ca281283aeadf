//! Property-based tests for the incremental directory parser
//!
//! The parser must be insensitive to where the transport splits its chunks,
//! decode exactly the five predeclared entities, and reduce distinguished
//! names to their leading value segment.

use proptest::prelude::*;

use rustadmin_core::directory::{
    decode_entities, reduce_common_name, DirectoryParser,
};

fn encode_entities(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '&' => "&amp;".to_string(),
            '\'' => "&apos;".to_string(),
            '"' => "&quot;".to_string(),
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            other => other.to_string(),
        })
        .collect()
}

fn arb_server_entry() -> impl Strategy<Value = (String, String, u16)> {
    (
        "[A-Za-z][A-Za-z0-9]{0,12}",
        "[a-z][a-z0-9.]{0,20}",
        1u16..65535,
    )
        .prop_map(|(name, hostname, port)| (name, hostname, port))
}

fn directory_document(servers: &[(String, String, u16)], groups: &[(String, Vec<usize>)]) -> String {
    let mut doc = String::from("<servers domain=\"East\" full=\"1\">");
    for (name, hostname, port) in servers {
        doc.push_str(&format!(
            "<serverinfo><name>{name}</name><hostname>{hostname}</hostname><port>{port}</port></serverinfo>"
        ));
    }
    doc.push_str("</servers><groups>");
    for (name, members) in groups {
        doc.push_str(&format!("<groupinfo><name>{name}</name><members>"));
        for member in members {
            if let Some((server, _, _)) = servers.get(*member) {
                doc.push_str(&format!("<memberdata><name>{server}</name></memberdata>"));
            }
        }
        doc.push_str("</members></groupinfo>");
    }
    doc.push_str("</groups>");
    doc
}

proptest! {
    /// The parsed batch does not depend on where the stream was chunked.
    #[test]
    fn prop_chunking_is_transparent(
        servers in prop::collection::vec(arb_server_entry(), 0..6),
        chunk_len in 1usize..24,
    ) {
        let doc = directory_document(&servers, &[("Watched".to_string(), vec![0, 1])]);

        let mut whole = DirectoryParser::new();
        prop_assert!(whole.feed(&doc));
        let expected = whole.take_batch();

        let mut chunked = DirectoryParser::new();
        let bytes = doc.as_bytes();
        let mut done = false;
        let mut i = 0;
        while i < bytes.len() {
            let end = (i + chunk_len).min(bytes.len());
            done = chunked.feed(std::str::from_utf8(&bytes[i..end]).unwrap());
            i = end;
        }
        prop_assert!(done);
        prop_assert_eq!(chunked.take_batch(), expected);
    }

    /// Encoding with the five predeclared entities then decoding is the
    /// identity on arbitrary text.
    #[test]
    fn prop_entity_encode_decode_round_trips(text in "[ -~]{0,80}") {
        prop_assert_eq!(decode_entities(&encode_entities(&text)), text);
    }

    /// Text without an ampersand decodes to itself.
    #[test]
    fn prop_decode_without_ampersand_is_identity(text in "[^&]{0,80}") {
        prop_assert_eq!(decode_entities(&text), text);
    }

    /// A distinguished name reduces to its leading value segment.
    #[test]
    fn prop_common_name_reduction(name in "[A-Za-z0-9 ]{1,20}", org in "[A-Za-z]{1,10}") {
        let trimmed = name.trim().to_string();
        prop_assert_eq!(reduce_common_name(&format!("CN={name}/O={org}")), trimmed.clone());
        prop_assert_eq!(reduce_common_name(&format!("CN={name}")), trimmed);
    }

    /// Entity-escaped server names survive parsing verbatim.
    #[test]
    fn prop_escaped_names_decode_in_batch(raw in "[A-Za-z][A-Za-z&<>'\"]{0,10}") {
        let doc = format!(
            "<servers domain=\"d\"><serverinfo><name>{}</name></serverinfo></servers><groups></groups>",
            encode_entities(&raw)
        );
        let mut parser = DirectoryParser::new();
        prop_assert!(parser.feed(&doc));
        let batch = parser.take_batch();
        prop_assert_eq!(batch.servers.len(), 1);
        prop_assert_eq!(&batch.servers[0].name, &raw);
    }
}
