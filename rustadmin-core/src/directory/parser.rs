//! Incremental directory parser.
//!
//! The server-management daemon streams directory snapshots as text chunks,
//! each possibly ending inside a tag. A snapshot is an outer `<servers ...>`
//! section followed by an outer `<groups>` section; the batch is complete
//! only once both closing tags have been observed. The grammar looks like
//! XML but is not well formed (no prolog, no quoting guarantees, bare
//! nesting), so it is parsed by an explicit state machine that owns its
//! buffered residual text between [`DirectoryParser::feed`] calls.
//!
//! Attribute and element text uses exactly five predeclared escape
//! sequences (`&amp; &apos; &quot; &lt; &gt;`); nothing else is decoded.

use serde::{Deserialize, Serialize};

/// One server entry from a directory snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryServer {
    /// Logical name, reduced to its common-name segment
    pub name: String,
    /// Host name
    pub hostname: String,
    /// Console port, when published
    pub port: Option<u16>,
    /// Cluster name
    pub cluster: String,
    /// Display title
    pub title: String,
    /// Product version string
    pub version: String,
    /// OS family label as transmitted
    pub os: String,
    /// Domain the snapshot belongs to
    pub domain: String,
    /// The server is its domain's administration server
    pub admin_server: bool,
    /// The server holds a secondary administration role
    pub secondary_admin: bool,
}

/// One group entry from a directory snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryGroup {
    /// Group name
    pub name: String,
    /// Member server names, common-name reduced, in definition order
    pub members: Vec<String>,
}

/// A fully parsed directory snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryBatch {
    /// Server entries in arrival order
    pub servers: Vec<DirectoryServer>,
    /// Group entries in arrival order
    pub groups: Vec<DirectoryGroup>,
    /// Domain the snapshot describes
    pub domain: String,
    /// True for a full (non-incremental) refresh
    pub full_refresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitServers,
    Servers,
    Groups,
    Done,
}

/// State machine that assembles a [`DirectoryBatch`] from streamed chunks
///
/// Feed chunks as they arrive; `feed` returns true once both closing tags
/// have been seen. `take_batch` hands the batch off and resets the parser
/// for the next snapshot.
#[derive(Debug)]
pub struct DirectoryParser {
    buf: String,
    phase: Phase,
    batch: DirectoryBatch,
}

impl DirectoryParser {
    /// Creates a parser awaiting the `<servers>` section
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            phase: Phase::AwaitServers,
            batch: DirectoryBatch::default(),
        }
    }

    /// Returns true once both sections are closed
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    /// Buffers a chunk and advances the state machine
    ///
    /// Returns true once the batch is complete. Malformed entries are
    /// skipped, never raised; a defective snapshot yields a best-effort
    /// batch.
    pub fn feed(&mut self, chunk: &str) -> bool {
        self.buf.push_str(chunk);
        loop {
            let advanced = match self.phase {
                Phase::AwaitServers => self.advance_await_servers(),
                Phase::Servers => self.advance_servers(),
                Phase::Groups => self.advance_groups(),
                Phase::Done => false,
            };
            if !advanced {
                break;
            }
        }
        self.is_done()
    }

    /// Hands off the parsed batch and resets for the next snapshot
    pub fn take_batch(&mut self) -> DirectoryBatch {
        self.phase = Phase::AwaitServers;
        self.buf.clear();
        std::mem::take(&mut self.batch)
    }

    fn advance_await_servers(&mut self) -> bool {
        let Some(open) = self.buf.find("<servers") else {
            return false;
        };
        let Some(end) = self.buf[open..].find('>') else {
            // Open tag still incomplete; wait for more input.
            return false;
        };
        let tag = self.buf[open..=open + end].to_string();
        self.batch.domain = attr_value(&tag, "domain").unwrap_or_default();
        self.batch.full_refresh = matches!(
            attr_value(&tag, "full").as_deref(),
            Some("1" | "true")
        );
        self.buf.drain(..=open + end);
        self.phase = Phase::Servers;
        true
    }

    fn advance_servers(&mut self) -> bool {
        if let Some(block) = take_block(&mut self.buf, "<serverinfo", "</serverinfo>") {
            if let Some(server) = parse_server(&block, &self.batch.domain) {
                self.batch.servers.push(server);
            }
            return true;
        }
        if let Some(pos) = self.buf.find("</servers>") {
            self.buf.drain(..pos + "</servers>".len());
            self.phase = Phase::Groups;
            return true;
        }
        false
    }

    fn advance_groups(&mut self) -> bool {
        if let Some(block) = take_block(&mut self.buf, "<groupinfo", "</groupinfo>") {
            if let Some(group) = parse_group(&block) {
                self.batch.groups.push(group);
            }
            return true;
        }
        if let Some(pos) = self.buf.find("</groups>") {
            self.buf.drain(..pos + "</groups>".len());
            self.phase = Phase::Done;
            return true;
        }
        false
    }
}

impl Default for DirectoryParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes and returns the earliest complete `open...close` block
fn take_block(buf: &mut String, open: &str, close: &str) -> Option<String> {
    let start = buf.find(open)?;
    let end_rel = buf[start..].find(close)?;
    let end = start + end_rel + close.len();
    let block = buf[start..end].to_string();
    buf.drain(..end);
    Some(block)
}

/// Extracts the text of the first `<tag>...</tag>` element, entity-decoded
fn element_text(block: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = block.find(&open)? + open.len();
    let end_rel = block[start..].find(&close)?;
    Some(decode_entities(&block[start..start + end_rel]))
}

/// Extracts a `key="value"` attribute from a raw tag, entity-decoded
fn attr_value(tag: &str, key: &str) -> Option<String> {
    let marker = format!("{key}=\"");
    let start = tag.find(&marker)? + marker.len();
    let end_rel = tag[start..].find('"')?;
    Some(decode_entities(&tag[start..start + end_rel]))
}

fn parse_server(block: &str, domain: &str) -> Option<DirectoryServer> {
    let name = reduce_common_name(&element_text(block, "name")?);
    if name.is_empty() {
        return None;
    }
    // Admin roles ride as attributes on the serverinfo open tag.
    let open_tag = block.find('>').map_or(block, |end| &block[..=end]);
    Some(DirectoryServer {
        name,
        hostname: element_text(block, "hostname").unwrap_or_default(),
        port: element_text(block, "port").and_then(|p| p.parse().ok()),
        cluster: element_text(block, "cluster").unwrap_or_default(),
        title: element_text(block, "title").unwrap_or_default(),
        version: element_text(block, "version").unwrap_or_default(),
        os: element_text(block, "os").unwrap_or_default(),
        domain: domain.to_string(),
        admin_server: matches!(attr_value(open_tag, "admin").as_deref(), Some("1" | "true")),
        secondary_admin: matches!(
            attr_value(open_tag, "secondary").as_deref(),
            Some("1" | "true")
        ),
    })
}

fn parse_group(block: &str) -> Option<DirectoryGroup> {
    let name = reduce_common_name(&element_text(block, "name")?);
    if name.is_empty() {
        return None;
    }
    let mut members = Vec::new();
    if let Some(members_start) = block.find("<members>") {
        let mut rest = &block[members_start..];
        while let Some(start) = rest.find("<memberdata") {
            let Some(end_rel) = rest[start..].find("</memberdata>") else {
                break;
            };
            let entry = &rest[start..start + end_rel];
            if let Some(member) = element_text(entry, "name") {
                let member = reduce_common_name(&member);
                if !member.is_empty() {
                    members.push(member);
                }
            }
            rest = &rest[start + end_rel + "</memberdata>".len()..];
        }
    }
    Some(DirectoryGroup { name, members })
}

/// Decodes exactly the five predeclared escape sequences
///
/// `&amp; &apos; &quot; &lt; &gt;` are decoded verbatim; any other `&`
/// sequence passes through unchanged.
#[must_use]
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let mut matched = false;
        for (entity, ch) in [
            ("&amp;", '&'),
            ("&apos;", '\''),
            ("&quot;", '"'),
            ("&lt;", '<'),
            ("&gt;", '>'),
        ] {
            if rest.starts_with(entity) {
                out.push(ch);
                rest = &rest[entity.len()..];
                matched = true;
                break;
            }
        }
        if !matched {
            out.push('&');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Reduces a distinguished name to its leading value segment
///
/// `CN=App1/O=Org` becomes `App1`; a name without `key=value` structure is
/// returned unchanged.
#[must_use]
pub fn reduce_common_name(name: &str) -> String {
    let first = name.split('/').next().unwrap_or(name);
    match first.split_once('=') {
        Some((_, value)) => value.trim().to_string(),
        None => first.trim().to_string(),
    }
}
