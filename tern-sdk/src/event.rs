//! Events flowing through the client: one per protocol line, inbound or
//! outbound, plus the client's own virtual lifecycle events.

use std::collections::BTreeMap;
use std::fmt;

use crate::consts::{DISCONNECTED, INITIALIZED, STOPPED};

/// IRCv3 message tags, kept ordered so the wire form is deterministic.
pub type Tags = BTreeMap<String, String>;

/// Origin of an event (`nick!user@host` or a bare server name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub ident: Option<String>,
    pub host: Option<String>,
}

impl Source {
    pub fn parse(raw: &str) -> Self {
        let (name, rest) = match raw.split_once('!') {
            Some((name, rest)) => (name, Some(rest)),
            None => (raw, None),
        };
        let (name, ident, host) = match rest {
            Some(rest) => match rest.split_once('@') {
                Some((ident, host)) => (name, Some(ident), Some(host)),
                None => (name, Some(rest), None),
            },
            None => match name.split_once('@') {
                Some((name, host)) => (name, None, Some(host)),
                None => (name, None, None),
            },
        };
        Self {
            name: name.to_string(),
            ident: ident.map(str::to_string),
            host: host.map(str::to_string),
        }
    }

    /// Servers identify by a bare name; users always carry `!ident` or `@host`.
    pub fn is_server(&self) -> bool {
        self.ident.is_none() && self.host.is_none()
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(ident) = &self.ident {
            write!(f, "!{ident}")?;
        }
        if let Some(host) = &self.host {
            write!(f, "@{host}")?;
        }
        Ok(())
    }
}

/// A single protocol message.
///
/// Handlers receive their own clone, so nothing one handler does to its
/// copy is visible to the others running for the same event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    pub tags: Tags,
    pub source: Option<Source>,
    /// Upper-case verb or three-digit numeric.
    pub command: String,
    pub params: Vec<String>,
    /// Final free-form argument (written after `" :"`).
    pub trailing: Option<String>,
    /// Suppresses the event from debug logs (passwords, OPER credentials).
    pub sensitive: bool,
}

impl Event {
    pub fn new<I, S>(command: &str, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.to_ascii_uppercase(),
            params: params.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_trailing(mut self, trailing: impl Into<String>) -> Self {
        self.trailing = Some(trailing.into());
        self
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Parse one wire line. Returns `None` for blank lines and lines with
    /// no command, which the read loop treats as no-ops.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']).trim_start();
        let mut event = Self::default();

        if let Some(stripped) = rest.strip_prefix('@') {
            let (raw_tags, tail) = stripped.split_once(' ')?;
            event.tags = parse_tags(raw_tags);
            rest = tail.trim_start();
        }

        if let Some(stripped) = rest.strip_prefix(':') {
            let (raw_source, tail) = stripped.split_once(' ')?;
            if !raw_source.is_empty() {
                event.source = Some(Source::parse(raw_source));
            }
            rest = tail.trim_start();
        }

        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, tail)) => (command, tail),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }
        event.command = command.to_ascii_uppercase();

        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                event.trailing = Some(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, tail)) => {
                    event.params.push(param.to_string());
                    rest = tail;
                }
                None => {
                    event.params.push(rest.to_string());
                    break;
                }
            }
        }

        Some(event)
    }

    /// Length of the wire form without tags and without the CRLF
    /// terminator. This is the number checked against
    /// [`MAX_LINE_LENGTH`](crate::consts::MAX_LINE_LENGTH) and fed to the
    /// rate limiter.
    pub fn serialized_len(&self) -> usize {
        let mut len = self.command.len();
        if let Some(source) = &self.source {
            // ":" + source + " "
            len += source.to_string().len() + 2;
        }
        len += self.params.iter().map(|p| p.len() + 1).sum::<usize>();
        if let Some(trailing) = &self.trailing {
            len += trailing.len() + 2;
        }
        len
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self.command.as_str(), INITIALIZED | DISCONNECTED | STOPPED)
    }

    /// Nickname (or server name) of the sender, if any.
    pub fn source_name(&self) -> Option<&str> {
        self.source.as_ref().map(|s| s.name.as_str())
    }

    /// The trailing argument, or the last positional one when there is none.
    pub fn last(&self) -> Option<&str> {
        self.trailing
            .as_deref()
            .or_else(|| self.params.last().map(String::as_str))
    }

    /// Messages addressed to a channel rather than directly to us.
    pub fn is_from_channel(&self) -> bool {
        self.params
            .first()
            .is_some_and(|target| crate::validate::is_valid_channel(target))
    }

    /// Wire form with control characters other than CTCP delimiters removed,
    /// for log output.
    pub(crate) fn stripped(&self) -> String {
        self.to_string()
            .chars()
            .filter(|c| !c.is_control() || *c == '\x01')
            .collect()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            f.write_str("@")?;
            for (i, (key, value)) in self.tags.iter().enumerate() {
                if i > 0 {
                    f.write_str(";")?;
                }
                f.write_str(key)?;
                if !value.is_empty() {
                    write!(f, "={}", escape_tag_value(value))?;
                }
            }
            f.write_str(" ")?;
        }
        if let Some(source) = &self.source {
            write!(f, ":{source} ")?;
        }
        f.write_str(&self.command)?;
        for param in &self.params {
            write!(f, " {param}")?;
        }
        if let Some(trailing) = &self.trailing {
            write!(f, " :{trailing}")?;
        }
        Ok(())
    }
}

fn parse_tags(raw: &str) -> Tags {
    raw.split(';')
        .filter(|t| !t.is_empty())
        .map(|tag| match tag.split_once('=') {
            Some((key, value)) => (key.to_string(), unescape_tag_value(value)),
            None => (tag.to_string(), String::new()),
        })
        .collect()
}

fn escape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            // A lone trailing backslash is dropped.
            None => {}
        }
    }
    out
}
