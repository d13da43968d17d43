//! Hierarchical configuration keys.
//!
//! A data path addresses one node of the configuration tree:
//!
//! ```text
//! /interfaces:interfaces/interface[name='Ethernet1_1']/ipv4/mtu
//! /vlan/VLAN_MEMBER/VLAN_MEMBER_LIST[name='Vlan100'][ifname='Ethernet1_1']
//! /vlan/VLAN/VLAN_LIST[name='Vlan100']/members[.='Ethernet1_1']
//! ```
//!
//! Segments may carry a `module:` prefix and any number of key predicates.
//! Routing only ever looks at segment names; the prefix is preserved for
//! display.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One `/`-separated component of a [`DataPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSegment {
    /// Optional schema module prefix (`interfaces` in `interfaces:interface`).
    pub module: Option<String>,
    /// Node name.
    pub name: String,
    /// Key predicates in declaration order.
    pub keys: Vec<(String, String)>,
}

impl PathSegment {
    /// Creates a segment without module prefix or keys.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            module: None,
            name: name.into(),
            keys: Vec::new(),
        }
    }

    /// Adds a key predicate.
    pub fn with_key(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.keys.push((key.into(), value.into()));
        self
    }

    /// Returns the value of key predicate `key`, if present.
    pub fn key(&self, key: &str) -> Option<&str> {
        self.keys
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn parse(raw: &str, full: &str) -> Result<Self, ParseError> {
        let (head, mut rest) = match raw.find('[') {
            Some(idx) => (&raw[..idx], &raw[idx..]),
            None => (raw, ""),
        };

        let (module, name) = match head.split_once(':') {
            Some((module, name)) => (Some(module.to_string()), name),
            None => (None, head),
        };
        if name.is_empty() {
            return Err(ParseError::path(full, "empty segment name"));
        }

        let mut keys = Vec::new();
        while !rest.is_empty() {
            let body = rest
                .strip_prefix('[')
                .ok_or_else(|| ParseError::path(full, "expected '[' after segment"))?;
            let (key, after_eq) = body
                .split_once('=')
                .ok_or_else(|| ParseError::path(full, "missing '=' in key predicate"))?;
            let quote = after_eq
                .chars()
                .next()
                .filter(|c| *c == '\'' || *c == '"')
                .ok_or_else(|| ParseError::path(full, "key value must be quoted"))?;
            let quoted = &after_eq[1..];
            let end = quoted
                .find(quote)
                .ok_or_else(|| ParseError::path(full, "unterminated key value"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ParseError::path(full, "empty key name"));
            }
            keys.push((key.to_string(), quoted[..end].to_string()));
            rest = quoted[end + 1..]
                .strip_prefix(']')
                .ok_or_else(|| ParseError::path(full, "expected ']' after key value"))?;
        }

        Ok(Self {
            module,
            name: name.to_string(),
            keys,
        })
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(module) = &self.module {
            write!(f, "{}:", module)?;
        }
        write!(f, "{}", self.name)?;
        for (k, v) in &self.keys {
            write!(f, "[{}='{}']", k, v)?;
        }
        Ok(())
    }
}

/// A parsed, non-empty hierarchical configuration key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataPath {
    segments: Vec<PathSegment>,
}

impl DataPath {
    /// Parses a `/`-rooted path.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let body = s
            .trim()
            .strip_prefix('/')
            .ok_or_else(|| ParseError::path(s, "path must start with '/'"))?;
        if body.is_empty() {
            return Err(ParseError::path(s, "empty path"));
        }

        let segments = split_segments(body, s)?
            .into_iter()
            .map(|raw| PathSegment::parse(raw, s))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { segments })
    }

    /// Builds a path from already-parsed segments.
    pub fn from_segments(segments: Vec<PathSegment>) -> Option<Self> {
        if segments.is_empty() {
            None
        } else {
            Some(Self { segments })
        }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; a path has at least one segment.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment names, without module prefixes or keys.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|s| s.name.as_str())
    }

    /// Name of the first segment.
    pub fn root(&self) -> &str {
        &self.segments[0].name
    }

    /// Name of the last segment.
    pub fn leaf(&self) -> &str {
        &self.segments[self.segments.len() - 1].name
    }

    /// Returns key `key` of the innermost segment named `segment`.
    pub fn key(&self, segment: &str, key: &str) -> Option<&str> {
        self.segments
            .iter()
            .rev()
            .find(|s| s.name == segment)
            .and_then(|s| s.key(key))
    }

    /// Returns key `key` of the last segment.
    pub fn leaf_key(&self, key: &str) -> Option<&str> {
        self.segments[self.segments.len() - 1].key(key)
    }

    /// Path with the last segment removed.
    pub fn parent(&self) -> Option<Self> {
        Self::from_segments(self.segments[..self.segments.len() - 1].to_vec())
    }

    /// Path with `name` appended.
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::new(name));
        Self { segments }
    }

    /// Path with the last segment replaced by `name`.
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        let last = segments.len() - 1;
        segments[last] = PathSegment::new(name);
        Self { segments }
    }

    /// Truncates the path after the innermost segment named `segment`.
    pub fn entry(&self, segment: &str) -> Option<Self> {
        let idx = self.segments.iter().rposition(|s| s.name == segment)?;
        Self::from_segments(self.segments[..=idx].to_vec())
    }

    /// Segment names below the innermost segment named `segment`.
    pub fn relative_to(&self, segment: &str) -> Option<Vec<&str>> {
        let idx = self.segments.iter().rposition(|s| s.name == segment)?;
        Some(
            self.segments[idx + 1..]
                .iter()
                .map(|s| s.name.as_str())
                .collect(),
        )
    }
}

fn split_segments<'a>(body: &'a str, full: &str) -> Result<Vec<&'a str>, ParseError> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut depth = 0u32;
    let mut quote: Option<char> = None;

    for (idx, c) in body.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' if depth > 0 => quote = Some(c),
            '[' => depth += 1,
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ParseError::path(full, "unbalanced ']'"))?;
            }
            '/' if depth == 0 => {
                out.push(&body[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }

    if quote.is_some() {
        return Err(ParseError::path(full, "unterminated quote"));
    }
    if depth != 0 {
        return Err(ParseError::path(full, "unbalanced '['"));
    }
    out.push(&body[start..]);
    Ok(out)
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for DataPath {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataPath::parse(s)
    }
}

impl TryFrom<String> for DataPath {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        DataPath::parse(&s)
    }
}

impl From<DataPath> for String {
    fn from(path: DataPath) -> String {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_interface_leaf() {
        let raw = "/interfaces:interfaces/interface[name='Ethernet1_1']/ipv4/mtu";
        let path = DataPath::parse(raw).unwrap();
        assert_eq!(
            path.names().collect::<Vec<_>>(),
            vec!["interfaces", "interface", "ipv4", "mtu"]
        );
        assert_eq!(path.key("interface", "name"), Some("Ethernet1_1"));
        assert_eq!(path.segments()[0].module.as_deref(), Some("interfaces"));
        assert_eq!(path.leaf(), "mtu");
        assert_eq!(path.root(), "interfaces");
    }

    #[test]
    fn test_parse_multiple_keys() {
        let raw = concat!(
            "/vlan/VLAN_MEMBER/VLAN_MEMBER_LIST[name='Vlan100']",
            "[ifname=\"Ethernet2_1\"]/tagging_mode"
        );
        let path = DataPath::parse(raw).unwrap();
        assert_eq!(path.key("VLAN_MEMBER_LIST", "name"), Some("Vlan100"));
        assert_eq!(path.key("VLAN_MEMBER_LIST", "ifname"), Some("Ethernet2_1"));
    }

    #[test]
    fn test_parse_leaf_list_entry() {
        let path = DataPath::parse("/vlan/VLAN/VLAN_LIST[name='Vlan100']/members[.='Ethernet1_1']")
            .unwrap();
        assert_eq!(path.leaf(), "members");
        assert_eq!(path.leaf_key("."), Some("Ethernet1_1"));
    }

    #[test]
    fn test_slash_inside_key_value() {
        let raw = "/interfaces/interface[name='Ethernet1/0/1']/admin-status";
        let path = DataPath::parse(raw).unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.key("interface", "name"), Some("Ethernet1/0/1"));
    }

    #[test]
    fn test_display_roundtrip() {
        let raw = "/interfaces:interfaces/interface[name='Ethernet1_1']/breakout/num-channels";
        let path = DataPath::parse(raw).unwrap();
        assert_eq!(path.to_string(), raw);
    }

    #[test]
    fn test_navigation() {
        let raw = "/interfaces/interface[name='Ethernet1_1']/breakout/num-channels";
        let path = DataPath::parse(raw).unwrap();
        assert_eq!(
            path.sibling("channel-speed").to_string(),
            "/interfaces/interface[name='Ethernet1_1']/breakout/channel-speed"
        );
        assert_eq!(
            path.entry("interface").unwrap().to_string(),
            "/interfaces/interface[name='Ethernet1_1']"
        );
        assert_eq!(
            path.relative_to("interface").unwrap(),
            vec!["breakout", "num-channels"]
        );
        assert_eq!(path.parent().unwrap().leaf(), "breakout");
        assert_eq!(path.child("x").leaf(), "x");
    }

    #[test]
    fn test_invalid_paths() {
        assert!(DataPath::parse("").is_err());
        assert!(DataPath::parse("/").is_err());
        assert!(DataPath::parse("interfaces/interface").is_err());
        assert!(DataPath::parse("/interfaces//mtu").is_err());
        assert!(DataPath::parse("/interfaces/interface[name='x'").is_err());
        assert!(DataPath::parse("/interfaces/interface[name=x]").is_err());
        assert!(DataPath::parse("/interfaces/interface[name='x']junk").is_err());
    }

    #[test]
    fn test_string_conversions() {
        let path = DataPath::parse("/vlan/VLAN/VLAN_LIST[name='Vlan10']").unwrap();
        assert_eq!(String::from(path.clone()), "/vlan/VLAN/VLAN_LIST[name='Vlan10']");
        assert_eq!(DataPath::try_from(String::from(path.clone())).unwrap(), path);
    }
}
