//! Path pattern → handler lookup table.
//!
//! Patterns are segment names without keys or module prefixes, e.g.
//! `/interfaces/interface/ipv4/mtu`. A trailing `/*` matches every
//! descendant of the node. The table is built once at startup.

use crate::error::{TxnError, TxnResult};
use crate::handler::{ChangeHandler, NoOpHandler};
use cfgtxn_types::DataPath;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a fresh handler for one change.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn ChangeHandler> + Send + Sync>;

#[derive(Clone)]
pub enum HandlerEntry {
    /// The path needs no backend action.
    NoOp,
    Handler {
        name: &'static str,
        factory: HandlerFactory,
    },
}

static NOOP_ENTRY: HandlerEntry = HandlerEntry::NoOp;

impl HandlerEntry {
    pub fn name(&self) -> &'static str {
        match self {
            HandlerEntry::NoOp => "noop",
            HandlerEntry::Handler { name, .. } => *name,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, HandlerEntry::NoOp)
    }

    pub fn instantiate(&self) -> Box<dyn ChangeHandler> {
        match self {
            HandlerEntry::NoOp => Box::new(NoOpHandler),
            HandlerEntry::Handler { factory, .. } => factory(),
        }
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerEntry({})", self.name())
    }
}

fn pattern_names(pattern: &str) -> (Vec<String>, bool) {
    let mut names: Vec<String> = pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.rsplit(':').next().unwrap_or(s).to_string())
        .collect();
    let prefix = names.last().is_some_and(|last| last == "*");
    if prefix {
        names.pop();
    }
    (names, prefix)
}

#[derive(Debug, Default, Clone)]
pub struct HandlerRegistry {
    exact: HashMap<Vec<String>, HandlerEntry>,
    prefix: HashMap<Vec<String>, HandlerEntry>,
    subtrees: Vec<Vec<String>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a subtree this registry serves. Unregistered paths below
    /// it resolve to a no-op.
    pub fn subtree(mut self, pattern: &str) -> Self {
        let (names, _) = pattern_names(pattern);
        self.subtrees.push(names);
        self
    }

    pub fn register(mut self, pattern: &str, entry: HandlerEntry) -> Self {
        let (names, prefix) = pattern_names(pattern);
        if prefix {
            self.prefix.insert(names, entry);
        } else {
            self.exact.insert(names, entry);
        }
        self
    }

    /// Registers a handler constructor.
    pub fn handler<F, H>(self, pattern: &str, name: &'static str, make: F) -> Self
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: ChangeHandler + 'static,
    {
        let factory: HandlerFactory = Arc::new(move || Box::new(make()) as Box<dyn ChangeHandler>);
        self.register(pattern, HandlerEntry::Handler { name, factory })
    }

    pub fn noop(self, pattern: &str) -> Self {
        self.register(pattern, HandlerEntry::NoOp)
    }

    /// Finds the entry for `path`: exact pattern, then the longest prefix
    /// pattern, then a no-op for paths inside a declared subtree.
    pub fn lookup(&self, path: &DataPath) -> TxnResult<&HandlerEntry> {
        let names: Vec<String> = path.names().map(str::to_string).collect();

        if let Some(entry) = self.exact.get(&names) {
            return Ok(entry);
        }
        for len in (1..names.len()).rev() {
            if let Some(entry) = self.prefix.get(&names[..len]) {
                return Ok(entry);
            }
        }
        if self.subtrees.iter().any(|s| names.starts_with(s)) {
            return Ok(&NOOP_ENTRY);
        }
        Err(TxnError::UnknownSubtree {
            path: path.to_string(),
        })
    }

    /// Instantiates the handler for `path`.
    pub fn resolve(&self, path: &DataPath) -> TxnResult<Box<dyn ChangeHandler>> {
        Ok(self.lookup(path)?.instantiate())
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.prefix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Change;
    use crate::handler::ApplyOutcome;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct Named(&'static str);

    #[async_trait]
    impl ChangeHandler for Named {
        fn name(&self) -> &str {
            self.0
        }
        async fn init(&mut self, _change: &Change) -> TxnResult<()> {
            Ok(())
        }
        async fn validate(&mut self) -> TxnResult<()> {
            Ok(())
        }
        async fn apply(&mut self) -> TxnResult<ApplyOutcome> {
            Ok(ApplyOutcome::Written)
        }
        async fn revert(&mut self) -> TxnResult<()> {
            Ok(())
        }
    }

    fn registry() -> HandlerRegistry {
        HandlerRegistry::new()
            .subtree("/interfaces/interface")
            .subtree("/vlan")
            .noop("/interfaces/interface/name")
            .handler("/interfaces/interface/ipv4/mtu", "mtu", || Named("mtu"))
            .handler("/interfaces/interface/breakout/*", "breakout", || Named("breakout"))
            .handler("/vlan/VLAN/VLAN_LIST", "vlan-entry", || Named("vlan-entry"))
            .handler("/vlan/VLAN/VLAN_LIST/*", "vlan-field", || Named("vlan-field"))
            .handler("/vlan/VLAN/VLAN_LIST/members", "vlan-members", || Named("vlan-members"))
    }

    fn resolve_name(reg: &HandlerRegistry, path: &str) -> String {
        reg.lookup(&DataPath::parse(path).unwrap())
            .unwrap()
            .name()
            .to_string()
    }

    #[test]
    fn test_exact_match() {
        let reg = registry();
        assert_eq!(
            resolve_name(&reg, "/interfaces:interfaces/interface[name='Ethernet1_1']/ipv4/mtu"),
            "mtu"
        );
        assert_eq!(
            resolve_name(&reg, "/interfaces/interface[name='Ethernet1_1']/name"),
            "noop"
        );
    }

    #[test]
    fn test_prefix_and_exact_precedence() {
        let reg = registry();
        assert_eq!(
            resolve_name(&reg, "/interfaces/interface[name='Ethernet1_1']/breakout/num-channels"),
            "breakout"
        );
        assert_eq!(resolve_name(&reg, "/vlan/VLAN/VLAN_LIST[name='Vlan10']"), "vlan-entry");
        assert_eq!(
            resolve_name(&reg, "/vlan/VLAN/VLAN_LIST[name='Vlan10']/vlanid"),
            "vlan-field"
        );
        assert_eq!(
            resolve_name(&reg, "/vlan/VLAN/VLAN_LIST[name='Vlan10']/members[.='Ethernet1_1']"),
            "vlan-members"
        );
    }

    #[test]
    fn test_unregistered_leaf_under_subtree_is_noop() {
        let reg = registry();
        let entry = reg
            .lookup(&DataPath::parse("/interfaces/interface[name='Ethernet1_1']/if-index").unwrap())
            .unwrap();
        assert!(entry.is_noop());
        assert_eq!(resolve_name(&reg, "/vlan/VLAN_MEMBER"), "noop");
    }

    #[test]
    fn test_unknown_subtree_is_error() {
        let reg = registry();
        let err = reg
            .lookup(&DataPath::parse("/routing/static-route[prefix='10.0.0.0/8']").unwrap())
            .unwrap_err();
        assert!(matches!(err, TxnError::UnknownSubtree { .. }));
        // Sibling of a declared subtree is not covered.
        assert!(reg.lookup(&DataPath::parse("/interfaces/counters").unwrap()).is_err());
    }

    #[test]
    fn test_resolve_instantiates_fresh_handlers() {
        let reg = registry();
        let path = DataPath::parse("/interfaces/interface[name='Ethernet1_1']/ipv4/mtu").unwrap();
        let a = reg.resolve(&path).unwrap();
        let b = reg.resolve(&path).unwrap();
        assert_eq!(a.name(), "mtu");
        assert_eq!(b.name(), "mtu");
        assert_eq!(reg.len(), 6);
    }
}
