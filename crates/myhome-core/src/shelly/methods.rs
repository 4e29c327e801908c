// Verbs a device advertised through `Shelly.ListMethods`, grouped by
// component (`Switch`, `Script`, `KVS`, ...).

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MethodTable {
    components: BTreeMap<String, BTreeSet<String>>,
}

impl MethodTable {
    pub fn new<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut components: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for method in methods {
            let method = method.as_ref();
            components
                .entry(component_of(method).to_owned())
                .or_default()
                .insert(method.to_owned());
        }
        Self { components }
    }

    pub fn supports(&self, method: &str) -> bool {
        self.components
            .get(component_of(method))
            .is_some_and(|verbs| verbs.contains(method))
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.components.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

fn component_of(method: &str) -> &str {
    method.split_once('.').map_or(method, |(c, _)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_by_component_prefix() {
        let table = MethodTable::new(["Shelly.GetStatus", "Script.List", "Script.PutCode"]);
        assert_eq!(table.components().collect::<Vec<_>>(), vec!["Script", "Shelly"]);
        assert_eq!(table.len(), 3);
        assert!(table.supports("Script.PutCode"));
        assert!(!table.supports("Matter.SetConfig"));
        assert!(!table.supports("Script.Eval"));
    }
}
