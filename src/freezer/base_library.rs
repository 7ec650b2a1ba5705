use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Modules compiled into the interpreter image by the toolchain itself
const MICROPYTHON_BUILTINS: &[&str] = &[
    "__future__",
    "array",
    "asyncio",
    "binascii",
    "builtins",
    "cmath",
    "collections",
    "deflate",
    "errno",
    "gc",
    "hashlib",
    "heapq",
    "io",
    "json",
    "math",
    "micropython",
    "os",
    "platform",
    "random",
    "re",
    "select",
    "struct",
    "sys",
    "time",
    "uasyncio",
    "ubinascii",
    "ucollections",
    "uctypes",
    "uerrno",
    "uhashlib",
    "uheapq",
    "uio",
    "ujson",
    "uos",
    "ure",
    "uselect",
    "ustruct",
    "usys",
    "utime",
    "uzlib",
    "zlib",
];

/// Versioned module set the toolchain freezes into every contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseLibrary {
    pub name: String,
    pub version: String,
    /// Top-level module names the base library provides
    pub provides: BTreeSet<String>,
}

impl Default for BaseLibrary {
    fn default() -> Self {
        let mut provides: BTreeSet<String> =
            MICROPYTHON_BUILTINS.iter().map(|s| s.to_string()).collect();
        provides.insert("typing".to_string());
        provides.insert("near".to_string());

        Self {
            name: "micropython-near-base".to_string(),
            version: "1.0.0".to_string(),
            provides,
        }
    }
}

impl BaseLibrary {
    /// Whether the dotted module `name` comes from the base library
    pub fn provides(&self, name: &str) -> bool {
        let root = name.split('.').next().unwrap_or(name);
        self.provides.contains(name) || self.provides.contains(root)
    }

    pub fn reference(&self) -> BaseLibraryRef {
        BaseLibraryRef {
            name: self.name.clone(),
            version: self.version.clone(),
            provides: self.provides.clone(),
        }
    }
}

/// Identity of the base library recorded in a frozen manifest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaseLibraryRef {
    pub name: String,
    pub version: String,
    /// Decides which imports were left out of the frozen set
    pub provides: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_base_library_provides_builtins() {
        let base = BaseLibrary::default();
        assert!(base.provides("json"));
        assert!(base.provides("near"));
        assert!(base.provides("collections.abc"));
        assert!(!base.provides("numpy"));
    }

    #[test]
    fn test_reference_carries_name_and_version() {
        let base = BaseLibrary {
            name: "base".to_string(),
            version: "2.1".to_string(),
            provides: BTreeSet::from(["near".to_string()]),
        };
        assert_eq!(
            base.reference(),
            BaseLibraryRef {
                name: "base".to_string(),
                version: "2.1".to_string(),
                provides: BTreeSet::from(["near".to_string()]),
            }
        );
    }
}
