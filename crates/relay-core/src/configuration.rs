//! In-memory configuration model: a typed value, pluggable sources
//! layered in priority order, and a builder that resolves them into a
//! snapshot the core consumes at startup.
//!
//! This crate does not parse JSON/TOML/YAML itself — an external parser
//! builds [`ConfigValue`] trees and hands them to [`ConfigurationBuilder`]
//! through a [`ConfigurationSource`]. Hot reload, encryption and
//! watch-token machinery are deliberately left out: this dispatch engine
//! has no caller for them yet.

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

/// A configuration value. Dictionaries and lists keep `Vec` rather than a
/// map, to preserve source ordering for conflict diagnostics.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ConfigValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(Cow<'static, str>),
    Duration(Duration),
    List(Vec<ConfigValue>),
    Dictionary(Vec<(Cow<'static, str>, ConfigValue)>),
}

/// One layer of configuration, contributed by a single [`ConfigurationSource`].
/// Layers are applied in priority order, low to high; a later layer's key
/// wins on conflict.
#[derive(Clone, Debug)]
pub struct ConfigurationLayer {
    pub source_name: &'static str,
    pub priority: i32,
    pub entries: Vec<(String, ConfigValue)>,
}

/// Something that can contribute a layer of configuration: environment
/// variables, a parsed file, a management-API override. The engine itself
/// ships no concrete implementations; hosts provide them.
pub trait ConfigurationSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> i32;
    fn load(&self) -> Result<ConfigurationLayer, String>;
}

/// Flattened, conflict-resolved view of every loaded layer, keyed by dot
/// path (e.g. `"inbounds.0.port"`).
#[derive(Clone, Debug, Default)]
pub struct ConfigurationSnapshot {
    entries: HashMap<String, ConfigValue>,
}

impl ConfigurationSnapshot {
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One finding produced while building a [`ConfigurationSnapshot`], e.g.
/// a key two sources disagree on.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildFinding {
    pub key: String,
    pub message: String,
}

/// Outcome of [`ConfigurationBuilder::build`]: the resolved snapshot plus
/// any non-fatal findings surfaced along the way (currently: overwritten
/// keys). A host may choose to log these or fail startup on them.
#[derive(Clone, Debug)]
pub struct BuildReport {
    pub snapshot: ConfigurationSnapshot,
    pub findings: Vec<BuildFinding>,
}

/// Layers configured sources by priority and flattens them into a
/// [`ConfigurationSnapshot`].
#[derive(Default)]
pub struct ConfigurationBuilder {
    sources: Vec<Box<dyn ConfigurationSource>>,
}

impl ConfigurationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Box<dyn ConfigurationSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Loads every source, sorts layers ascending by priority, and
    /// flattens them so a higher-priority layer's key always wins.
    pub fn build(&self) -> Result<BuildReport, String> {
        let mut layers = self
            .sources
            .iter()
            .map(|s| s.load())
            .collect::<Result<Vec<_>, _>>()?;
        layers.sort_by_key(|l| l.priority);

        let mut entries = HashMap::new();
        let mut findings = Vec::new();
        for layer in layers {
            for (key, value) in layer.entries {
                if entries.contains_key(&key) {
                    findings.push(BuildFinding {
                        key: key.clone(),
                        message: format!("overwritten by source '{}'", layer.source_name),
                    });
                }
                entries.insert(key, value);
            }
        }

        Ok(BuildReport {
            snapshot: ConfigurationSnapshot { entries },
            findings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        priority: i32,
        entries: Vec<(String, ConfigValue)>,
    }

    impl ConfigurationSource for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn load(&self) -> Result<ConfigurationLayer, String> {
            Ok(ConfigurationLayer {
                source_name: self.name,
                priority: self.priority,
                entries: self.entries.clone(),
            })
        }
    }

    #[test]
    fn higher_priority_layer_wins_on_conflict() {
        let builder = ConfigurationBuilder::new()
            .with_source(Box::new(Fixed {
                name: "defaults",
                priority: 0,
                entries: vec![("log.level".into(), ConfigValue::Text("info".into()))],
            }))
            .with_source(Box::new(Fixed {
                name: "override",
                priority: 10,
                entries: vec![("log.level".into(), ConfigValue::Text("debug".into()))],
            }));

        let report = builder.build().unwrap();
        assert_eq!(
            report.snapshot.get("log.level"),
            Some(&ConfigValue::Text("debug".into()))
        );
        assert_eq!(report.findings.len(), 1);
    }
}
