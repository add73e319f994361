//! The sync descriptor registry.
//!
//! Loaded once at startup and read-only afterwards. Construction validates
//! every descriptor and the cross-descriptor invariants, so an engine holding
//! a registry never meets a malformed rule at run time.

use crate::descriptor::{Classification, PkReliability, ReverseDescriptor, SyncDescriptor};
use crate::error::ConfigError;
use crate::fk::FkValidationCache;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryDocument {
    #[serde(default)]
    tables: Vec<SyncDescriptor>,
    #[serde(default)]
    reverse_tables: Vec<ReverseDescriptor>,
}

/// Validated forward and reverse descriptors.
#[derive(Debug, Clone, Default)]
pub struct SyncRegistry {
    descriptors: Vec<SyncDescriptor>,
    reverse: Vec<ReverseDescriptor>,
    order: Vec<usize>,
}

impl SyncRegistry {
    /// Builds a registry, validating every descriptor.
    pub fn new(
        descriptors: Vec<SyncDescriptor>,
        reverse: Vec<ReverseDescriptor>,
    ) -> Result<Self, ConfigError> {
        let mut names = HashSet::new();
        let mut targets = HashSet::new();
        for d in &descriptors {
            d.validate()?;
            if !names.insert(d.name.as_str()) {
                return Err(ConfigError::DuplicateTable(d.name.clone()));
            }
            if !targets.insert(d.target()) {
                return Err(ConfigError::Invalid {
                    table: d.name.clone(),
                    message: format!("target table '{}' is written by another descriptor", d.target()),
                });
            }
        }

        let mut reverse_names = HashSet::new();
        for r in &reverse {
            r.validate()?;
            if !reverse_names.insert(r.name.as_str()) {
                return Err(ConfigError::DuplicateTable(r.name.clone()));
            }
            if let Some(d) = descriptors.iter().find(|d| d.target() == r.cloud_table) {
                if d.classification == Classification::Reference {
                    return Err(ConfigError::Invalid {
                        table: r.name.clone(),
                        message: format!(
                            "cloud table '{}' is a fully replaced reference table",
                            r.cloud_table
                        ),
                    });
                }
                if d.pk_reliability == PkReliability::Unstable {
                    return Err(ConfigError::Invalid {
                        table: r.name.clone(),
                        message: format!(
                            "cloud table '{}' has regenerated keys shared with the origin",
                            r.cloud_table
                        ),
                    });
                }
            }
        }

        let order = dependency_order(&descriptors)?;
        Ok(Self {
            descriptors,
            reverse,
            order,
        })
    }

    /// Parses and validates a JSON document of the form
    /// `{ "tables": [...], "reverse_tables": [...] }`.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let doc: RegistryDocument = serde_json::from_str(json)?;
        Self::new(doc.tables, doc.reverse_tables)
    }

    /// Reads a JSON registry document from disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Forward descriptors in declaration order.
    pub fn descriptors(&self) -> &[SyncDescriptor] {
        &self.descriptors
    }

    /// Reverse descriptors in declaration order.
    pub fn reverse_descriptors(&self) -> &[ReverseDescriptor] {
        &self.reverse
    }

    /// Looks up a forward descriptor by logical name.
    pub fn get(&self, name: &str) -> Option<&SyncDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Looks up a reverse descriptor by logical name.
    pub fn reverse(&self, name: &str) -> Option<&ReverseDescriptor> {
        self.reverse.iter().find(|r| r.name == name)
    }

    /// Forward processing order: reference tables in declaration order,
    /// then transactional tables with every parent before its children.
    pub fn ordered(&self) -> Vec<&SyncDescriptor> {
        self.order.iter().map(|&i| &self.descriptors[i]).collect()
    }

    /// Logical names of all forward tables.
    pub fn forward_names(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.name.clone()).collect()
    }

    /// Logical names of all reverse tables.
    pub fn reverse_names(&self) -> Vec<String> {
        self.reverse.iter().map(|r| r.name.clone()).collect()
    }

    /// An FK cache carrying every descriptor's rules, with no keys loaded.
    pub fn fk_cache(&self) -> FkValidationCache {
        self.descriptors
            .iter()
            .fold(FkValidationCache::new(), |cache, d| {
                cache.with_rules(d.name.clone(), d.foreign_keys.clone())
            })
    }
}

/// Indices of `descriptors` in processing order.
///
/// Transactional tables are sorted so that a table comes after every other
/// transactional table its reference rules point at. Ties keep declaration
/// order. Self references are ignored; cycles are rejected.
fn dependency_order(descriptors: &[SyncDescriptor]) -> Result<Vec<usize>, ConfigError> {
    let (mut order, mut pending): (Vec<usize>, Vec<usize>) = (0..descriptors.len())
        .partition(|&i| descriptors[i].classification == Classification::Reference);

    let parents: Vec<Vec<usize>> = descriptors
        .iter()
        .enumerate()
        .map(|(i, d)| {
            d.foreign_keys
                .iter()
                .filter_map(|rule| {
                    pending
                        .iter()
                        .copied()
                        .find(|&j| j != i && descriptors[j].target() == rule.reference_table)
                })
                .collect()
        })
        .collect();

    while !pending.is_empty() {
        let Some(pos) = pending
            .iter()
            .position(|&i| parents[i].iter().all(|p| !pending.contains(p)))
        else {
            let names: Vec<_> = pending.iter().map(|&i| descriptors[i].name.as_str()).collect();
            return Err(ConfigError::Invalid {
                table: descriptors[pending[0]].name.clone(),
                message: format!("reference rules form a cycle among {}", names.join(", ")),
            });
        };
        order.push(pending.remove(pos));
    }
    Ok(order)
}
