use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::debug;

use crate::domain::{Element, has_wildcard};
use crate::error::GrabError;
use crate::fs_util;
use crate::pattern::{CompiledPattern, PatternSpec, substitute, validate_patterns};

#[derive(Debug, Clone)]
struct TypeEntry {
    template: String,
    compiled: CompiledPattern,
    space: Option<String>,
    nested: BTreeMap<String, TypeEntry>,
}

impl TypeEntry {
    fn build(spec: &PatternSpec, replacements: &[String]) -> Result<Self, GrabError> {
        let nested = spec
            .nested()
            .map(|children| {
                children
                    .iter()
                    .map(|(key, child)| {
                        Ok((key.clone(), TypeEntry::build(child, replacements)?))
                    })
                    .collect::<Result<BTreeMap<_, _>, GrabError>>()
            })
            .transpose()?
            .unwrap_or_default();
        Ok(Self {
            template: spec.template().to_string(),
            compiled: CompiledPattern::compile(spec.template(), replacements)?,
            space: spec.space().map(str::to_string),
            nested,
        })
    }
}

/// Per-type result for one element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedAsset {
    pub path: Utf8PathBuf,
    #[serde(flatten)]
    pub nested: BTreeMap<String, ResolvedAsset>,
    pub meta: AssetMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetMeta {
    pub pattern: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,
}

impl ResolvedAsset {
    /// This asset's path followed by all nested asset paths.
    pub fn paths(&self) -> Vec<Utf8PathBuf> {
        let mut out = vec![self.path.clone()];
        for child in self.nested.values() {
            out.extend(child.paths());
        }
        out
    }
}

/// Turns per-type path templates into element discovery and per-element path
/// resolution under one root directory.
#[derive(Debug, Clone)]
pub struct PathTemplateResolver {
    root: Utf8PathBuf,
    types: Vec<String>,
    replacements: Vec<String>,
    entries: BTreeMap<String, TypeEntry>,
}

impl PathTemplateResolver {
    /// Validates and compiles all patterns. Performs no I/O.
    pub fn new(
        root: Utf8PathBuf,
        types: Vec<String>,
        replacements: Vec<String>,
        patterns: &BTreeMap<String, PatternSpec>,
    ) -> Result<Self, GrabError> {
        validate_patterns(&types, &replacements, patterns)?;
        let mut entries = BTreeMap::new();
        for data_type in &types {
            // validate_patterns guarantees presence
            if let Some(spec) = patterns.get(data_type) {
                entries.insert(data_type.clone(), TypeEntry::build(spec, &replacements)?);
            }
        }
        Ok(Self {
            root,
            types,
            replacements,
            entries,
        })
    }

    /// Same patterns, resolved under `root`.
    pub fn with_root(mut self, root: Utf8PathBuf) -> Self {
        self.root = root;
        self
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn types(&self) -> &[String] {
        &self.types
    }

    pub fn replacements(&self) -> &[String] {
        &self.replacements
    }

    /// Glob and regex for a data type, as compiled at construction.
    pub fn compiled(&self, data_type: &str) -> Option<&CompiledPattern> {
        self.entries.get(data_type).map(|entry| &entry.compiled)
    }

    /// Elements for which every declared type has at least one matching
    /// file. Types whose pattern binds only some replacements constrain the
    /// result on those replacements.
    pub fn discover_elements(&self) -> Result<BTreeSet<Element>, GrabError> {
        let mut complete: Option<BTreeSet<Element>> = None;
        let mut partial: Vec<(&[usize], BTreeSet<Vec<String>>)> = Vec::new();

        for data_type in &self.types {
            let Some(entry) = self.entries.get(data_type) else {
                continue;
            };
            let mut found = BTreeSet::new();
            for path in fs_util::glob_paths(&self.root, entry.compiled.glob())? {
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let Some(values) = entry.compiled.captures(&fs_util::to_slash(relative)) else {
                    continue;
                };
                if values.iter().any(|value| has_wildcard(value)) {
                    debug!(%path, "skipping path with wildcard characters in element values");
                    continue;
                }
                found.insert(values);
            }
            debug!(
                data_type = data_type.as_str(),
                matches = found.len(),
                glob = entry.compiled.glob(),
                "scanned"
            );

            if entry.compiled.uses_all() {
                let found = found.into_iter().map(Element::from).collect::<BTreeSet<_>>();
                complete = Some(match complete {
                    Some(previous) => previous.intersection(&found).cloned().collect(),
                    None => found,
                });
            } else {
                partial.push((entry.compiled.used(), found));
            }
        }

        let elements = complete
            .unwrap_or_default()
            .into_iter()
            .filter(|element| {
                partial.iter().all(|(used, found)| {
                    let key = used
                        .iter()
                        .map(|&index| element.values()[index].clone())
                        .collect::<Vec<_>>();
                    found.contains(&key)
                })
            })
            .collect();
        Ok(elements)
    }

    /// Concrete path of `data_type` for `element`.
    pub fn resolve(&self, element: &Element, data_type: &str) -> Result<Utf8PathBuf, GrabError> {
        let entry = self.entry(element, data_type)?;
        self.resolve_template(element, data_type, &entry.template)
    }

    /// Path plus nested assets and meta for `data_type`.
    pub fn resolve_asset(
        &self,
        element: &Element,
        data_type: &str,
    ) -> Result<ResolvedAsset, GrabError> {
        let entry = self.entry(element, data_type)?;
        self.build_asset(element, data_type, entry)
    }

    fn build_asset(
        &self,
        element: &Element,
        label: &str,
        entry: &TypeEntry,
    ) -> Result<ResolvedAsset, GrabError> {
        let path = self.resolve_template(element, label, &entry.template)?;
        let mut nested = BTreeMap::new();
        for (key, child) in &entry.nested {
            let child_label = format!("{label}.{key}");
            nested.insert(key.clone(), self.build_asset(element, &child_label, child)?);
        }
        Ok(ResolvedAsset {
            path,
            nested,
            meta: AssetMeta {
                pattern: entry.template.clone(),
                space: entry.space.clone(),
            },
        })
    }

    fn entry(&self, element: &Element, data_type: &str) -> Result<&TypeEntry, GrabError> {
        if element.len() != self.replacements.len() {
            return Err(GrabError::ElementResolution {
                element: element.to_string(),
                data_type: data_type.to_string(),
                message: format!(
                    "element has {} values, expected {} ({})",
                    element.len(),
                    self.replacements.len(),
                    self.replacements.join(", ")
                ),
            });
        }
        self.entries
            .get(data_type)
            .ok_or_else(|| GrabError::ElementResolution {
                element: element.to_string(),
                data_type: data_type.to_string(),
                message: "unknown data type".to_string(),
            })
    }

    fn resolve_template(
        &self,
        element: &Element,
        label: &str,
        template: &str,
    ) -> Result<Utf8PathBuf, GrabError> {
        let relative = substitute(template, element, &self.replacements);
        if !has_wildcard(&relative) {
            let path = self.root.join(&relative);
            if fs_util::path_exists(&path) {
                return Ok(path);
            }
            return Err(GrabError::MissingAsset {
                element: element.to_string(),
                data_type: label.to_string(),
                path,
            });
        }

        let mut matches = fs_util::glob_paths(&self.root, &relative)?;
        match matches.len() {
            0 => Err(GrabError::ElementResolution {
                element: element.to_string(),
                data_type: label.to_string(),
                message: format!("no match for {relative}"),
            }),
            1 => Ok(matches.remove(0)),
            n => Err(GrabError::ElementResolution {
                element: element.to_string(),
                data_type: label.to_string(),
                message: format!("ambiguous, {n} matches for {relative}"),
            }),
        }
    }
}
