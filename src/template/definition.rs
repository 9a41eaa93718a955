//! Template set definitions and override merging.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use tera::Value;

use super::delimiters::Delimiters;

/// File extension of every template source, also the marker for standalone renders
pub const TEMPLATE_EXTENSION: &str = ".html";

/// A helper callable from templates as `{{ name(arg=value) }}`
pub type HelperFunction =
    Arc<dyn Fn(&HashMap<String, Value>) -> tera::Result<Value> + Send + Sync>;

/// Named helper functions registered on every compiled template set
#[derive(Clone, Default)]
pub struct HelperTable(BTreeMap<String, HelperFunction>);

impl HelperTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a helper, replacing any previous helper with the same name
    pub fn insert<F>(&mut self, name: impl Into<String>, helper: F)
    where
        F: Fn(&HashMap<String, Value>) -> tera::Result<Value> + Send + Sync + 'static,
    {
        self.0.insert(name.into(), Arc::new(helper));
    }

    /// Builder form of [`HelperTable::insert`]
    pub fn with<F>(mut self, name: impl Into<String>, helper: F) -> Self
    where
        F: Fn(&HashMap<String, Value>) -> tera::Result<Value> + Send + Sync + 'static,
    {
        self.insert(name, helper);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HelperFunction)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for HelperTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

/// Where templates live and how a render composes them
#[derive(Clone, Debug, Default)]
pub struct TemplateDefinition {
    /// Directory holding `<name>.html` files
    pub root: PathBuf,
    /// Layout wrapping every non-standalone render
    pub master: Option<String>,
    /// Fragments parsed after the primary template, in order
    pub partials: Vec<String>,
    pub functions: HelperTable,
    pub delimiters: Delimiters,
    /// Recompile on every render
    pub disable_cache: bool,
}

impl TemplateDefinition {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn master(mut self, master: impl Into<String>) -> Self {
        self.master = Some(master.into());
        self
    }

    pub fn partials<I, S>(mut self, partials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partials = partials.into_iter().map(Into::into).collect();
        self
    }

    pub fn functions(mut self, functions: HelperTable) -> Self {
        self.functions = functions;
        self
    }

    pub fn delimiters(mut self, delimiters: Delimiters) -> Self {
        self.delimiters = delimiters;
        self
    }

    pub fn disable_cache(mut self, disable: bool) -> Self {
        self.disable_cache = disable;
        self
    }

    /// Path of the source file for a logical template name
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}{TEMPLATE_EXTENSION}"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Field-wise merge: fields set on the override replace ours, the rest carry over.
    ///
    /// An empty `master` in the override clears the layout.
    pub fn merge(&self, patch: &TemplateOverride) -> TemplateDefinition {
        let mut merged = self.clone();
        if let Some(root) = &patch.root {
            merged.root = root.clone();
        }
        if let Some(master) = &patch.master {
            merged.master = (!master.is_empty()).then(|| master.clone());
        }
        if let Some(partials) = &patch.partials {
            merged.partials = partials.clone();
        }
        if let Some(functions) = &patch.functions {
            merged.functions = functions.clone();
        }
        if let Some(delimiters) = &patch.delimiters {
            merged.delimiters = delimiters.clone();
        }
        if let Some(disable_cache) = patch.disable_cache {
            merged.disable_cache = disable_cache;
        }
        merged
    }
}

/// Partial template definition applied on top of an inherited one
#[derive(Clone, Debug, Default)]
pub struct TemplateOverride {
    pub root: Option<PathBuf>,
    pub master: Option<String>,
    pub partials: Option<Vec<String>>,
    pub functions: Option<HelperTable>,
    pub delimiters: Option<Delimiters>,
    pub disable_cache: Option<bool>,
}

impl TemplateOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn master(mut self, master: impl Into<String>) -> Self {
        self.master = Some(master.into());
        self
    }

    pub fn partials<I, S>(mut self, partials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partials = Some(partials.into_iter().map(Into::into).collect());
        self
    }

    pub fn functions(mut self, functions: HelperTable) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn delimiters(mut self, delimiters: Delimiters) -> Self {
        self.delimiters = Some(delimiters);
        self
    }

    pub fn disable_cache(mut self, disable: bool) -> Self {
        self.disable_cache = Some(disable);
        self
    }
}
