//! Compiled template cache.
//!
//! One map per escape mode, keyed by the requested template name. Lookups take
//! the read lock; the write lock is only taken to install a finished entry, so
//! compilation never blocks concurrent renders.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use tera::Tera;

use super::engine::Escape;

#[derive(Default)]
struct CacheMaps {
    escaped: HashMap<String, Arc<Tera>>,
    unescaped: HashMap<String, Arc<Tera>>,
}

impl CacheMaps {
    fn map(&self, mode: Escape) -> &HashMap<String, Arc<Tera>> {
        match mode {
            Escape::Html => &self.escaped,
            Escape::None => &self.unescaped,
        }
    }

    fn map_mut(&mut self, mode: Escape) -> &mut HashMap<String, Arc<Tera>> {
        match mode {
            Escape::Html => &mut self.escaped,
            Escape::None => &mut self.unescaped,
        }
    }
}

#[derive(Default)]
pub(crate) struct TemplateCache {
    maps: RwLock<CacheMaps>,
}

impl TemplateCache {
    pub(crate) fn get(&self, mode: Escape, name: &str) -> Option<Arc<Tera>> {
        let maps = self.maps.read().unwrap_or_else(PoisonError::into_inner);
        maps.map(mode).get(name).cloned()
    }

    /// Install a compiled set; the last install for a name wins
    pub(crate) fn install(&self, mode: Escape, name: &str, compiled: Arc<Tera>) {
        let mut maps = self.maps.write().unwrap_or_else(PoisonError::into_inner);
        maps.map_mut(mode).insert(name.to_string(), compiled);
    }

    pub(crate) fn len(&self, mode: Escape) -> usize {
        let maps = self.maps.read().unwrap_or_else(PoisonError::into_inner);
        maps.map(mode).len()
    }

    pub(crate) fn contains(&self, mode: Escape, name: &str) -> bool {
        let maps = self.maps.read().unwrap_or_else(PoisonError::into_inner);
        maps.map(mode).contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modes_are_separate() {
        let cache = TemplateCache::default();
        cache.install(Escape::Html, "index", Arc::new(Tera::default()));

        assert!(cache.contains(Escape::Html, "index"));
        assert!(!cache.contains(Escape::None, "index"));
        assert_eq!(cache.len(Escape::Html), 1);
        assert_eq!(cache.len(Escape::None), 0);
    }

    #[test]
    fn test_install_replaces() {
        let cache = TemplateCache::default();
        let first = Arc::new(Tera::default());
        let second = Arc::new(Tera::default());
        cache.install(Escape::Html, "index", first);
        cache.install(Escape::Html, "index", second.clone());

        let found = cache.get(Escape::Html, "index").unwrap();
        assert!(Arc::ptr_eq(&found, &second));
        assert_eq!(cache.len(Escape::Html), 1);
    }
}
