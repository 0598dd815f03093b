//! LRU cache of parsed templates.
//!
//! Parsing is pure in the SQL text and the segmenter options, so a template
//! can be shared by every statement prepared from the same text. Entries are
//! `Arc<Template>`; a hit costs one reference count increment.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use super::segmenter::{segment, SegmenterOptions, Template};
use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    sql: String,
    opts: SegmenterOptions,
}

pub struct TemplateCache {
    cache: LruCache<CacheKey, Arc<Template>>,
    hits: u64,
    misses: u64,
}

impl TemplateCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(cap),
            hits: 0,
            misses: 0,
        }
    }

    /// Return the cached template for `sql`, parsing and inserting it on a miss.
    ///
    /// Parse errors are not cached.
    pub fn get_or_parse(
        &mut self,
        sql: &str,
        opts: &SegmenterOptions,
    ) -> Result<Arc<Template>, ParseError> {
        let key = CacheKey {
            sql: sql.to_string(),
            opts: *opts,
        };
        if let Some(template) = self.cache.get(&key) {
            self.hits += 1;
            return Ok(Arc::clone(template));
        }

        self.misses += 1;
        let template = Arc::new(segment(sql, opts)?);
        if let Some((evicted, _)) = self.cache.push(key, Arc::clone(&template)) {
            if evicted.sql != sql {
                log::trace!("template cache evicted {:?}", evicted.sql);
            }
        }
        Ok(template)
    }

    #[inline]
    pub fn contains(&self, sql: &str, opts: &SegmenterOptions) -> bool {
        self.cache.contains(&CacheKey {
            sql: sql.to_string(),
            opts: *opts,
        })
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new(100)
    }
}
