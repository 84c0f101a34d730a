use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use crate::core::error::Result;
use crate::core::stats::CacheStats;
use crate::query::ast::SelectionExpr;
use crate::query::fex::FieldExpr;

/// Compiled-expression cache keyed by source text, so repeated queries
/// skip recompilation.
pub struct ExpressionCache {
    selections: Mutex<LruCache<String, SelectionExpr>>,
    fields: Mutex<LruCache<String, FieldExpr>>,
    capacity: usize,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
}

impl ExpressionCache {
    /// `capacity` applies to each expression kind; zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        ExpressionCache {
            selections: Mutex::new(LruCache::new(cap)),
            fields: Mutex::new(LruCache::new(cap)),
            capacity: cap.get(),
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        }
    }

    pub fn selection(&self, text: &str) -> Result<SelectionExpr> {
        if let Some(expr) = self.selections.lock().get(text) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            return Ok(expr.clone());
        }
        self.miss_count.fetch_add(1, Ordering::Relaxed);
        let expr = SelectionExpr::compile(text)?;
        self.selections.lock().put(text.to_string(), expr.clone());
        Ok(expr)
    }

    pub fn fields(&self, text: &str) -> Result<FieldExpr> {
        if let Some(expr) = self.fields.lock().get(text) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            return Ok(expr.clone());
        }
        self.miss_count.fetch_add(1, Ordering::Relaxed);
        let expr = FieldExpr::compile(text)?;
        self.fields.lock().put(text.to_string(), expr.clone());
        Ok(expr)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            size: self.selections.lock().len() + self.fields.lock().len(),
            capacity: self.capacity * 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_expressions_hit() {
        let cache = ExpressionCache::new(4);
        cache.selection("a = 1").unwrap();
        cache.selection("a = 1").unwrap();
        cache.fields("a,b").unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 2);
        assert_eq!(stats.size, 2);
    }

    #[test]
    fn compile_errors_are_not_cached() {
        let cache = ExpressionCache::new(4);
        assert!(cache.selection("a = ").is_err());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let cache = ExpressionCache::new(1);
        cache.selection("a = 1").unwrap();
        cache.selection("b = 1").unwrap();
        cache.selection("a = 1").unwrap();
        assert_eq!(cache.stats().hit_count, 0);
        assert_eq!(cache.stats().size, 1);
    }
}
