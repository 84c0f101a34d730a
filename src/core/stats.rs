use serde::{Serialize, Deserialize};

/// Database statistics for monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub record_sets: usize,
    pub records: usize,
    pub comments: usize,  // Standalone comments, prologue included
    pub sets: Vec<SetStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetStats {
    pub record_type: Option<String>,
    pub records: usize,
    pub comments: usize,
}

/// Hit/miss counters of the compiled-expression cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hit_count: usize,
    pub miss_count: usize,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}
