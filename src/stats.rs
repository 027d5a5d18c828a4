//! Run statistics: counters aggregated across repositories, plus the
//! ordered error list.
//!
//! Workers report per-language figures back through return values; the
//! orchestrator is the single aggregation point, so no locks are involved.
//! `print_summary` renders the user-facing report at the end of a run —
//! counts and classified error causes, never stack traces.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::ErrorRecord;

/// Statistics for one `(repository, language)` group.
#[derive(Debug, Default, Clone, Serialize)]
pub struct LanguageStats {
    pub files_processed: usize,
    pub chunks_stored: usize,
    pub chunks_by_collection: BTreeMap<String, usize>,
    pub business_domains: BTreeMap<String, usize>,
    pub errors: Vec<ErrorRecord>,
}

impl LanguageStats {
    pub fn record_error(&mut self, record: ErrorRecord) {
        self.errors.push(record);
    }
}

/// Whole-run statistics.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunStats {
    pub repositories_processed: usize,
    pub files_by_language: BTreeMap<String, usize>,
    pub chunks_by_collection: BTreeMap<String, usize>,
    pub business_domains: BTreeMap<String, usize>,
    pub errors: Vec<ErrorRecord>,
}

impl RunStats {
    /// Fold one language group's figures into the run totals.
    pub fn absorb(&mut self, language: &str, stats: LanguageStats) {
        *self
            .files_by_language
            .entry(language.to_string())
            .or_default() += stats.files_processed;
        for (collection, count) in stats.chunks_by_collection {
            *self.chunks_by_collection.entry(collection).or_default() += count;
        }
        for (domain, count) in stats.business_domains {
            *self.business_domains.entry(domain).or_default() += count;
        }
        self.errors.extend(stats.errors);
    }

    pub fn total_chunks_stored(&self) -> usize {
        self.chunks_by_collection.values().sum()
    }

    /// Human summary on stdout.
    pub fn print_summary(&self) {
        println!("Ingestion summary");
        println!("=================");
        println!();
        println!("  Repositories: {}", self.repositories_processed);

        if !self.files_by_language.is_empty() {
            println!();
            println!("  Files by language:");
            for (language, count) in &self.files_by_language {
                println!("    {language:<16} {count:>8}");
            }
        }

        if !self.chunks_by_collection.is_empty() {
            println!();
            println!("  Chunks by collection:");
            for (collection, count) in &self.chunks_by_collection {
                println!("    {collection:<24} {count:>8}");
            }
        }

        if !self.business_domains.is_empty() {
            println!();
            println!("  Business domains:");
            for (domain, count) in &self.business_domains {
                println!("    {domain:<16} {count:>8}");
            }
        }

        if !self.errors.is_empty() {
            println!();
            println!("  Errors ({}):", self.errors.len());
            for record in self.errors.iter().take(20) {
                if record.path.is_empty() {
                    println!("    - {}", record.cause);
                } else {
                    println!("    - {}: {}", record.path, record.cause);
                }
            }
            if self.errors.len() > 20 {
                println!("    ... and {} more", self.errors.len() - 20);
            }
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_accumulates_counts() {
        let mut run = RunStats::default();
        let mut first = LanguageStats::default();
        first.files_processed = 3;
        first.chunks_by_collection.insert("code_rust".into(), 10);
        first.business_domains.insert("auth".into(), 4);

        let mut second = LanguageStats::default();
        second.files_processed = 2;
        second.chunks_by_collection.insert("code_rust".into(), 5);
        second.record_error(ErrorRecord::new("x.rs", "parse failed"));

        run.absorb("rust", first);
        run.absorb("rust", second);

        assert_eq!(run.files_by_language["rust"], 5);
        assert_eq!(run.chunks_by_collection["code_rust"], 15);
        assert_eq!(run.business_domains["auth"], 4);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.total_chunks_stored(), 15);
    }
}
