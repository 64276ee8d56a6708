use std::collections::BTreeMap;

use crate::error::{ItemError, SkipKind};
use crate::stages::Stage;

const EXAMPLES_PER_GROUP: usize = 5;

/// Everything dropped during one invocation, so losses show up at the end of
/// the run and not only in the log.
pub struct RunSummary {
    run_id: String,
    skips: Vec<Skip>,
}

#[derive(Debug, Clone)]
pub struct Skip {
    pub stage: Stage,
    pub item: String,
    pub kind: SkipKind,
    pub detail: String,
}

impl RunSummary {
    pub fn new() -> Self {
        RunSummary {
            run_id: new_run_id(),
            skips: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record(&mut self, stage: Stage, item: &str, err: &ItemError) {
        self.skips.push(Skip {
            stage,
            item: item.to_string(),
            kind: err.kind(),
            detail: err.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.skips.is_empty()
    }

    pub fn counts(&self) -> BTreeMap<(Stage, SkipKind), usize> {
        let mut counts = BTreeMap::new();
        for s in &self.skips {
            *counts.entry((s.stage, s.kind)).or_insert(0) += 1;
        }
        counts
    }

    pub fn print(&self) {
        if self.is_empty() {
            println!("No items skipped.");
            return;
        }
        println!("\nSkipped items ({}):", self.skips.len());
        for ((stage, kind), n) in self.counts() {
            println!("  {:<8} {:<9} {:>6}", stage.as_str(), kind.as_str(), n);
            for s in self
                .skips
                .iter()
                .filter(|s| s.stage == stage && s.kind == kind)
                .take(EXAMPLES_PER_GROUP)
            {
                println!("           - {}: {}", s.item, s.detail);
            }
        }
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

fn new_run_id() -> String {
    format!("run-{}", chrono::Utc::now().format("%Y%m%dT%H%M%S"))
}
