//! Quality report rendering (plain text and JSON)

use super::QualityMetrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

const HEAVY_RULE: &str = "================================================================================";
const LIGHT_RULE: &str = "--------------------------------------------------------------------------------";

/// Maximum number of conflicting keys listed in the text report
const CONFLICT_SAMPLE_SIZE: usize = 10;

/// Quality metrics stamped with the run that produced them
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub run_id: Option<Uuid>,
    pub generated_at: DateTime<Utc>,
    pub metrics: QualityMetrics,
}

impl QualityReport {
    pub fn new(metrics: QualityMetrics) -> Self {
        Self {
            run_id: None,
            generated_at: Utc::now(),
            metrics,
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Human-readable report
    pub fn render_text(&self) -> String {
        self.to_string()
    }

    /// Structured report (pretty-printed JSON)
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

fn section(f: &mut fmt::Formatter<'_>, title: &str) -> fmt::Result {
    writeln!(f, "{}", title)?;
    writeln!(f, "{}", LIGHT_RULE)
}

impl fmt::Display for QualityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.metrics;
        let total = m.total_mappings;

        writeln!(f, "{}", HEAVY_RULE)?;
        writeln!(f, "MAPPING QUALITY REPORT")?;
        writeln!(f, "{}", HEAVY_RULE)?;
        if let Some(run_id) = self.run_id {
            writeln!(f, "Run ID:               {}", run_id)?;
        }
        writeln!(f, "Generated:            {}", self.generated_at.to_rfc3339())?;
        writeln!(f)?;

        section(f, "OVERVIEW")?;
        writeln!(f, "Total Mappings:       {}", total)?;
        writeln!(f, "Unique Subjects:      {}", m.unique_subjects)?;
        writeln!(f, "Unique Objects:       {}", m.unique_objects)?;
        writeln!(f, "Coverage Ratio:       {:.2}", m.coverage_ratio)?;
        writeln!(f)?;

        section(f, "CONFIDENCE STATISTICS")?;
        match &m.confidence {
            Some(c) => {
                writeln!(f, "Average Confidence:   {:.3}", c.mean)?;
                writeln!(f, "Min Confidence:       {:.3}", c.min)?;
                writeln!(f, "Max Confidence:       {:.3}", c.max)?;
                writeln!(f, "First Quartile:       {:.3}", c.q1)?;
                writeln!(f, "Median Confidence:    {:.3}", c.median)?;
                writeln!(f, "Third Quartile:       {:.3}", c.q3)?;
            }
            None => writeln!(f, "No mappings")?,
        }
        writeln!(f)?;
        writeln!(f, "Confidence Distribution:")?;
        for bin in &m.confidence_histogram {
            writeln!(f, "  {}: {:5} ({:5.1}%)", bin.label(), bin.count, percent(bin.count, total))?;
        }
        writeln!(f)?;

        section(f, "SUPPORT STATISTICS")?;
        if let Some(s) = &m.support {
            writeln!(f, "Average Support:      {:.2}", s.mean)?;
            writeln!(f, "Min Support:          {}", s.min)?;
            writeln!(f, "Max Support:          {}", s.max)?;
            writeln!(f)?;
            writeln!(f, "Support Distribution:")?;
            for (support, count) in &s.distribution {
                writeln!(f, "  {} matchers: {:5} ({:5.1}%)", support, count, percent(*count, total))?;
            }
        } else {
            writeln!(f, "No mappings")?;
        }
        writeln!(f)?;

        section(f, "PREDICATE DISTRIBUTION")?;
        for (predicate, count) in m.predicates_by_frequency() {
            writeln!(f, "  {}: {:5} ({:5.1}%)", predicate, count, percent(count, total))?;
        }
        writeln!(f)?;

        if let Some(c) = &m.conflicts {
            section(f, "CONFLICT RESOLUTION")?;
            writeln!(f, "Resolution Strategy:  {}", c.strategy)?;
            writeln!(
                f,
                "Conflict Groups:      {} (subject: {}, object: {})",
                c.total_groups, c.subject_groups, c.object_groups
            )?;
            writeln!(f, "Kept Mappings:        {}", c.kept)?;
            writeln!(f, "Discarded Mappings:   {}", c.discarded)?;

            if !c.keys.is_empty() {
                writeln!(f)?;
                writeln!(f, "Sample Conflicting Keys (first {}):", CONFLICT_SAMPLE_SIZE)?;
                for key in c.keys.iter().take(CONFLICT_SAMPLE_SIZE) {
                    writeln!(f, "  - {}", key)?;
                }
                if c.keys.len() > CONFLICT_SAMPLE_SIZE {
                    writeln!(f, "  ... and {} more", c.keys.len() - CONFLICT_SAMPLE_SIZE)?;
                }
            }
            writeln!(f)?;
        }

        if let Some(r) = &m.reference {
            section(f, "REFERENCE COMPARISON")?;
            writeln!(f, "True Positives:       {}", r.true_positives)?;
            writeln!(f, "False Positives:      {}", r.false_positives)?;
            writeln!(f, "False Negatives:      {}", r.false_negatives)?;
            writeln!(f, "Precision:            {:.3}", r.precision)?;
            writeln!(f, "Recall:               {:.3}", r.recall)?;
            writeln!(f, "F1 Score:             {:.3}", r.f1)?;
            writeln!(f)?;
        }

        writeln!(f, "{}", HEAVY_RULE)
    }
}
