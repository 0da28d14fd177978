//! Cheap quality score for extracted section text
//!
//! An operator signal only: a low score is logged, never fatal. The garbage
//! filter at chunking time is what keeps junk out of the index.

use std::collections::HashMap;

/// Below this many trimmed characters the output is treated as empty
const NEAR_EMPTY_CHARS: usize = 20;
/// Characters a page of real content is expected to yield at minimum
const MIN_CHARS_PER_PAGE: usize = 200;
/// Lines this short are ignored when looking for repeated boilerplate
const MIN_BOILERPLATE_LINE: usize = 8;

/// Score breakdown for one section
#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    /// 0-100, higher is better
    pub score: u8,
    pub chars: usize,
    pub chars_per_page: usize,
    /// Share of non-trivial lines that repeat an earlier line
    pub repeated_line_ratio: f32,
    pub issues: Vec<String>,
}

impl QualityReport {
    pub fn passes(&self, threshold: u8) -> bool {
        self.score >= threshold
    }
}

/// Score extracted text against the number of pages it came from
pub fn assess(text: &str, page_count: u32) -> QualityReport {
    let trimmed = text.trim();
    let chars = trimmed.chars().count();
    let pages = page_count.max(1) as usize;
    let chars_per_page = chars / pages;

    if chars < NEAR_EMPTY_CHARS {
        return QualityReport {
            score: 0,
            chars,
            chars_per_page,
            repeated_line_ratio: 0.0,
            issues: vec![format!("near-empty output ({} chars)", chars)],
        };
    }

    let mut score: f32 = 100.0;
    let mut issues = Vec::new();

    if chars_per_page < MIN_CHARS_PER_PAGE {
        // Up to 50 points for output far shorter than the page count implies
        let shortfall = 1.0 - chars_per_page as f32 / MIN_CHARS_PER_PAGE as f32;
        score -= 50.0 * shortfall;
        issues.push(format!(
            "short output: {} chars/page over {} pages",
            chars_per_page, pages
        ));
    }

    let repeated_line_ratio = repeated_line_ratio(trimmed);
    if repeated_line_ratio > 0.3 {
        score -= 40.0 * ((repeated_line_ratio - 0.3) / 0.7).min(1.0) + 10.0;
        issues.push(format!(
            "repeated boilerplate: {:.0}% of lines are duplicates",
            repeated_line_ratio * 100.0
        ));
    }

    QualityReport {
        score: score.clamp(0.0, 100.0).round() as u8,
        chars,
        chars_per_page,
        repeated_line_ratio,
        issues,
    }
}

fn repeated_line_ratio(text: &str) -> f32 {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut total = 0usize;

    for line in text.lines().map(str::trim).filter(|l| l.len() >= MIN_BOILERPLATE_LINE) {
        total += 1;
        *seen.entry(line).or_default() += 1;
    }

    if total == 0 {
        return 0.0;
    }
    let repeats: usize = seen.values().map(|n| n - 1).sum();
    repeats as f32 / total as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph(seed: usize) -> String {
        format!(
            "Clause {} sets out the obligations of the contractor regarding delivery schedules, \
             acceptance testing and the remedies available to the client when milestones slip. ",
            seed
        )
    }

    #[test]
    fn test_empty_output_scores_zero() {
        let report = assess("   \n ", 3);
        assert_eq!(report.score, 0);
        assert!(!report.passes(60));
    }

    #[test]
    fn test_full_pages_pass() {
        let text: String = (0..12).map(|i| paragraph(i) + "\n").collect();
        let report = assess(&text, 3);
        assert_eq!(report.score, 100);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_short_output_for_many_pages_is_penalized() {
        let text = paragraph(1);
        let report = assess(&text, 40);
        assert!(report.score < 60, "score {}", report.score);
    }

    #[test]
    fn test_repeated_boilerplate_is_penalized() {
        let mut text = String::new();
        for i in 0..20 {
            text.push_str("CONFIDENTIAL - INTERNAL USE ONLY\n");
            text.push_str(&paragraph(i % 2));
            text.push('\n');
        }
        let report = assess(&text, 2);
        assert!(report.repeated_line_ratio > 0.9);
        assert!(report.score < 60, "score {}", report.score);
    }
}
