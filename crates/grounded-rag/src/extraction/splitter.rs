//! Page-range planning for documents above the inline payload limit

use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::types::PageRange;

/// Input tokens billed per section call (prompt plus page images)
pub const EST_INPUT_TOKENS_PER_SECTION: u64 = 1_000;
/// Output tokens expected per section call
pub const EST_OUTPUT_TOKENS_PER_SECTION: u64 = 32_000;

/// A document that can be cut into page ranges
pub trait PagedDocument: Send + Sync {
    fn page_count(&self) -> u32;

    fn size_bytes(&self) -> u64;

    /// Standalone document holding only `range`
    fn extract_pages(&self, range: PageRange) -> Result<Vec<u8>>;
}

/// PDF backed by lopdf
pub struct PdfDocument {
    bytes: Vec<u8>,
    doc: lopdf::Document,
}

impl PdfDocument {
    pub fn load(bytes: Vec<u8>) -> Result<Self> {
        let doc = lopdf::Document::load_mem(&bytes)?;
        Ok(Self { bytes, doc })
    }
}

impl PagedDocument for PdfDocument {
    fn page_count(&self) -> u32 {
        self.doc.get_pages().len() as u32
    }

    fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn extract_pages(&self, range: PageRange) -> Result<Vec<u8>> {
        let total = self.page_count();
        if range.start == 0 || range.start > range.end || range.end > total {
            return Err(Error::Pdf(format!(
                "Page range {} outside document of {} pages",
                range, total
            )));
        }
        if range.start == 1 && range.end == total {
            return Ok(self.bytes.clone());
        }

        let mut section = self.doc.clone();
        let drop: Vec<u32> = (1..=total)
            .filter(|page| *page < range.start || *page > range.end)
            .collect();
        section.delete_pages(&drop);
        section.prune_objects();
        section.compress();

        let mut out = Vec::new();
        section
            .save_to(&mut out)
            .map_err(|e| Error::Pdf(format!("Failed to write section {}: {}", range, e)))?;
        Ok(out)
    }
}

/// Any other file, treated as one page that cannot be cut
pub struct WholeDocument {
    bytes: Vec<u8>,
}

impl WholeDocument {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl PagedDocument for WholeDocument {
    fn page_count(&self) -> u32 {
        1
    }

    fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn extract_pages(&self, _range: PageRange) -> Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }
}

/// Contiguous page ranges covering `1..=total_pages` once, in order
///
/// A document at or under `target_section_bytes` is one section. Otherwise
/// `pages_per_section = floor(target / (total_bytes / total_pages))`, at
/// least 1. A single page larger than the target still gets its own section.
pub fn plan_sections(total_bytes: u64, total_pages: u32, target_section_bytes: u64) -> Vec<PageRange> {
    if total_pages == 0 {
        return Vec::new();
    }
    if total_bytes <= target_section_bytes {
        return vec![PageRange::new(1, total_pages)];
    }

    let bytes_per_page = total_bytes as f64 / total_pages as f64;
    let pages_per_section = ((target_section_bytes as f64 / bytes_per_page).floor() as u32)
        .clamp(1, total_pages);

    (1..=total_pages)
        .step_by(pages_per_section as usize)
        .map(|start| PageRange::new(start, (start + pages_per_section - 1).min(total_pages)))
        .collect()
}

/// Estimated USD cost of one extraction call
pub fn section_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    // Per million tokens
    let (input_rate, output_rate) = if model.contains("pro") {
        (1.25, 5.00)
    } else {
        (0.075, 0.30)
    };
    (input_tokens as f64 * input_rate + output_tokens as f64 * output_rate) / 1_000_000.0
}

/// The split decision for one document
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPlan {
    pub sections: Vec<PageRange>,
    pub total_pages: u32,
    /// False when the document goes to the model whole
    pub split: bool,
}

impl SplitPlan {
    /// Cost of extracting every section at the per-section token estimates
    pub fn estimated_cost(&self, model: &str) -> f64 {
        self.sections.len() as f64
            * section_cost(model, EST_INPUT_TOKENS_PER_SECTION, EST_OUTPUT_TOKENS_PER_SECTION)
    }
}

/// Decides whether and how to split a document
#[derive(Debug, Clone)]
pub struct SectionSplitter {
    inline_limit_bytes: u64,
    target_section_bytes: u64,
}

impl SectionSplitter {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            inline_limit_bytes: config.inline_limit_bytes(),
            target_section_bytes: config.target_section_bytes(),
        }
    }

    /// Only documents above the inline limit are split
    pub fn should_split(&self, size_bytes: u64) -> bool {
        size_bytes > self.inline_limit_bytes
    }

    pub fn plan(&self, document: &dyn PagedDocument) -> Result<SplitPlan> {
        let total_pages = document.page_count();
        if total_pages == 0 {
            return Err(Error::permanent("Document has no pages"));
        }

        let size = document.size_bytes();
        if !self.should_split(size) {
            return Ok(SplitPlan {
                sections: vec![PageRange::new(1, total_pages)],
                total_pages,
                split: false,
            });
        }

        let sections = plan_sections(size, total_pages, self.target_section_bytes);
        tracing::info!(
            "Splitting {} byte document ({} pages) into {} sections",
            size,
            total_pages,
            sections.len()
        );

        Ok(SplitPlan {
            sections,
            total_pages,
            split: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_small_document_is_one_section() {
        assert_eq!(plan_sections(5 * MB, 40, 12 * MB), vec![PageRange::new(1, 40)]);
    }

    #[test]
    fn test_large_document_plan() {
        // 50 MB over 100 pages: 0.5 MB/page, 24 pages per 12 MB section
        let plan = plan_sections(50 * MB, 100, 12 * MB);
        assert_eq!(plan.len(), 5);
        assert_eq!(plan[0], PageRange::new(1, 24));
        assert_eq!(plan[4], PageRange::new(97, 100));
    }

    #[test]
    fn test_oversized_single_page_gets_own_section() {
        let plan = plan_sections(60 * MB, 3, 12 * MB);
        assert_eq!(
            plan,
            vec![PageRange::new(1, 1), PageRange::new(2, 2), PageRange::new(3, 3)]
        );
    }

    #[test]
    fn test_splitter_respects_inline_limit() {
        let splitter = SectionSplitter::new(&ExtractionConfig::default());
        assert!(!splitter.should_split(20 * MB));
        assert!(splitter.should_split(20 * MB + 1));

        // Between target and limit: sent whole
        let doc = WholeDocument::new(vec![0u8; (15 * MB) as usize]);
        let plan = splitter.plan(&doc).unwrap();
        assert!(!plan.split);
        assert_eq!(plan.sections, vec![PageRange::new(1, 1)]);
    }

    #[test]
    fn test_cost_estimate_by_model() {
        let plan = SplitPlan {
            sections: vec![PageRange::new(1, 10), PageRange::new(11, 20)],
            total_pages: 20,
            split: true,
        };
        let flash = plan.estimated_cost("gemini-2.5-flash");
        let pro = plan.estimated_cost("gemini-2.5-pro");
        assert!((flash - 2.0 * (1_000.0 * 0.075 + 32_000.0 * 0.30) / 1e6).abs() < 1e-12);
        assert!(pro > flash);
    }

    proptest! {
        #[test]
        fn prop_plan_covers_every_page_once(
            total_pages in 1u32..2_000,
            bytes_per_page in 1u64..2_000_000,
            target in 1u64..30_000_000,
        ) {
            let total_bytes = bytes_per_page * total_pages as u64;
            let plan = plan_sections(total_bytes, total_pages, target);

            prop_assert!(!plan.is_empty());
            prop_assert_eq!(plan[0].start, 1);
            prop_assert_eq!(plan[plan.len() - 1].end, total_pages);
            for range in &plan {
                prop_assert!(range.start <= range.end);
            }
            for pair in plan.windows(2) {
                prop_assert_eq!(pair[1].start, pair[0].end + 1);
            }
            if total_bytes <= target {
                prop_assert_eq!(plan.len(), 1);
            }
        }
    }
}
