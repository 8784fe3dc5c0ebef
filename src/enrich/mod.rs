//! Post-extraction enrichment
//!
//! Enrichers run on every record after extraction and before it is written.
//! The only one shipped infers a missing trim from the ad's own text.

use crate::config::EnrichmentConfig;
use crate::site::ExtractedRecord;
use regex::{Regex, RegexBuilder};

/// Fills in or corrects fields of an extracted record
pub trait Enricher: Send + Sync {
    /// Enriches a record in place
    ///
    /// # Returns
    ///
    /// `true` if the record was changed
    fn enrich(&self, record: &mut ExtractedRecord) -> bool;
}

/// Leaves records untouched
pub struct NoEnrichment;

impl Enricher for NoEnrichment {
    fn enrich(&self, _record: &mut ExtractedRecord) -> bool {
        false
    }
}

/// Infers the trim from a master list of known trim names
///
/// The title is searched first, then the description. The longest trim that
/// appears as a whole word wins, so "GLX Plus" beats "GLX". Records that
/// already carry a trim are left alone.
pub struct TrimCatalog {
    /// Longest name first
    trims: Vec<(String, Regex)>,
}

impl TrimCatalog {
    pub fn new(trims: &[String]) -> Self {
        let mut names: Vec<&str> = trims
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        names.sort_by(|a, b| {
            b.chars()
                .count()
                .cmp(&a.chars().count())
                .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        });
        names.dedup_by(|a, b| a.eq_ignore_ascii_case(b));

        let trims = names
            .into_iter()
            .filter_map(|name| {
                let pattern = format!(r"(?:^|\W){}(?:$|\W)", regex::escape(name));
                match RegexBuilder::new(&pattern).case_insensitive(true).build() {
                    Ok(re) => Some((name.to_string(), re)),
                    Err(e) => {
                        tracing::warn!(trim = name, error = %e, "Skipping unusable trim name");
                        None
                    }
                }
            })
            .collect();

        Self { trims }
    }

    pub fn len(&self) -> usize {
        self.trims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trims.is_empty()
    }

    /// Longest known trim mentioned in `text`
    pub fn find(&self, text: &str) -> Option<&str> {
        self.trims
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(name, _)| name.as_str())
    }
}

impl Enricher for TrimCatalog {
    fn enrich(&self, record: &mut ExtractedRecord) -> bool {
        if record.core.trim.is_some() {
            return false;
        }

        let found = [record.core.title.as_deref(), record.description()]
            .into_iter()
            .flatten()
            .find_map(|text| self.find(text))
            .map(str::to_string);

        match found {
            Some(trim) => {
                tracing::debug!(ad_id = record.ad_id(), trim = %trim, "Inferred trim");
                record.core.trim = Some(trim);
                true
            }
            None => false,
        }
    }
}

/// Builds the enricher for a configuration
pub fn build_enricher(config: &EnrichmentConfig) -> Box<dyn Enricher> {
    let catalog = TrimCatalog::new(&config.trims);
    if catalog.is_empty() {
        Box::new(NoEnrichment)
    } else {
        tracing::info!(trims = catalog.len(), "Trim inference enabled");
        Box::new(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::{CoreListing, DubizzleDetail, SiteDetail};
    use chrono::Utc;

    fn catalog() -> TrimCatalog {
        TrimCatalog::new(&[
            "GLX".to_string(),
            "GLX Plus".to_string(),
            "LE".to_string(),
            "  ".to_string(),
        ])
    }

    fn record(title: &str, description: Option<&str>) -> ExtractedRecord {
        let mut core = CoreListing::new("1", "https://example.com/ad/1", "Dubizzle", Utc::now());
        core.title = Some(title.to_string());
        ExtractedRecord {
            core,
            detail: SiteDetail::Dubizzle(DubizzleDetail {
                description: description.map(str::to_string),
                ..DubizzleDetail::default()
            }),
        }
    }

    #[test]
    fn test_longest_whole_word_match() {
        let catalog = catalog();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.find("Hyundai Accent GLX Plus 2021"), Some("GLX Plus"));
        assert_eq!(catalog.find("Hyundai Accent glx"), Some("GLX"));
        assert_eq!(catalog.find("Toyota Camry GLXS"), None);
        assert_eq!(catalog.find("Sale at the lake"), None);
    }

    #[test]
    fn test_fills_missing_trim_from_description() {
        let mut record = record("Toyota Corolla 2019", Some("Clean car, LE edition."));
        assert!(catalog().enrich(&mut record));
        assert_eq!(record.core.trim.as_deref(), Some("LE"));
    }

    #[test]
    fn test_existing_trim_kept() {
        let mut record = record("Hyundai Accent GLX", None);
        record.core.trim = Some("Smart".to_string());
        assert!(!catalog().enrich(&mut record));
        assert_eq!(record.core.trim.as_deref(), Some("Smart"));
    }

    #[test]
    fn test_empty_config_builds_no_enrichment() {
        let enricher = build_enricher(&EnrichmentConfig::default());
        let mut record = record("Hyundai Accent GLX", None);
        assert!(!enricher.enrich(&mut record));
        assert!(record.core.trim.is_none());
    }
}
