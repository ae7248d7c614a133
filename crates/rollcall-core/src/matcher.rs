//! Nearest-neighbor identity matching over a cache snapshot.
//!
//! A cheap quality gate rejects hopeless probes (bad lighting, non-face)
//! against a small fixed sample before the full linear scan runs.

use thiserror::Error;

use crate::cache::CacheSnapshot;
use crate::types::Embedding;

// --- Tuned defaults (configurable, no documented derivation upstream) ---
const DEFAULT_MATCH_THRESHOLD: f32 = 0.68;
const DEFAULT_QUALITY_THRESHOLD: f32 = 0.90;
const DEFAULT_QUALITY_SAMPLE_SIZE: usize = 5;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("no enrollment data in cache")]
    NoEnrollmentData,
}

/// Matcher tuning parameters.
#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    /// A candidate matches iff its distance is strictly below this.
    pub match_threshold: f32,
    /// Mean sampled distance strictly above this rejects the probe
    /// before the full scan.
    pub quality_threshold: f32,
    /// Number of cache entries sampled by the quality gate. Zero
    /// disables the gate.
    pub quality_sample_size: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            quality_sample_size: DEFAULT_QUALITY_SAMPLE_SIZE,
        }
    }
}

/// Outcome of matching one probe against one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Minimum distance was strictly below the match threshold.
    Matched {
        identity: String,
        distance: f32,
        compared: usize,
    },
    /// Scan completed but nothing was close enough; `closest` is the
    /// minimum distance seen, kept for diagnostics.
    Unknown { closest: f32, compared: usize },
    /// Quality gate rejection; the full scan never ran.
    PoorQuality { mean_distance: f32, sampled: usize },
}

/// Strategy for resolving a probe embedding to an enrolled identity.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        snapshot: &CacheSnapshot,
    ) -> Result<MatchOutcome, MatchError>;
}

/// Cosine-distance matcher: quality gate, then a full linear scan.
///
/// Ties break to the first entry in scan order; snapshot entries are in
/// stable listing order per refresh, so the tie-break is deterministic.
pub struct CosineMatcher {
    config: MatcherConfig,
}

impl CosineMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Mean distance between the probe and the first
    /// `quality_sample_size` entries.
    fn sample_mean_distance(&self, probe: &Embedding, snapshot: &CacheSnapshot) -> (f32, usize) {
        let sample = &snapshot.entries[..self.config.quality_sample_size.min(snapshot.entries.len())];
        let total: f32 = sample
            .iter()
            .map(|e| probe.cosine_distance(&e.embedding))
            .sum();
        (total / sample.len() as f32, sample.len())
    }
}

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        snapshot: &CacheSnapshot,
    ) -> Result<MatchOutcome, MatchError> {
        if snapshot.entries.is_empty() {
            return Err(MatchError::NoEnrollmentData);
        }

        if self.config.quality_sample_size > 0 {
            let (mean, sampled) = self.sample_mean_distance(probe, snapshot);
            if mean > self.config.quality_threshold {
                tracing::debug!(mean, sampled, "probe rejected by quality gate");
                return Ok(MatchOutcome::PoorQuality {
                    mean_distance: mean,
                    sampled,
                });
            }
        }

        let mut best_distance = f32::INFINITY;
        let mut best_identity: Option<&str> = None;

        // Strict `<` keeps the first-encountered entry on exact ties.
        for entry in &snapshot.entries {
            let distance = probe.cosine_distance(&entry.embedding);
            if distance < best_distance {
                best_distance = distance;
                best_identity = Some(&entry.identity);
            }
        }

        let compared = snapshot.entries.len();
        match best_identity {
            Some(identity) if best_distance < self.config.match_threshold => {
                tracing::debug!(identity, distance = best_distance, compared, "probe matched");
                Ok(MatchOutcome::Matched {
                    identity: identity.to_string(),
                    distance: best_distance,
                    compared,
                })
            }
            _ => {
                tracing::debug!(closest = best_distance, compared, "no confident match");
                Ok(MatchOutcome::Unknown {
                    closest: best_distance,
                    compared,
                })
            }
        }
    }
}

impl Default for CosineMatcher {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}
