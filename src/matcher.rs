use anyhow::{anyhow, Result};

use crate::gallery::Gallery;

/// Default maximum distance for an accepted match.
pub const DEFAULT_TOLERANCE: f64 = 0.6;

/// Closest gallery subject for a probe.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchCandidate {
    pub subject_name: String,
    pub distance: f64,
}

impl MatchCandidate {
    /// `1 - distance`, clamped to `[0, 1]`.
    pub fn confidence(&self) -> f64 {
        (1.0 - self.distance).clamp(0.0, 1.0)
    }
}

/// Nearest-neighbour matcher with a fixed acceptance tolerance.
#[derive(Clone, Copy, Debug)]
pub struct MatchEngine {
    tolerance: f64,
}

impl MatchEngine {
    pub fn new(tolerance: f64) -> Result<Self> {
        if !tolerance.is_finite() || tolerance <= 0.0 {
            return Err(anyhow!("match tolerance must be positive, got {}", tolerance));
        }
        Ok(Self { tolerance })
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Closest entry regardless of tolerance.
    ///
    /// Ties resolve to the first entry in gallery order (lexical by name).
    /// Entries whose length differs from the probe are skipped.
    pub fn nearest(&self, probe: &[f32], gallery: &Gallery) -> Result<Option<MatchCandidate>> {
        let entries = gallery.read()?;
        let mut best: Option<MatchCandidate> = None;
        for (name, encoding) in entries.iter() {
            if encoding.len() != probe.len() {
                log::warn!(
                    "matcher: skipping '{}' (encoding length {} != probe length {})",
                    name,
                    encoding.len(),
                    probe.len()
                );
                continue;
            }
            let distance = euclidean_distance(probe, encoding);
            if best.as_ref().map_or(true, |b| distance < b.distance) {
                best = Some(MatchCandidate {
                    subject_name: name.clone(),
                    distance,
                });
            }
        }
        Ok(best)
    }

    /// Closest entry if it lies within tolerance.
    pub fn best_match(&self, probe: &[f32], gallery: &Gallery) -> Result<Option<MatchCandidate>> {
        match self.nearest(probe, gallery)? {
            Some(candidate) if candidate.distance <= self.tolerance => Ok(Some(candidate)),
            Some(candidate) => {
                log::info!(
                    "matcher: face not recognized (best distance {:.3} > tolerance {:.3})",
                    candidate.distance,
                    self.tolerance
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gallery(entries: &[(&str, Vec<f32>)]) -> Gallery {
        let gallery = Gallery::new();
        for (name, encoding) in entries {
            gallery.upsert(name, encoding.clone()).unwrap();
        }
        gallery
    }

    #[test]
    fn accepts_closest_within_tolerance() -> Result<()> {
        let g = gallery(&[("A", vec![0.3, 0.0]), ("B", vec![0.8, 0.0])]);
        let engine = MatchEngine::new(0.6)?;

        let candidate = engine.best_match(&[0.0, 0.0], &g)?.expect("A within tolerance");
        assert_eq!(candidate.subject_name, "A");
        assert!((candidate.distance - 0.3).abs() < 1e-6);
        assert!((candidate.confidence() - 0.7).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn rejects_beyond_tolerance() -> Result<()> {
        let g = gallery(&[("B", vec![0.8, 0.0])]);
        let engine = MatchEngine::new(0.6)?;
        assert!(engine.best_match(&[0.0, 0.0], &g)?.is_none());
        assert!(engine.nearest(&[0.0, 0.0], &g)?.is_some());
        Ok(())
    }

    #[test]
    fn distance_equal_to_tolerance_is_accepted() -> Result<()> {
        let g = gallery(&[("A", vec![0.5])]);
        let engine = MatchEngine::new(0.5)?;
        assert!(engine.best_match(&[0.0], &g)?.is_some());
        Ok(())
    }

    #[test]
    fn empty_gallery_has_no_candidate() -> Result<()> {
        let engine = MatchEngine::default();
        assert!(engine.best_match(&[0.0, 0.0], &Gallery::new())?.is_none());
        Ok(())
    }

    #[test]
    fn ties_resolve_to_lexically_first_name() -> Result<()> {
        let g = gallery(&[("Zoe", vec![0.0, 0.2]), ("Ana", vec![0.2, 0.0])]);
        let candidate = MatchEngine::default()
            .best_match(&[0.0, 0.0], &g)?
            .expect("tie within tolerance");
        assert_eq!(candidate.subject_name, "Ana");
        Ok(())
    }

    #[test]
    fn confidence_is_clamped() {
        let far = MatchCandidate {
            subject_name: "x".into(),
            distance: 1.7,
        };
        assert_eq!(far.confidence(), 0.0);
    }

    #[test]
    fn tolerance_must_be_positive() {
        assert!(MatchEngine::new(0.0).is_err());
        assert!(MatchEngine::new(f64::NAN).is_err());
    }
}
