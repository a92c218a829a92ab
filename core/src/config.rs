use crate::model::LinkType;
use serde::{Deserialize, Serialize};

// ── Risk weights ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub cost:          f64,
    pub concentration: f64,
    pub dependency:    f64,
    pub timeline:      f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            cost:          0.35,
            concentration: 0.25,
            dependency:    0.25,
            timeline:      0.15,
        }
    }
}

impl RiskWeights {
    pub fn total(&self) -> f64 {
        self.cost + self.concentration + self.dependency + self.timeline
    }
}

// ── Risk level bands ────────────────────────────────────────────────

/// Upper bounds (exclusive) of the low / medium / high bands.
/// Anything at or above `high` is critical.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub low:    f64,
    pub medium: f64,
    pub high:   f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self { low: 25.0, medium: 50.0, high: 75.0 }
    }
}

// ── Co-dependency policy ────────────────────────────────────────────

/// Which link types make two projects co-dependent when they share an upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodependencyPolicy {
    pub link_types: Vec<LinkType>,
}

impl Default for CodependencyPolicy {
    fn default() -> Self {
        Self {
            link_types: vec![LinkType::CostAllocated, LinkType::TaggedNoCost],
        }
    }
}

impl CodependencyPolicy {
    pub fn cost_allocated_only() -> Self {
        Self { link_types: vec![LinkType::CostAllocated] }
    }

    pub fn counts(&self, link_type: LinkType) -> bool {
        self.link_types.contains(&link_type)
    }
}

// ── Engine config ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub weights: RiskWeights,
    #[serde(default)]
    pub thresholds: RiskThresholds,
    #[serde(default)]
    pub codependency: CodependencyPolicy,
    /// Tolerance for allocation-share sums.
    #[serde(default = "default_epsilon")]
    pub allocation_epsilon: f64,
    /// Worker threads for multi-cluster runs. 0 = one per CPU.
    #[serde(default)]
    pub workers: usize,
}

fn default_epsilon() -> f64 {
    1e-6
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights:            RiskWeights::default(),
            thresholds:         RiskThresholds::default(),
            codependency:       CodependencyPolicy::default(),
            allocation_epsilon: default_epsilon(),
            workers:            0,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. Missing sections fall back to defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let w = &self.weights;
        for (name, value) in [
            ("cost", w.cost),
            ("concentration", w.concentration),
            ("dependency", w.dependency),
            ("timeline", w.timeline),
        ] {
            if !value.is_finite() || value < 0.0 {
                anyhow::bail!("weight '{name}' must be a non-negative number, got {value}");
            }
        }
        if w.total() <= 0.0 {
            anyhow::bail!("risk weights sum to zero");
        }
        let t = &self.thresholds;
        if !(t.low <= t.medium && t.medium <= t.high) {
            anyhow::bail!(
                "risk thresholds must be ordered low <= medium <= high, got {}/{}/{}",
                t.low, t.medium, t.high
            );
        }
        if self.codependency.link_types.is_empty() {
            anyhow::bail!("co-dependency policy must count at least one link type");
        }
        if !(self.allocation_epsilon >= 0.0) {
            anyhow::bail!("allocation_epsilon must be non-negative");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert!((config.weights.total() - 1.0).abs() < 1e-12);
        assert!(config.codependency.counts(LinkType::TaggedNoCost));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "codependency": { "link_types": ["COST_ALLOCATED"] } }"#)
                .unwrap();
        assert_eq!(config.weights, RiskWeights::default());
        assert!(!config.codependency.counts(LinkType::TaggedNoCost));
        assert_eq!(config.allocation_epsilon, 1e-6);
    }

    #[test]
    fn rejects_zero_weights() {
        let mut config = EngineConfig::default();
        config.weights = RiskWeights { cost: 0.0, concentration: 0.0, dependency: 0.0, timeline: 0.0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_negative_weight() {
        let mut config = EngineConfig::default();
        config.weights.timeline = -0.1;
        assert!(config.validate().is_err());
    }
}
