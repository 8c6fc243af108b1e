//! Edge selector — entropy-driven coverage of the frontier.
//!
//! A peaked valence distribution selects few edges, a flat one selects
//! many. The coverage target is `1 - e^{-H}` where `H` is the Shannon
//! entropy of the normalized valences.

use tendril_core::types::EdgeId;

/// Result of selecting from a scored frontier.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Chosen edges, highest valence first.
    pub edges: Vec<EdgeId>,
    pub entropy: f64,
    pub coverage_target: f64,
    /// Probability mass of the chosen prefix.
    pub covered_mass: f64,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

fn probabilities(valences: &[(EdgeId, f64)]) -> Option<Vec<f64>> {
    let clean: Vec<f64> = valences
        .iter()
        .map(|(_, v)| if v.is_finite() && *v > 0.0 { *v } else { 0.0 })
        .collect();
    let total: f64 = clean.iter().sum();
    if total <= 0.0 {
        return None;
    }
    Some(clean.into_iter().map(|v| v / total).collect())
}

/// Shannon entropy (nats) of the normalized valences. Zero for empty or
/// all-zero input.
pub fn valence_entropy(valences: &[(EdgeId, f64)]) -> f64 {
    probabilities(valences)
        .map(|ps| {
            ps.iter()
                .filter(|p| **p > 0.0)
                .map(|p| -p * p.ln())
                .sum()
        })
        .unwrap_or(0.0)
}

/// Entropy divided by its maximum `ln(n)`, in [0, 1].
pub fn normalized_entropy(valences: &[(EdgeId, f64)]) -> f64 {
    if valences.len() < 2 {
        return 0.0;
    }
    (valence_entropy(valences) / (valences.len() as f64).ln()).clamp(0.0, 1.0)
}

/// Pick the shortest highest-valence prefix whose mass reaches the
/// coverage target.
///
/// At least one edge is returned whenever the input is non-empty. Ties
/// are broken by edge id; all-zero input selects the lowest edge id.
pub fn select_edges(valences: &[(EdgeId, f64)]) -> Selection {
    if valences.is_empty() {
        return Selection {
            edges: Vec::new(),
            entropy: 0.0,
            coverage_target: 0.0,
            covered_mass: 0.0,
        };
    }

    let Some(probs) = probabilities(valences) else {
        let first = valences.iter().map(|(e, _)| *e).min();
        return Selection {
            edges: first.into_iter().collect(),
            entropy: 0.0,
            coverage_target: 0.0,
            covered_mass: 0.0,
        };
    };

    let entropy = valence_entropy(valences);
    let coverage_target = 1.0 - (-entropy).exp();

    let mut ranked: Vec<(EdgeId, f64)> = valences
        .iter()
        .zip(&probs)
        .map(|((e, _), p)| (*e, *p))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut edges = Vec::new();
    let mut covered_mass = 0.0;
    for (edge, p) in ranked {
        edges.push(edge);
        covered_mass += p;
        if covered_mass >= coverage_target {
            break;
        }
    }

    Selection {
        edges,
        entropy,
        coverage_target,
        covered_mass,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vals(vs: &[f64]) -> Vec<(EdgeId, f64)> {
        vs.iter()
            .enumerate()
            .map(|(i, v)| (EdgeId(i as u64), *v))
            .collect()
    }

    #[test]
    fn peaked_selects_one() {
        let s = select_edges(&vals(&[0.97, 0.01, 0.01, 0.01]));
        assert_eq!(s.edges, vec![EdgeId(0)]);
    }

    #[test]
    fn flat_selects_several() {
        let s = select_edges(&vals(&[0.25, 0.25, 0.25, 0.25]));
        assert!(s.edges.len() > 1);
        assert!((s.coverage_target - 0.75).abs() < 1e-9);
        assert_eq!(s.edges[0], EdgeId(0));
    }

    #[test]
    fn graded_selects_top_two() {
        let s = select_edges(&vals(&[0.05, 0.5, 0.15, 0.3]));
        assert!((s.entropy - 1.1421).abs() < 1e-3, "entropy {}", s.entropy);
        assert_eq!(s.edges, vec![EdgeId(1), EdgeId(3)]);
        assert!(s.covered_mass >= s.coverage_target);
    }

    #[test]
    fn zero_and_empty_inputs() {
        assert!(select_edges(&[]).is_empty());
        let s = select_edges(&[(EdgeId(7), 0.0), (EdgeId(3), 0.0)]);
        assert_eq!(s.edges, vec![EdgeId(3)]);
    }

    #[test]
    fn normalized_entropy_bounds() {
        assert_eq!(normalized_entropy(&vals(&[1.0])), 0.0);
        assert!((normalized_entropy(&vals(&[1.0, 1.0, 1.0])) - 1.0).abs() < 1e-12);
        assert!(normalized_entropy(&vals(&[0.9, 0.1])) < 1.0);
    }
}
