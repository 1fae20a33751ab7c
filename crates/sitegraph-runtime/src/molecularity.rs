//! Complex-aware counts and draws for unimolecular and bimolecular rules.
//!
//! Each left-hand component is connected, so an embedding lies in the
//! complex of its root agent. Grouping a component's embeddings by that
//! complex gives both counts:
//! - unimolecular: the sum over complexes of the product of per-complex
//!   embedding counts
//! - bimolecular: the sum over complexes of first-component embeddings in
//!   the complex times second-component embeddings outside it

use crate::embedding_index::{ComponentId, EmbeddingIndex};
use crate::rule::Molecularity;
use rand::Rng;
use sitegraph_core::error::RuntimeError;
use sitegraph_core::matcher::Embedding;
use sitegraph_core::mixture::Mixture;
use sitegraph_core::types::AgentId;
use std::collections::{BTreeMap, HashMap};

/// Complex number of every agent, valid for one mixture state.
#[derive(Debug, Clone, Default)]
pub struct ComplexLabels(HashMap<AgentId, usize>);

impl ComplexLabels {
    pub fn of(mixture: &Mixture) -> Self {
        let mut labels = HashMap::with_capacity(mixture.len());
        for (n, complex) in mixture.components().into_iter().enumerate() {
            for agent in complex {
                labels.insert(agent, n);
            }
        }
        Self(labels)
    }

    pub fn complex(&self, agent: AgentId) -> Option<usize> {
        self.0.get(&agent).copied()
    }

    fn of_embedding(&self, embedding: &Embedding) -> Option<usize> {
        embedding.agent(0).and_then(|root| self.complex(root))
    }
}

type Groups<'a> = BTreeMap<usize, Vec<&'a Embedding>>;

fn group<'a>(index: &'a EmbeddingIndex, id: ComponentId, labels: &ComplexLabels) -> Groups<'a> {
    let mut groups: Groups<'a> = BTreeMap::new();
    for embedding in index.embeddings(id) {
        if let Some(complex) = labels.of_embedding(embedding) {
            groups.entry(complex).or_default().push(embedding);
        }
    }
    groups
}

fn group_len(groups: &Groups<'_>, complex: usize) -> f64 {
    groups.get(&complex).map_or(0.0, |g| g.len() as f64)
}

/// Per-complex weights of a restricted rule, in complex order.
fn weights(
    index: &EmbeddingIndex,
    components: &[ComponentId],
    molecularity: Molecularity,
    labels: &ComplexLabels,
) -> Vec<(usize, f64)> {
    let groups: Vec<Groups<'_>> = components.iter().map(|&id| group(index, id, labels)).collect();
    let Some(first) = groups.first() else {
        return Vec::new();
    };
    match molecularity {
        Molecularity::Any => Vec::new(),
        Molecularity::Unimolecular => first
            .keys()
            .map(|&c| (c, groups.iter().map(|g| group_len(g, c)).product::<f64>()))
            .filter(|&(_, w)| w > 0.0)
            .collect(),
        Molecularity::Bimolecular => {
            let (Some(second), Some(&second_id)) = (groups.get(1), components.get(1)) else {
                return Vec::new();
            };
            let total_second = index.size(second_id) as f64;
            first
                .iter()
                .map(|(&c, g)| (c, g.len() as f64 * (total_second - group_len(second, c))))
                .filter(|&(_, w)| w > 0.0)
                .collect()
        }
    }
}

/// Number of left-hand tuples the rule counts.
pub fn count(
    index: &EmbeddingIndex,
    components: &[ComponentId],
    molecularity: Molecularity,
    labels: &ComplexLabels,
) -> f64 {
    match molecularity {
        Molecularity::Any => index.weight(components),
        _ => weights(index, components, molecularity, labels)
            .iter()
            .map(|&(_, w)| w)
            .sum(),
    }
}

fn pick<'a, R: Rng + ?Sized>(items: &[&'a Embedding], rng: &mut R) -> Option<&'a Embedding> {
    if items.is_empty() {
        None
    } else {
        Some(items[rng.gen_range(0..items.len())])
    }
}

/// Draw one embedding per component, uniformly over the tuples `count`
/// counts.
pub fn sample<R: Rng + ?Sized>(
    rng: &mut R,
    index: &EmbeddingIndex,
    components: &[ComponentId],
    molecularity: Molecularity,
    labels: &ComplexLabels,
) -> Result<Vec<Embedding>, RuntimeError> {
    let empty = || RuntimeError::EmptyIndex(components.first().map_or(0, |c| c.0));
    if molecularity == Molecularity::Any {
        return components
            .iter()
            .map(|&id| index.sample_uniform(id, &mut *rng).cloned())
            .collect();
    }

    let weights = weights(index, components, molecularity, labels);
    let total: f64 = weights.iter().map(|&(_, w)| w).sum();
    if total <= 0.0 {
        return Err(empty());
    }
    let draw = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    let mut chosen = None;
    for &(complex, w) in &weights {
        // Rounding can leave the draw just past the last interval.
        chosen = Some(complex);
        cumulative += w;
        if draw < cumulative {
            break;
        }
    }
    let Some(complex) = chosen else {
        return Err(empty());
    };

    match molecularity {
        Molecularity::Unimolecular => components
            .iter()
            .map(|&id| {
                let inside: Vec<&Embedding> = index
                    .embeddings(id)
                    .iter()
                    .filter(|e| labels.of_embedding(e) == Some(complex))
                    .collect();
                pick(&inside, &mut *rng).cloned().ok_or(RuntimeError::EmptyIndex(id.0))
            })
            .collect(),
        _ => {
            let (first, second) = match components {
                [first, second] => (*first, *second),
                _ => return Err(empty()),
            };
            let inside: Vec<&Embedding> = index
                .embeddings(first)
                .iter()
                .filter(|e| labels.of_embedding(e) == Some(complex))
                .collect();
            let outside: Vec<&Embedding> = index
                .embeddings(second)
                .iter()
                .filter(|e| labels.of_embedding(e) != Some(complex))
                .collect();
            let a = pick(&inside, rng).ok_or(RuntimeError::EmptyIndex(first.0))?;
            let b = pick(&outside, rng).ok_or(RuntimeError::EmptyIndex(second.0))?;
            Ok(vec![a.clone(), b.clone()])
        }
    }
}
