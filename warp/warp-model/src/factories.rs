//! Per-entity strategy lookup tables.
//!
//! Every mesh (or frame) in a model is bound to the best matching strategy
//! of the right kind: an exact target beats the wildcard. Entities that no
//! strategy targets have no entry.

use hashbrown::HashMap;
use tracing::debug;

use crate::error::{ModelWarpError, ModelWarpResult};
use crate::model::AnatomicalModel;
use crate::strategy::{StrategyDefinition, StrategyKind, StrategyMatchQuality};
use crate::warper::WarpingStrategy;

/// Rejects two strategies of the same kind that share a target.
///
/// The wildcard counts as a target, so two mesh strategies may not both
/// target `*`, but a mesh and a frame strategy may.
///
/// # Errors
///
/// Returns [`ModelWarpError::ConflictingTargets`] naming the first clash.
pub fn check_target_conflicts(definitions: &[StrategyDefinition]) -> ModelWarpResult<()> {
    let mut owners: HashMap<(StrategyKind, &str), &str> = HashMap::new();
    for definition in definitions {
        for target in &definition.targets {
            if let Some(first) = owners.insert((definition.kind(), target.as_str()), &definition.name) {
                return Err(ModelWarpError::ConflictingTargets {
                    target: target.to_string(),
                    first: first.to_string(),
                    second: definition.name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn best_match<'a>(
    definitions: &'a [StrategyDefinition],
    kind: StrategyKind,
    path: &str,
) -> Option<&'a StrategyDefinition> {
    definitions
        .iter()
        .filter(|d| d.kind() == kind)
        .map(|d| (d.match_quality(path), d))
        .filter(|(quality, _)| *quality > StrategyMatchQuality::None)
        // conflicts are rejected up front, so the best quality is unique
        .max_by_key(|(quality, _)| *quality)
        .map(|(_, d)| d)
}

macro_rules! warper_factories {
    ($(#[$meta:meta])* $name:ident, $kind:expr, $entities:ident, $bind:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            strategies: HashMap<String, WarpingStrategy>,
        }

        impl $name {
            #[doc = concat!("Binds the best matching definition to every ", $label, " in `model`.")]
            ///
            /// # Errors
            ///
            /// Returns [`ModelWarpError::ConflictingTargets`] if two
            /// definitions of the same kind share a target.
            pub fn new(model: &AnatomicalModel, definitions: &[StrategyDefinition]) -> ModelWarpResult<Self> {
                check_target_conflicts(definitions)?;

                let mut strategies = HashMap::new();
                for entity in &model.$entities {
                    if let Some(definition) = best_match(definitions, $kind, &entity.path) {
                        let strategy = WarpingStrategy::$bind(definition, entity, model)?;
                        strategies.insert(entity.path.clone(), strategy);
                    }
                }
                debug!(kind = %$kind, bound = strategies.len(), "bound warp strategies");
                Ok(Self { strategies })
            }

            #[doc = concat!("The strategy bound to the ", $label, " at `path`.")]
            #[must_use]
            pub fn find(&self, path: &str) -> Option<&WarpingStrategy> {
                self.strategies.get(path)
            }

            /// Number of bound strategies.
            #[must_use]
            pub fn len(&self) -> usize {
                self.strategies.len()
            }

            /// Returns true if nothing is bound.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.strategies.is_empty()
            }

            /// Every bound strategy, keyed by entity path, in no particular order.
            pub fn iter(&self) -> impl Iterator<Item = (&str, &WarpingStrategy)> {
                self.strategies.iter().map(|(path, s)| (path.as_str(), s))
            }
        }
    };
}

warper_factories!(
    /// Mesh strategies, keyed by mesh path.
    PointWarperFactories,
    StrategyKind::Mesh,
    meshes,
    for_mesh,
    "mesh"
);

warper_factories!(
    /// Frame strategies, keyed by frame path.
    FrameWarperFactories,
    StrategyKind::Frame,
    frames,
    for_frame,
    "frame"
);
