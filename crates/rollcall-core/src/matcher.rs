//! Greedy one-to-one assignment of detected faces to roster identities.

use crate::types::{DetectedFace, EnrolledIdentity, MatchResult};

/// Assign faces to identities in detection order.
///
/// Each face takes the most similar identity not already taken by an earlier
/// face in this frame, provided the similarity reaches `threshold`. Equal scores
/// go to the identity listed first in the roster. Faces without an embedding,
/// or whose embedding dimension differs from the roster's, come back unmatched.
/// Identities that do not yield a finite score are passed over.
///
/// Unmatched faces report their best similarity when it is positive.
pub fn assign(
    faces: &[DetectedFace],
    identities: &[EnrolledIdentity],
    threshold: f32,
) -> Vec<MatchResult> {
    let mut taken = vec![false; identities.len()];

    faces
        .iter()
        .map(|face| {
            let Some(embedding) = &face.embedding else {
                return MatchResult::unmatched(face, None);
            };

            let mut best: Option<(usize, f32)> = None;
            for (idx, identity) in identities.iter().enumerate() {
                if taken[idx] {
                    continue;
                }
                let sim = match embedding.similarity(&identity.embedding) {
                    Ok(sim) if sim.is_finite() => sim,
                    _ => continue,
                };
                // Strict comparison keeps the earliest identity on ties.
                let better = match best {
                    None => true,
                    Some((_, best_sim)) => sim > best_sim,
                };
                if better {
                    best = Some((idx, sim));
                }
            }

            match best {
                Some((idx, sim)) if sim >= threshold => {
                    taken[idx] = true;
                    let identity = &identities[idx];
                    tracing::debug!(
                        face = face.box_index,
                        id = %identity.id,
                        similarity = sim,
                        "face matched"
                    );
                    MatchResult {
                        box_index: face.box_index,
                        matched: true,
                        identity_id: Some(identity.id.clone()),
                        display_name: identity.display_name.clone(),
                        external_number: identity.external_number.clone(),
                        similarity: Some(sim),
                        bbox: face.bbox,
                    }
                }
                other => {
                    let best_sim = other.map(|(_, s)| s);
                    tracing::debug!(face = face.box_index, best = ?best_sim, "face unmatched");
                    MatchResult::unmatched(face, best_sim.filter(|s| *s > 0.0))
                }
            }
        })
        .collect()
}
