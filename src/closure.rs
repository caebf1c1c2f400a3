//! Object closure computation (§4.D "Object closure").
//!
//! One traversal over [`crate::objects::GitObject::direct_references`],
//! uniform across all four object kinds, going through
//! [`RepositoryPort::read_object`]. Cycles cannot occur (§9), so a visited
//! set alone suffices.

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use crate::error::GitHttpError;
use crate::hash::ObjectId;
use crate::objects::GitObject;
use crate::repository::RepositoryPort;

/// Compute the set of hashes transitively reachable from `wants` (§4.D).
/// A missing object fails the whole request with `Internal` (500) per the
/// "do not emit a partial pack" requirement; visitation order is unspecified,
/// uniqueness is guaranteed by the caller's `HashSet`.
pub async fn compute_closure(
    repo: &dyn RepositoryPort,
    wants: &[ObjectId],
    cancel: &CancellationToken,
) -> Result<Vec<(ObjectId, GitObject)>, GitHttpError> {
    let mut visited: HashSet<ObjectId> = HashSet::new();
    let mut queue: Vec<ObjectId> = wants.to_vec();
    let mut ordered = Vec::new();

    while let Some(id) = queue.pop() {
        if cancel.is_cancelled() {
            return Err(GitHttpError::Internal(anyhow::anyhow!("closure computation cancelled")));
        }
        if !visited.insert(id.clone()) {
            continue;
        }

        let object = repo.read_object(&id, cancel).await.map_err(|e| {
            GitHttpError::Internal(anyhow::anyhow!("object {id} missing from store while building closure: {e}"))
        })?;

        for child in object.direct_references() {
            if !visited.contains(&child) {
                queue.push(child);
            }
        }

        ordered.push((id, object));
    }

    Ok(ordered)
}
