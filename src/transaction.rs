//! Reference-update transaction (§4.E "Reference-update transaction").
//!
//! Normalises names, acquires a sorted scoped lock via
//! [`RepositoryPort::acquire_multi_ref_lock`], then applies each command's
//! CAS policy through `write_ref_with_cas`, reporting non-fast-forward,
//! already-exists, and CAS-failure outcomes per command.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::error::sanitize_line;
use crate::hash::ObjectId;
use crate::repository::{RepoError, RepositoryPort};
use crate::request::RefUpdateCommand;

/// Outcome of applying one command, keyed to the client's original ref name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Ok { original_name: String },
    Failed { original_name: String, reason: String },
}

impl CommandOutcome {
    pub fn original_name(&self) -> &str {
        match self {
            CommandOutcome::Ok { original_name } => original_name,
            CommandOutcome::Failed { original_name, .. } => original_name,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CommandOutcome::Ok { .. })
    }
}

/// Replace backslashes with `/`, trim whitespace (§4.E step 1).
fn normalise(name: &str) -> String {
    name.trim().replace('\\', "/")
}

/// Apply a receive-pack command list as one transaction: normalise names,
/// acquire a sorted multi-ref lock spanning all of them, then apply each
/// command's CAS policy in *input* order (§4.E steps 1-5).
///
/// Returns one outcome per input command, in the same order as `commands`,
/// and the subset of original names that ended up `ok` (for the post-push
/// hook).
pub async fn apply_transaction(
    repo: &dyn RepositoryPort,
    commands: &[RefUpdateCommand],
    cancel: &CancellationToken,
) -> Result<Vec<CommandOutcome>, RepoError> {
    let normalised: Vec<Option<String>> = commands
        .iter()
        .map(|cmd| {
            let name = normalise(&cmd.original_name);
            if name.starts_with("refs/") {
                Some(name)
            } else {
                None
            }
        })
        .collect();

    let lock_names: Vec<String> = normalised.iter().flatten().cloned().collect();
    let guard = repo.acquire_multi_ref_lock(&lock_names, cancel).await?;

    let mut snapshot: HashMap<String, ObjectId> = repo.get_references(cancel).await?;
    let mut outcomes = Vec::with_capacity(commands.len());

    for (cmd, name) in commands.iter().zip(normalised.iter()) {
        let Some(name) = name else {
            outcomes.push(CommandOutcome::Failed {
                original_name: cmd.original_name.clone(),
                reason: "references must reside under refs/".to_string(),
            });
            continue;
        };

        let current = snapshot.get(name);

        if let Some(old) = &cmd.old {
            if current != Some(old) {
                outcomes.push(CommandOutcome::Failed {
                    original_name: cmd.original_name.clone(),
                    reason: "non-fast-forward".to_string(),
                });
                continue;
            }
        } else if current.is_some() {
            outcomes.push(CommandOutcome::Failed {
                original_name: cmd.original_name.clone(),
                reason: "reference exists".to_string(),
            });
            continue;
        }

        match repo
            .write_ref_with_cas(&guard, name, cmd.old.as_ref(), cmd.new.as_ref(), cancel)
            .await
        {
            Ok(()) => {
                match &cmd.new {
                    Some(id) => {
                        snapshot.insert(name.clone(), id.clone());
                    }
                    None => {
                        snapshot.remove(name);
                    }
                }
                outcomes.push(CommandOutcome::Ok { original_name: cmd.original_name.clone() });
            }
            Err(e) => {
                tracing::warn!(ref_name = %name, error = %e, "ref update rejected");
                outcomes.push(CommandOutcome::Failed {
                    original_name: cmd.original_name.clone(),
                    reason: sanitize_line(&e.to_string()),
                });
            }
        }
    }

    drop(guard);
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryRepository;
    use std::path::PathBuf;

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    fn oid(byte: u8) -> ObjectId {
        ObjectId::from_bytes(vec![byte; crate::hash::SHA1_WIDTH])
    }

    #[tokio::test]
    async fn create_ref_succeeds_when_absent() {
        let repo = MemoryRepository::new(PathBuf::from("/tmp/x.git"));
        let cmds = vec![RefUpdateCommand {
            old: None,
            new: Some(oid(1)),
            original_name: "refs/heads/main".to_string(),
        }];
        let outcomes = apply_transaction(&repo, &cmds, &cancel()).await.unwrap();
        assert!(outcomes[0].is_ok());
        let refs = repo.get_references(&cancel()).await.unwrap();
        assert_eq!(refs.get("refs/heads/main"), Some(&oid(1)));
    }

    #[tokio::test]
    async fn create_fails_if_ref_already_exists() {
        let repo = MemoryRepository::new(PathBuf::from("/tmp/x.git"));
        repo.force_set_ref("refs/heads/main", oid(1));
        let cmds = vec![RefUpdateCommand {
            old: None,
            new: Some(oid(2)),
            original_name: "refs/heads/main".to_string(),
        }];
        let outcomes = apply_transaction(&repo, &cmds, &cancel()).await.unwrap();
        assert!(matches!(&outcomes[0], CommandOutcome::Failed { reason, .. } if reason == "reference exists"));
    }

    #[tokio::test]
    async fn non_fast_forward_is_reported() {
        let repo = MemoryRepository::new(PathBuf::from("/tmp/x.git"));
        repo.force_set_ref("refs/heads/main", oid(1));
        let cmds = vec![RefUpdateCommand {
            old: Some(oid(9)),
            new: Some(oid(2)),
            original_name: "refs/heads/main".to_string(),
        }];
        let outcomes = apply_transaction(&repo, &cmds, &cancel()).await.unwrap();
        assert!(matches!(&outcomes[0], CommandOutcome::Failed { reason, .. } if reason == "non-fast-forward"));
        let refs = repo.get_references(&cancel()).await.unwrap();
        assert_eq!(refs.get("refs/heads/main"), Some(&oid(1)));
    }

    #[tokio::test]
    async fn delete_removes_ref() {
        let repo = MemoryRepository::new(PathBuf::from("/tmp/x.git"));
        repo.force_set_ref("refs/heads/topic", oid(3));
        let cmds = vec![RefUpdateCommand {
            old: Some(oid(3)),
            new: None,
            original_name: "refs/heads/topic".to_string(),
        }];
        let outcomes = apply_transaction(&repo, &cmds, &cancel()).await.unwrap();
        assert!(outcomes[0].is_ok());
        let refs = repo.get_references(&cancel()).await.unwrap();
        assert!(!refs.contains_key("refs/heads/topic"));
    }

    #[tokio::test]
    async fn names_outside_refs_are_rejected_without_touching_the_lock() {
        let repo = MemoryRepository::new(PathBuf::from("/tmp/x.git"));
        let cmds = vec![RefUpdateCommand { old: None, new: Some(oid(1)), original_name: "heads/main".to_string() }];
        let outcomes = apply_transaction(&repo, &cmds, &cancel()).await.unwrap();
        assert!(matches!(&outcomes[0], CommandOutcome::Failed { reason, .. } if reason.contains("refs/")));
    }

    #[tokio::test]
    async fn commands_applied_in_input_order_not_sorted_order() {
        let repo = MemoryRepository::new(PathBuf::from("/tmp/x.git"));
        let cmds = vec![
            RefUpdateCommand { old: None, new: Some(oid(1)), original_name: "refs/heads/zzz".to_string() },
            RefUpdateCommand { old: None, new: Some(oid(2)), original_name: "refs/heads/aaa".to_string() },
        ];
        let outcomes = apply_transaction(&repo, &cmds, &cancel()).await.unwrap();
        assert_eq!(outcomes[0].original_name(), "refs/heads/zzz");
        assert_eq!(outcomes[1].original_name(), "refs/heads/aaa");
        assert!(outcomes.iter().all(|o| o.is_ok()));
    }
}
