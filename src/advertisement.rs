//! The `info/refs` advertisement response (§4.D "Advertisement").
//!
//! One function, parameterised on [`Service`], builds the service line +
//! flush, resolves HEAD's symref, sorts refs, and builds the capability
//! string shared by both upload-pack and receive-pack discovery.

use tokio_util::sync::CancellationToken;

use crate::error::GitHttpError;
use crate::hash::ObjectId;
use crate::pkt_line::{encode_data, encode_flush};
use crate::repository::{HeadValue, RepositoryPort};
use crate::request::Service;

/// Render the full `info/refs` advertisement body for `service` (§4.D).
pub async fn build_advertisement(
    repo: &dyn RepositoryPort,
    service: Service,
    agent: &str,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, GitHttpError> {
    let refs = repo
        .get_references(cancel)
        .await
        .map_err(|e| GitHttpError::Internal(e.into()))?;
    let head = repo.read_head(cancel).await.map_err(|e| GitHttpError::Internal(e.into()))?;

    let mut out = Vec::new();
    out.extend(encode_data(format!("# service={}\n", service.as_str()).as_bytes()));
    out.extend_from_slice(encode_flush());

    let (head_entry, symref_target) = resolve_head(&head, &refs);

    let mut sorted: Vec<(&String, &ObjectId)> = refs.iter().collect();
    sorted.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    let capabilities = build_capabilities(service, agent, symref_target.as_deref());

    let mut entries: Vec<(String, ObjectId)> = Vec::new();
    if let Some((name, id)) = head_entry {
        entries.push((name, id));
    }
    entries.extend(sorted.into_iter().map(|(n, h)| (n.clone(), h.clone())));

    if entries.is_empty() {
        // Empty repo: single capabilities^{} record (§4.D step 5).
        let line = format!(
            "{} capabilities^{{}}\0{}\n",
            ObjectId::zero(repo.hash_width_bytes()).to_hex(),
            capabilities
        );
        out.extend(encode_data(line.as_bytes()));
    } else {
        for (idx, (name, id)) in entries.iter().enumerate() {
            let line = if idx == 0 {
                format!("{} {}\0{}\n", id.to_hex(), name, capabilities)
            } else {
                format!("{} {}\n", id.to_hex(), name)
            };
            out.extend(encode_data(line.as_bytes()));
        }
    }

    out.extend_from_slice(encode_flush());
    Ok(out)
}

/// Resolve HEAD into an advertised `(name, hash)` entry (if resolvable) and
/// the symref target name to mention in capabilities (§4.D step 2).
fn resolve_head(
    head: &HeadValue,
    refs: &std::collections::HashMap<String, ObjectId>,
) -> (Option<(String, ObjectId)>, Option<String>) {
    match head {
        HeadValue::Hash(id) => (Some(("HEAD".to_string(), id.clone())), None),
        HeadValue::Symref(target) => match refs.get(target) {
            Some(id) => (Some(("HEAD".to_string(), id.clone())), Some(target.clone())),
            None => (None, Some(target.clone())),
        },
        HeadValue::Unborn => (None, None),
    }
}

fn build_capabilities(service: Service, agent: &str, symref_target: Option<&str>) -> String {
    let mut parts = Vec::new();
    if let Some(target) = symref_target {
        parts.push(format!("symref=HEAD:{target}"));
    }
    parts.push(format!("agent={agent}"));
    if service == Service::ReceivePack {
        parts.push("report-status".to_string());
        parts.push("delete-refs".to_string());
    }
    parts.join(" ")
}
