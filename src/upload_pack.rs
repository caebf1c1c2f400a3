//! Top-level upload-pack handler (§4.D, tying C + D + A together).
//!
//! Negotiation → `NAK` → pack bytes, going through
//! [`crate::request::UploadPackRequest`], [`crate::closure`], and
//! [`crate::pack_writer`].

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::closure::compute_closure;
use crate::error::GitHttpError;
use crate::objects::GitObject;
use crate::pack_writer::write_pack;
use crate::pkt_line::PktLineReader;
use crate::repository::RepositoryPort;
use crate::request::UploadPackRequest;

/// Handle the `git-upload-pack` POST body: parse the negotiation, compute
/// the closure of the wants, and return `NAK\n` followed by a packfile.
pub async fn handle_upload_pack<R: AsyncRead + Unpin>(
    repo: &dyn RepositoryPort,
    body: R,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, GitHttpError> {
    let mut reader = PktLineReader::new(body);
    let request = UploadPackRequest::parse(&mut reader, repo.hash_width_bytes(), cancel).await?;

    let closure = compute_closure(repo, &request.wants, cancel).await?;
    let objects: Vec<GitObject> = closure.into_iter().map(|(_, obj)| obj).collect();
    tracing::debug!(wants = request.wants.len(), closure = objects.len(), "serving upload-pack");
    let pack = write_pack(&objects);

    let mut out = Vec::new();
    out.extend(crate::pkt_line::encode_data(b"NAK\n"));
    out.extend(pack);
    Ok(out)
}
