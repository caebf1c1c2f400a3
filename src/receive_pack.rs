//! Top-level receive-pack handler (§4.E, tying C + E + A together).
//!
//! Parses the command list, ingests the packfile if one is expected, applies
//! the reference-update transaction, and builds the pkt-line status reply —
//! going through [`crate::request`], [`crate::pack_reader`], and
//! [`crate::transaction`] rather than mutating repository state directly.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::error::{sanitize_line, GitHttpError};
use crate::pack_reader::read_and_ingest_pack;
use crate::pkt_line::{encode_data, encode_flush, PktLineReader};
use crate::repository::RepositoryPort;
use crate::request::ReceivePackRequest;
use crate::transaction::{apply_transaction, CommandOutcome};

pub struct ReceivePackOutcome {
    pub response_body: Vec<u8>,
    pub updated_ref_names: Vec<String>,
}

/// Handle the `git-receive-pack` POST body: parse the command list, ingest
/// the packfile (if one is expected), apply the reference-update
/// transaction, and build the pkt-line status response (§4.E "Response").
pub async fn handle_receive_pack<R: AsyncRead + Unpin>(
    repo: &dyn RepositoryPort,
    body: R,
    cancel: &CancellationToken,
) -> Result<ReceivePackOutcome, GitHttpError> {
    let mut reader = PktLineReader::new(body);
    let request = ReceivePackRequest::parse(&mut reader, repo.hash_width_bytes(), cancel).await?;

    if request.expects_packfile() {
        let mut raw = reader.into_raw();
        let mut pack_bytes = Vec::new();
        raw.read_to_end(&mut pack_bytes)
            .await
            .map_err(|e| GitHttpError::Internal(anyhow::anyhow!("reading packfile body: {e}")))?;

        if let Err(e) = read_and_ingest_pack(repo, &pack_bytes, cancel).await {
            tracing::warn!(error = %e, "rejecting receive-pack: pack ingestion failed");
            return Ok(ReceivePackOutcome {
                response_body: build_pack_error_response(&e.to_string(), &request.commands, request.capabilities.report_status),
                updated_ref_names: Vec::new(),
            });
        }
    }

    let outcomes = apply_transaction(repo, &request.commands, cancel)
        .await
        .map_err(|e| GitHttpError::Internal(e.into()))?;

    let updated_ref_names: Vec<String> =
        outcomes.iter().filter(|o| o.is_ok()).map(|o| o.original_name().to_string()).collect();
    tracing::debug!(commands = outcomes.len(), updated = updated_ref_names.len(), "receive-pack transaction applied");

    let mut body = Vec::new();
    body.extend(encode_data(b"unpack ok\n"));
    if request.capabilities.report_status {
        for outcome in &outcomes {
            body.extend(encode_data(status_line(outcome).as_bytes()));
        }
    }
    body.extend_from_slice(encode_flush());

    Ok(ReceivePackOutcome { response_body: body, updated_ref_names })
}

fn status_line(outcome: &CommandOutcome) -> String {
    match outcome {
        CommandOutcome::Ok { original_name } => format!("ok {original_name}\n"),
        CommandOutcome::Failed { original_name, reason } => {
            format!("ng {original_name} {}\n", sanitize_line(reason))
        }
    }
}

fn build_pack_error_response(
    message: &str,
    commands: &[crate::request::RefUpdateCommand],
    report_status: bool,
) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend(encode_data(format!("unpack error {}\n", sanitize_line(message)).as_bytes()));
    if report_status {
        for cmd in commands {
            body.extend(encode_data(format!("ng {} pack-error\n", cmd.original_name).as_bytes()));
        }
    }
    body.extend_from_slice(encode_flush());
    body
}
