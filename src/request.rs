//! Request parsing (§4.C): `info/refs` service query, upload-pack negotiation
//! body, and receive-pack command list.
//!
//! Hash parsing goes through [`crate::hash::ObjectId::from_hex`]; the line
//! source is [`crate::pkt_line::PktLineReader`].

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::GitHttpError;
use crate::hash::ObjectId;
use crate::pkt_line::{FramingError, PktLineReader};
use tokio::io::AsyncRead;

/// The `service` query parameter of an `info/refs` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    UploadPack,
    ReceivePack,
}

impl Service {
    pub fn as_str(self) -> &'static str {
        match self {
            Service::UploadPack => "git-upload-pack",
            Service::ReceivePack => "git-receive-pack",
        }
    }

    /// Parse the `service` query value, rejecting anything unrecognised (§4.C).
    pub fn parse(raw: &str) -> Result<Self, GitHttpError> {
        match raw {
            "git-upload-pack" => Ok(Service::UploadPack),
            "git-receive-pack" => Ok(Service::ReceivePack),
            other => Err(GitHttpError::bad_request(format!("unsupported service {other:?}"))),
        }
    }
}

/// A parsed upload-pack negotiation request (§4.C).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPackRequest {
    pub wants: Vec<ObjectId>,
    pub haves: Vec<ObjectId>,
    pub done: bool,
}

/// Parse a `want <hash>[ <capability>...]` or `want <hash>\0<capability>...` line.
/// The trailing `\n` is expected to already be stripped by the caller.
fn parse_hash_line<'a>(line: &'a [u8], keyword: &str, hash_width: usize) -> Option<ObjectId> {
    let rest = line.strip_prefix(keyword.as_bytes())?.strip_prefix(b" ")?;
    let hash_part = match rest.iter().position(|&b| b == 0 || b == b' ') {
        Some(idx) => &rest[..idx],
        None => rest,
    };
    let hex = std::str::from_utf8(hash_part).ok()?;
    ObjectId::from_hex(hex, hash_width)
}

impl UploadPackRequest {
    /// Read pkt-lines until `done` or flush, accumulating `want`/`have` lines.
    /// Hex hashes of the wrong width are discarded silently (§4.C). An empty
    /// want set is a 400, per §4.C and §8's boundary behaviour.
    pub async fn parse<R: AsyncRead + Unpin>(
        reader: &mut PktLineReader<R>,
        hash_width: usize,
        cancel: &CancellationToken,
    ) -> Result<Self, GitHttpError> {
        let mut wants = Vec::new();
        let mut haves = Vec::new();
        let mut done = false;

        loop {
            let record = reader.read_pkt_line(cancel).await.map_err(framing_to_bad_request)?;
            match record {
                crate::pkt_line::PktLine::Flush => break,
                crate::pkt_line::PktLine::Delimiter => continue,
                crate::pkt_line::PktLine::Data(data) => {
                    let line = trim_trailing_newline(&data);
                    if line == b"done" {
                        done = true;
                        break;
                    } else if let Some(id) = parse_hash_line(line, "want", hash_width) {
                        wants.push(id);
                    } else if let Some(id) = parse_hash_line(line, "have", hash_width) {
                        haves.push(id);
                    }
                    // Unrecognised lines (and hash-width mismatches) are ignored.
                }
            }
        }

        if wants.is_empty() {
            return Err(GitHttpError::bad_request("no wants in upload-pack request"));
        }

        Ok(UploadPackRequest { wants, haves, done })
    }
}

fn trim_trailing_newline(data: &Bytes) -> &[u8] {
    let bytes: &[u8] = data.as_ref();
    bytes.strip_suffix(b"\n").unwrap_or(bytes)
}

fn framing_to_bad_request(err: FramingError) -> GitHttpError {
    GitHttpError::bad_request(format!("malformed pkt-line: {err}"))
}

/// Capabilities recognised on the first receive-pack command (§4.C). Only
/// their presence is recorded; `side-band-64k` is never acted on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceivePackCapabilities {
    pub report_status: bool,
    pub delete_refs: bool,
    pub side_band_64k: bool,
}

impl ReceivePackCapabilities {
    fn parse(raw: &str) -> Self {
        let mut caps = Self::default();
        for token in raw.split(' ').filter(|t| !t.is_empty()) {
            match token {
                "report-status" => caps.report_status = true,
                "delete-refs" => caps.delete_refs = true,
                "side-band-64k" => caps.side_band_64k = true,
                _ => {}
            }
        }
        caps
    }
}

/// One `<old> <new> <ref-name>` line from a receive-pack command list,
/// retaining the client's original (pre-normalisation) name for status
/// replies (§4.E "Response").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdateCommand {
    pub old: Option<ObjectId>,
    pub new: Option<ObjectId>,
    pub original_name: String,
}

impl RefUpdateCommand {
    pub fn creates(&self) -> bool {
        self.old.is_none()
    }

    pub fn deletes(&self) -> bool {
        self.new.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceivePackRequest {
    pub commands: Vec<RefUpdateCommand>,
    pub capabilities: ReceivePackCapabilities,
}

impl ReceivePackRequest {
    /// True if any command has a non-zero `new`, meaning a packfile follows (§4.E).
    pub fn expects_packfile(&self) -> bool {
        self.commands.iter().any(|c| c.new.is_some())
    }

    pub async fn parse<R: AsyncRead + Unpin>(
        reader: &mut PktLineReader<R>,
        hash_width: usize,
        cancel: &CancellationToken,
    ) -> Result<Self, GitHttpError> {
        let mut commands = Vec::new();
        let mut capabilities = ReceivePackCapabilities::default();
        let mut first = true;

        loop {
            let record = reader.read_pkt_line(cancel).await.map_err(framing_to_bad_request)?;
            match record {
                crate::pkt_line::PktLine::Flush => break,
                crate::pkt_line::PktLine::Delimiter => continue,
                crate::pkt_line::PktLine::Data(data) => {
                    let mut line: &[u8] = trim_trailing_newline(&data);

                    if first {
                        if let Some(nul) = line.iter().position(|&b| b == 0) {
                            let cap_str = std::str::from_utf8(&line[nul + 1..]).unwrap_or("");
                            capabilities = ReceivePackCapabilities::parse(cap_str);
                            line = &line[..nul];
                        }
                        first = false;
                    }

                    if let Some(cmd) = parse_command_line(line, hash_width) {
                        commands.push(cmd);
                    }
                    // Hashes of the wrong width are skipped, not an error (§4.C).
                }
            }
        }

        Ok(ReceivePackRequest { commands, capabilities })
    }
}

fn parse_command_line(line: &[u8], hash_width: usize) -> Option<RefUpdateCommand> {
    let text = std::str::from_utf8(line).ok()?;
    let mut parts = text.splitn(3, ' ');
    let old_hex = parts.next()?;
    let new_hex = parts.next()?;
    let name = parts.next()?;

    let old_id = ObjectId::from_hex(old_hex, hash_width)?;
    let new_id = ObjectId::from_hex(new_hex, hash_width)?;

    let old = if old_id.is_zero() { None } else { Some(old_id) };
    let new = if new_id.is_zero() { None } else { Some(new_id) };

    Some(RefUpdateCommand { old, new, original_name: name.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::SHA1_WIDTH;
    use crate::pkt_line::{encode_data, encode_flush};

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[test]
    fn service_rejects_unknown_values() {
        assert!(Service::parse("git-upload-pack").is_ok());
        assert!(Service::parse("git-receive-pack").is_ok());
        assert!(Service::parse("git-archive").is_err());
    }

    #[tokio::test]
    async fn upload_pack_request_collects_wants_and_detects_done() {
        let hash = "a".repeat(40);
        let mut body = Vec::new();
        body.extend(encode_data(format!("want {hash} multi_ack side-band-64k\n").as_bytes()));
        body.extend(encode_data(b"done\n"));
        let mut reader = PktLineReader::new(&body[..]);
        let req = UploadPackRequest::parse(&mut reader, SHA1_WIDTH, &cancel()).await.unwrap();
        assert_eq!(req.wants.len(), 1);
        assert!(req.done);
    }

    #[tokio::test]
    async fn upload_pack_request_accepts_nul_separated_capabilities() {
        let hash = "b".repeat(40);
        let mut body = Vec::new();
        body.extend(encode_data(format!("want {hash}\0multi_ack\n").as_bytes()));
        body.extend_from_slice(encode_flush());
        let mut reader = PktLineReader::new(&body[..]);
        let req = UploadPackRequest::parse(&mut reader, SHA1_WIDTH, &cancel()).await.unwrap();
        assert_eq!(req.wants.len(), 1);
    }

    #[tokio::test]
    async fn empty_want_set_is_bad_request() {
        let mut body = Vec::new();
        body.extend(encode_data(b"done\n"));
        let mut reader = PktLineReader::new(&body[..]);
        let err = UploadPackRequest::parse(&mut reader, SHA1_WIDTH, &cancel()).await.unwrap_err();
        assert!(matches!(err, GitHttpError::BadRequest(_)));
    }

    #[tokio::test]
    async fn receive_pack_parses_capabilities_on_first_command_only() {
        let old = "0".repeat(40);
        let new = "c".repeat(40);
        let mut body = Vec::new();
        body.extend(encode_data(
            format!("{old} {new} refs/heads/main\0report-status delete-refs\n").as_bytes(),
        ));
        body.extend_from_slice(encode_flush());
        let mut reader = PktLineReader::new(&body[..]);
        let req = ReceivePackRequest::parse(&mut reader, SHA1_WIDTH, &cancel()).await.unwrap();
        assert_eq!(req.commands.len(), 1);
        assert!(req.capabilities.report_status);
        assert!(req.capabilities.delete_refs);
        assert!(req.expects_packfile());
        assert_eq!(req.commands[0].original_name, "refs/heads/main");
    }

    #[tokio::test]
    async fn receive_pack_all_deletions_does_not_expect_packfile() {
        let old = "d".repeat(40);
        let zero = "0".repeat(40);
        let mut body = Vec::new();
        body.extend(encode_data(format!("{old} {zero} refs/heads/topic\0report-status\n").as_bytes()));
        body.extend_from_slice(encode_flush());
        let mut reader = PktLineReader::new(&body[..]);
        let req = ReceivePackRequest::parse(&mut reader, SHA1_WIDTH, &cancel()).await.unwrap();
        assert!(!req.expects_packfile());
        assert!(req.commands[0].deletes());
    }

    #[tokio::test]
    async fn hash_width_mismatch_is_skipped_not_an_error() {
        let good_old = "0".repeat(40);
        let good_new = "e".repeat(40);
        let mut body = Vec::new();
        // bad: hash too short
        body.extend(encode_data(b"abcd abcd refs/heads/bad\n"));
        body.extend(encode_data(format!("{good_old} {good_new} refs/heads/good\n").as_bytes()));
        body.extend_from_slice(encode_flush());
        let mut reader = PktLineReader::new(&body[..]);
        let req = ReceivePackRequest::parse(&mut reader, SHA1_WIDTH, &cancel()).await.unwrap();
        assert_eq!(req.commands.len(), 1);
        assert_eq!(req.commands[0].original_name, "refs/heads/good");
    }
}
