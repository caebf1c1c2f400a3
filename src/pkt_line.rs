//! pkt-line framing codec (§4.A).
//!
//! An async `tokio::io::AsyncRead`/`AsyncWrite` codec: hex-length header,
//! flush/delimiter sentinels, 65516-byte payload cap, since the HTTP body
//! here is a stream rather than a pre-buffered `Vec<u8>`.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Maximum data payload per pkt-line record (65520 total - 4 header bytes).
pub const MAX_PAYLOAD: usize = 65516;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("malformed pkt-line header")]
    InvalidHeader,
    #[error("reserved pkt-line length {0}")]
    ReservedLength(u16),
    #[error("pkt-line payload of {0} bytes exceeds the {MAX_PAYLOAD} byte maximum")]
    PayloadTooLarge(usize),
    #[error("truncated pkt-line payload")]
    Truncated,
    #[error("io error: {0}")]
    Io(String),
    #[error("operation cancelled")]
    Cancelled,
}

/// One parsed pkt-line record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// `0000` — end of a logical section.
    Flush,
    /// `0001` — protocol v2 section delimiter.
    Delimiter,
    /// A length-prefixed payload.
    Data(Bytes),
}

async fn read_cancelable<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    cancel: &CancellationToken,
) -> Result<(), FramingError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FramingError::Cancelled),
        res = reader.read_exact(buf) => {
            res.map(|_| ()).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    FramingError::Truncated
                } else {
                    FramingError::Io(e.to_string())
                }
            })
        }
    }
}

/// Reads pkt-line records off an async byte stream.
///
/// Supports rewinding: once the command/negotiation stream has been fully
/// parsed up to its terminating flush, [`PktLineReader::into_raw`] hands back
/// the underlying reader together with any bytes this reader had already
/// buffered, so the caller can resume reading the *non* pkt-line-framed
/// packfile that follows without losing data.
pub struct PktLineReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> PktLineReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub async fn read_pkt_line(&mut self, cancel: &CancellationToken) -> Result<PktLine, FramingError> {
        let mut header = [0u8; 4];
        read_cancelable(&mut self.inner, &mut header, cancel).await?;

        let len_str = std::str::from_utf8(&header).map_err(|_| FramingError::InvalidHeader)?;
        let len = u16::from_str_radix(len_str, 16).map_err(|_| FramingError::InvalidHeader)?;

        match len {
            0 => Ok(PktLine::Flush),
            1 => Ok(PktLine::Delimiter),
            2..=3 => Err(FramingError::ReservedLength(len)),
            _ => {
                let payload_len = len as usize - 4;
                if payload_len > MAX_PAYLOAD {
                    return Err(FramingError::PayloadTooLarge(payload_len));
                }
                let mut buf = BytesMut::zeroed(payload_len);
                read_cancelable(&mut self.inner, &mut buf, cancel).await?;
                Ok(PktLine::Data(buf.freeze()))
            }
        }
    }

    /// Read pkt-lines until a flush, returning the data records seen.
    pub async fn read_until_flush(&mut self, cancel: &CancellationToken) -> Result<Vec<Bytes>, FramingError> {
        let mut out = Vec::new();
        loop {
            match self.read_pkt_line(cancel).await? {
                PktLine::Flush => return Ok(out),
                PktLine::Delimiter => continue,
                PktLine::Data(data) => out.push(data),
            }
        }
    }

    /// Release the underlying reader for raw (non pkt-line) consumption —
    /// e.g. the packfile bytes that follow a receive-pack command list.
    pub fn into_raw(self) -> R {
        self.inner
    }
}

/// Writes pkt-line records to an async byte sink.
pub struct PktLineWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> PktLineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_data(&mut self, payload: &[u8]) -> Result<(), FramingError> {
        for chunk in payload.chunks(MAX_PAYLOAD) {
            let framed = encode_data(chunk);
            self.inner
                .write_all(&framed)
                .await
                .map_err(|e| FramingError::Io(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn write_flush(&mut self) -> Result<(), FramingError> {
        self.inner.write_all(b"0000").await.map_err(|e| FramingError::Io(e.to_string()))
    }

    pub async fn write_delimiter(&mut self) -> Result<(), FramingError> {
        self.inner.write_all(b"0001").await.map_err(|e| FramingError::Io(e.to_string()))
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Frame a single payload as a pkt-line record (payload must be ≤ [`MAX_PAYLOAD`]).
pub fn encode_data(payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_PAYLOAD);
    let total_len = payload.len() + 4;
    let mut out = format!("{total_len:04x}").into_bytes();
    out.extend_from_slice(payload);
    out
}

pub fn encode_flush() -> &'static [u8] {
    b"0000"
}

pub fn encode_delimiter() -> &'static [u8] {
    b"0001"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn frame_then_parse_round_trips_for_every_length() {
        for len in [0usize, 1, 2, 63, 64, 65, MAX_PAYLOAD] {
            let payload = vec![b'x'; len];
            let framed = encode_data(&payload);
            let mut reader = PktLineReader::new(&framed[..]);
            match reader.read_pkt_line(&cancel()).await.unwrap() {
                PktLine::Data(got) => assert_eq!(got.as_ref(), payload.as_slice()),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn flush_and_delimiter_sentinels() {
        let mut reader = PktLineReader::new(&b"0000"[..]);
        assert_eq!(reader.read_pkt_line(&cancel()).await.unwrap(), PktLine::Flush);

        let mut reader = PktLineReader::new(&b"0001"[..]);
        assert_eq!(reader.read_pkt_line(&cancel()).await.unwrap(), PktLine::Delimiter);
    }

    #[tokio::test]
    async fn reserved_lengths_are_errors() {
        for bad in ["0002", "0003"] {
            let mut reader = PktLineReader::new(bad.as_bytes());
            assert!(matches!(
                reader.read_pkt_line(&cancel()).await,
                Err(FramingError::ReservedLength(_))
            ));
        }
    }

    #[tokio::test]
    async fn truncated_payload_is_an_error() {
        let mut reader = PktLineReader::new(&b"000fhello"[..]); // declares 11 bytes, has 5
        assert!(matches!(
            reader.read_pkt_line(&cancel()).await,
            Err(FramingError::Truncated)
        ));
    }

    #[tokio::test]
    async fn read_until_flush_collects_data_records() {
        let mut body = Vec::new();
        body.extend(encode_data(b"want aaaa\n"));
        body.extend(encode_data(b"want bbbb\n"));
        body.extend_from_slice(encode_flush());
        let mut reader = PktLineReader::new(&body[..]);
        let records = reader.read_until_flush(&cancel()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[0][..], b"want aaaa\n");
    }

    #[tokio::test]
    async fn into_raw_exposes_the_remaining_bytes_unframed() {
        let mut body = Vec::new();
        body.extend(encode_data(b"done\n"));
        body.extend_from_slice(encode_flush());
        body.extend_from_slice(b"PACK...not pkt-line framed...");

        let mut reader = PktLineReader::new(&body[..]);
        let records = reader.read_until_flush(&cancel()).await.unwrap();
        assert_eq!(&records[0][..], b"done\n");

        let mut raw = reader.into_raw();
        let mut rest = Vec::new();
        raw.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"PACK...not pkt-line framed...");
    }

    #[tokio::test]
    async fn writer_chunks_oversized_payloads() {
        let mut out = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut out);
            let payload = vec![b'a'; MAX_PAYLOAD + 10];
            writer.write_data(&payload).await.unwrap();
            writer.write_flush().await.unwrap();
        }
        // two records: one full MAX_PAYLOAD chunk, one 10-byte remainder, then flush
        let mut reader = PktLineReader::new(&out[..]);
        match reader.read_pkt_line(&cancel()).await.unwrap() {
            PktLine::Data(d) => assert_eq!(d.len(), MAX_PAYLOAD),
            _ => panic!(),
        }
        match reader.read_pkt_line(&cancel()).await.unwrap() {
            PktLine::Data(d) => assert_eq!(d.len(), 10),
            _ => panic!(),
        }
        assert_eq!(reader.read_pkt_line(&cancel()).await.unwrap(), PktLine::Flush);
    }
}
