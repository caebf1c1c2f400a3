//! Packfile writer (§4.D "Pack writer"): header, per-object variable-length
//! type/size header, zlib-deflated payload, trailing hash.
//!
//! Compression goes through `flate2`. The trailing hash is produced by
//! [`crate::hash::RunningHash`] streamed over every byte written instead of a
//! second pass over the whole buffer.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

use crate::hash::RunningHash;
use crate::objects::{encode_content, GitObject};

/// Serialize the closure into a complete `PACK` byte stream with trailer.
/// Objects are written in the order given (§4.D: "any deterministic order").
pub fn write_pack(objects: &[GitObject]) -> Vec<u8> {
    let mut hasher = RunningHash::new();
    let mut out = Vec::new();

    let mut header = Vec::with_capacity(12);
    header.extend_from_slice(b"PACK");
    header.extend_from_slice(&2u32.to_be_bytes());
    header.extend_from_slice(&(objects.len() as u32).to_be_bytes());
    hasher.update(&header);
    out.extend_from_slice(&header);

    for object in objects {
        let content = encode_content(object);

        let mut header_bytes = Vec::new();
        encode_object_header(&mut header_bytes, object.pack_type_byte(), content.len());
        hasher.update(&header_bytes);
        out.extend_from_slice(&header_bytes);

        let compressed = deflate(&content);
        hasher.update(&compressed);
        out.extend_from_slice(&compressed);
    }

    let trailer = hasher.finalize();
    out.extend_from_slice(trailer.as_bytes());
    out
}

/// Pack object type+size header: bit 7 = continuation, bits 6..4 = type
/// (first byte only), bits 3..0 = low nibble of size; subsequent bytes carry
/// 7-bit size groups (§4.D step 2a).
pub fn encode_object_header(out: &mut Vec<u8>, obj_type: u8, size: usize) {
    let mut remaining = size;
    let mut first = (obj_type << 4) | (remaining as u8 & 0x0F);
    remaining >>= 4;
    if remaining > 0 {
        first |= 0x80;
    }
    out.push(first);

    while remaining > 0 {
        let mut byte = remaining as u8 & 0x7F;
        remaining >>= 7;
        if remaining > 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
}

fn deflate(content: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).expect("writing to an in-memory encoder cannot fail");
    encoder.finish().expect("finishing an in-memory encoder cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ObjectId;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    #[test]
    fn header_round_trips_through_variable_length_sizes() {
        for size in [0usize, 1, 15, 16, 127, 128, 2047, 2048, 1 << 20] {
            let mut bytes = Vec::new();
            encode_object_header(&mut bytes, 3, size);

            let first = bytes[0];
            let mut decoded = (first & 0x0F) as usize;
            let mut shift = 4;
            let mut idx = 1;
            let mut cont = first & 0x80 != 0;
            while cont {
                let b = bytes[idx];
                decoded |= ((b & 0x7F) as usize) << shift;
                shift += 7;
                cont = b & 0x80 != 0;
                idx += 1;
            }
            assert_eq!(decoded, size, "round trip failed for size {size}");
            assert_eq!(idx, bytes.len());
        }
    }

    #[test]
    fn pack_has_valid_header_and_trailer() {
        let objects = vec![GitObject::Blob { content: b"hi".to_vec() }];
        let pack = write_pack(&objects);

        assert_eq!(&pack[0..4], b"PACK");
        assert_eq!(u32::from_be_bytes(pack[4..8].try_into().unwrap()), 2);
        assert_eq!(u32::from_be_bytes(pack[8..12].try_into().unwrap()), 1);

        let trailer = &pack[pack.len() - 20..];
        let expected = ObjectId::hash_bytes(&pack[..pack.len() - 20]);
        assert_eq!(trailer, expected.as_bytes());
    }

    #[test]
    fn object_payload_inflates_back_to_its_content() {
        let content = b"the quick brown fox".to_vec();
        let objects = vec![GitObject::Blob { content: content.clone() }];
        let pack = write_pack(&objects);

        // header(12) + object-header(1, size 20 fits in one byte: 0x30 | low nibble... actually size 20 needs 2 bytes)
        let mut header_bytes = Vec::new();
        encode_object_header(&mut header_bytes, 3, content.len());
        let payload_start = 12 + header_bytes.len();
        let payload_end = pack.len() - 20;
        let mut decoder = ZlibDecoder::new(&pack[payload_start..payload_end]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, content);
    }
}
