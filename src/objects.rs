//! Git object model and loose-object (de)serialization (§3).
//!
//! Split between a pure data model (`GitObject`) and a serializer for the
//! `"<type> <size>\0<content>"` loose format. Pack-format (de)serialization
//! lives in [`crate::pack_writer`] and [`crate::pack_reader`] instead of
//! here, matching §2's component split (D builds packs, E reads them).

use crate::hash::ObjectId;

/// One of the four Git object kinds (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitObject {
    Blob { content: Vec<u8> },
    Tree { entries: Vec<TreeEntry> },
    Commit {
        tree: ObjectId,
        parents: Vec<ObjectId>,
        author: String,
        committer: String,
        message: String,
    },
    Tag {
        target: ObjectId,
        target_kind: String,
        tagger: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: String,
    pub name: String,
    pub id: ObjectId,
}

impl GitObject {
    pub fn kind(&self) -> &'static str {
        match self {
            GitObject::Commit { .. } => "commit",
            GitObject::Tree { .. } => "tree",
            GitObject::Blob { .. } => "blob",
            GitObject::Tag { .. } => "tag",
        }
    }

    /// Object type byte used in the pack header (§3): 1=commit 2=tree 3=blob 4=tag.
    pub fn pack_type_byte(&self) -> u8 {
        match self {
            GitObject::Commit { .. } => 1,
            GitObject::Tree { .. } => 2,
            GitObject::Blob { .. } => 3,
            GitObject::Tag { .. } => 4,
        }
    }

    pub fn from_pack_type_byte(b: u8) -> Option<&'static str> {
        match b {
            1 => Some("commit"),
            2 => Some("tree"),
            3 => Some("blob"),
            4 => Some("tag"),
            _ => None,
        }
    }

    /// The object's hash, computed over its loose-format content.
    pub fn compute_id(&self, width: usize) -> ObjectId {
        let content = encode_content(self);
        debug_assert_eq!(width, crate::hash::SHA1_WIDTH, "only sha1 is exercised today");
        ObjectId::hash_loose_content(self.kind(), &content)
    }

    /// The objects this object directly points to (§4.D "Object closure" edges).
    pub fn direct_references(&self) -> Vec<ObjectId> {
        match self {
            GitObject::Blob { .. } => Vec::new(),
            GitObject::Tree { entries } => entries.iter().map(|e| e.id.clone()).collect(),
            GitObject::Commit { tree, parents, .. } => {
                let mut refs = vec![tree.clone()];
                refs.extend(parents.iter().cloned());
                refs
            }
            GitObject::Tag { target, .. } => vec![target.clone()],
        }
    }
}

/// Serialize just the content part — identical between loose and pack
/// formats, which is what keeps hashes consistent across storage forms.
pub fn encode_content(obj: &GitObject) -> Vec<u8> {
    match obj {
        GitObject::Blob { content } => content.clone(),
        GitObject::Tree { entries } => {
            let mut data = Vec::new();
            for entry in entries {
                data.extend_from_slice(entry.mode.as_bytes());
                data.push(b' ');
                data.extend_from_slice(entry.name.as_bytes());
                data.push(0);
                data.extend_from_slice(entry.id.as_bytes());
            }
            data
        }
        GitObject::Commit { tree, parents, author, committer, message } => {
            let mut data = Vec::new();
            data.extend_from_slice(format!("tree {}\n", tree.to_hex()).as_bytes());
            for parent in parents {
                data.extend_from_slice(format!("parent {}\n", parent.to_hex()).as_bytes());
            }
            data.extend_from_slice(format!("author {author}\n").as_bytes());
            data.extend_from_slice(format!("committer {committer}\n").as_bytes());
            data.push(b'\n');
            data.extend_from_slice(message.as_bytes());
            data
        }
        GitObject::Tag { target, target_kind, tagger, message } => {
            let mut data = Vec::new();
            data.extend_from_slice(format!("object {}\n", target.to_hex()).as_bytes());
            data.extend_from_slice(format!("type {target_kind}\n").as_bytes());
            data.extend_from_slice(format!("tagger {tagger}\n").as_bytes());
            data.push(b'\n');
            data.extend_from_slice(message.as_bytes());
            data
        }
    }
}

/// Serialize the full loose-object record: `"<type> <size>\0<content>"`.
pub fn encode_loose(obj: &GitObject) -> Vec<u8> {
    let content = encode_content(obj);
    let mut out = format!("{} {}\0", obj.kind(), content.len()).into_bytes();
    out.extend(content);
    out
}

#[derive(Debug, thiserror::Error)]
pub enum ObjectParseError {
    #[error("missing null terminator in object header")]
    MissingHeaderTerminator,
    #[error("invalid object header: {0}")]
    InvalidHeader(String),
    #[error("size mismatch: header declared {declared}, content is {actual} bytes")]
    SizeMismatch { declared: usize, actual: usize },
    #[error("unknown object type {0:?}")]
    UnknownType(String),
    #[error("malformed tree entry: {0}")]
    MalformedTree(String),
    #[error("malformed {kind} object: missing field {field}")]
    MissingField { kind: &'static str, field: &'static str },
    #[error("invalid utf-8 in object content")]
    InvalidUtf8,
}

/// Parse content given its declared kind — shared by loose-object parsing
/// and pack-object parsing so both go through identical logic.
pub fn decode_content(kind: &str, content: &[u8], hash_width: usize) -> Result<GitObject, ObjectParseError> {
    match kind {
        "blob" => Ok(GitObject::Blob { content: content.to_vec() }),
        "tree" => parse_tree(content, hash_width),
        "commit" => parse_commit(content, hash_width),
        "tag" => parse_tag(content, hash_width),
        other => Err(ObjectParseError::UnknownType(other.to_string())),
    }
}

pub fn decode_loose(data: &[u8], hash_width: usize) -> Result<GitObject, ObjectParseError> {
    let null_pos = data.iter().position(|&b| b == 0).ok_or(ObjectParseError::MissingHeaderTerminator)?;
    let header = std::str::from_utf8(&data[..null_pos]).map_err(|_| ObjectParseError::InvalidUtf8)?;
    let content = &data[null_pos + 1..];

    let (kind, size_str) = header
        .split_once(' ')
        .ok_or_else(|| ObjectParseError::InvalidHeader(header.to_string()))?;
    let declared: usize = size_str
        .parse()
        .map_err(|_| ObjectParseError::InvalidHeader(header.to_string()))?;
    if declared != content.len() {
        return Err(ObjectParseError::SizeMismatch { declared, actual: content.len() });
    }

    decode_content(kind, content, hash_width)
}

fn parse_tree(data: &[u8], hash_width: usize) -> Result<GitObject, ObjectParseError> {
    let mut entries = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let space = data[pos..]
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| ObjectParseError::MalformedTree("missing space after mode".into()))?;
        let mode = std::str::from_utf8(&data[pos..pos + space])
            .map_err(|_| ObjectParseError::InvalidUtf8)?
            .to_string();
        pos += space + 1;

        let nul = data[pos..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ObjectParseError::MalformedTree("missing null after name".into()))?;
        let name = std::str::from_utf8(&data[pos..pos + nul])
            .map_err(|_| ObjectParseError::InvalidUtf8)?
            .to_string();
        pos += nul + 1;

        if pos + hash_width > data.len() {
            return Err(ObjectParseError::MalformedTree("truncated hash".into()));
        }
        let id = ObjectId::from_bytes(data[pos..pos + hash_width].to_vec());
        pos += hash_width;

        entries.push(TreeEntry { mode, name, id });
    }
    Ok(GitObject::Tree { entries })
}

fn extract_field<'a>(lines: &[&'a str], field: &str) -> Option<&'a str> {
    let prefix = format!("{field} ");
    lines.iter().find_map(|line| line.strip_prefix(prefix.as_str()))
}

fn split_header_and_message(content: &[u8]) -> Result<(Vec<&str>, String), ObjectParseError> {
    let text = std::str::from_utf8(content).map_err(|_| ObjectParseError::InvalidUtf8)?;
    if let Some(pos) = text.find("\n\n") {
        let header_lines: Vec<&str> = text[..pos].lines().collect();
        let message = text[pos + 2..].to_string();
        Ok((header_lines, message))
    } else {
        Ok((text.lines().collect(), String::new()))
    }
}

fn parse_commit(content: &[u8], hash_width: usize) -> Result<GitObject, ObjectParseError> {
    let (lines, message) = split_header_and_message(content)?;

    let tree_hex = extract_field(&lines, "tree")
        .ok_or(ObjectParseError::MissingField { kind: "commit", field: "tree" })?;
    let tree = ObjectId::from_hex(tree_hex, hash_width)
        .ok_or_else(|| ObjectParseError::InvalidHeader(format!("bad tree hash {tree_hex}")))?;

    let parents = lines
        .iter()
        .filter_map(|l| l.strip_prefix("parent "))
        .map(|hex| {
            ObjectId::from_hex(hex, hash_width).ok_or_else(|| ObjectParseError::InvalidHeader(format!("bad parent hash {hex}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let author = extract_field(&lines, "author")
        .ok_or(ObjectParseError::MissingField { kind: "commit", field: "author" })?
        .to_string();
    let committer = extract_field(&lines, "committer")
        .ok_or(ObjectParseError::MissingField { kind: "commit", field: "committer" })?
        .to_string();

    Ok(GitObject::Commit { tree, parents, author, committer, message })
}

fn parse_tag(content: &[u8], hash_width: usize) -> Result<GitObject, ObjectParseError> {
    let (lines, message) = split_header_and_message(content)?;

    let target_hex = extract_field(&lines, "object")
        .ok_or(ObjectParseError::MissingField { kind: "tag", field: "object" })?;
    let target = ObjectId::from_hex(target_hex, hash_width)
        .ok_or_else(|| ObjectParseError::InvalidHeader(format!("bad object hash {target_hex}")))?;
    let target_kind = extract_field(&lines, "type")
        .ok_or(ObjectParseError::MissingField { kind: "tag", field: "type" })?
        .to_string();
    let tagger = extract_field(&lines, "tagger")
        .ok_or(ObjectParseError::MissingField { kind: "tag", field: "tagger" })?
        .to_string();

    Ok(GitObject::Tag { target, target_kind, tagger, message })
}
