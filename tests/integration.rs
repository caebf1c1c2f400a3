//! End-to-end push-then-clone round trip (§8 "Round-trip laws: Push-then-clone")
//! and the empty-repo discovery scenario from §8's literal end-to-end list,
//! exercised against `MemoryRepository` by driving the handlers directly
//! rather than through a real HTTP server.

use std::path::PathBuf;

use git_smart_http::advertisement::build_advertisement;
use git_smart_http::hash::ObjectId;
use git_smart_http::objects::GitObject;
use git_smart_http::pkt_line::{encode_data, encode_flush};
use git_smart_http::receive_pack::handle_receive_pack;
use git_smart_http::repository::memory::MemoryRepository;
use git_smart_http::repository::RepositoryPort;
use git_smart_http::request::Service;
use git_smart_http::upload_pack::handle_upload_pack;
use tokio_util::sync::CancellationToken;

fn cancel() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn empty_repo_advertisement_is_a_single_capabilities_record() {
    let repo = MemoryRepository::new(PathBuf::from("/tmp/empty.git"));
    let body = build_advertisement(&repo, Service::UploadPack, "git-smart-http/0.1.0", &cancel())
        .await
        .unwrap();

    // HEAD's default symref (refs/heads/main) is unresolved in a brand new
    // repo, but §4.D step 2 still requires advertising the symref capability
    // even though the HEAD ref entry itself is omitted.
    let zero_hash = "0".repeat(40);
    let expected_record =
        format!("{zero_hash} capabilities^{{}}\0symref=HEAD:refs/heads/main agent=git-smart-http/0.1.0\n");
    let expected = [
        encode_data(b"# service=git-upload-pack\n"),
        encode_flush().to_vec(),
        encode_data(expected_record.as_bytes()),
        encode_flush().to_vec(),
    ]
    .concat();

    assert_eq!(body, expected);
}

#[tokio::test]
async fn push_then_clone_round_trip() {
    let repo = MemoryRepository::new(PathBuf::from("/tmp/roundtrip.git"));

    // Build a small object graph entirely client-side: blob -> tree -> commit.
    let blob = GitObject::Blob { content: b"hello from the pushed commit".to_vec() };
    let tree = GitObject::Tree {
        entries: vec![git_smart_http::objects::TreeEntry {
            mode: "100644".into(),
            name: "hello.txt".into(),
            id: blob.compute_id(git_smart_http::hash::SHA1_WIDTH),
        }],
    };
    let commit = GitObject::Commit {
        tree: tree.compute_id(git_smart_http::hash::SHA1_WIDTH),
        parents: vec![],
        author: "A <a@example.com> 0 +0000".into(),
        committer: "A <a@example.com> 0 +0000".into(),
        message: "initial commit\n".into(),
    };
    let commit_id = commit.compute_id(git_smart_http::hash::SHA1_WIDTH);

    let pack = git_smart_http::pack_writer::write_pack(&[blob, tree, commit]);

    // Push: create refs/heads/main -> commit_id.
    let zero = "0".repeat(40);
    let mut push_body = Vec::new();
    push_body.extend(encode_data(
        format!("{zero} {} refs/heads/main\0report-status delete-refs\n", commit_id.to_hex()).as_bytes(),
    ));
    push_body.extend_from_slice(encode_flush());
    push_body.extend(pack);

    let push_outcome = handle_receive_pack(&repo, &push_body[..], &cancel()).await.unwrap();
    let push_response = String::from_utf8(push_outcome.response_body).unwrap();
    assert!(push_response.contains("unpack ok"));
    assert!(push_response.contains("ok refs/heads/main"));

    let refs = repo.get_references(&cancel()).await.unwrap();
    assert_eq!(refs.get("refs/heads/main"), Some(&commit_id));

    // Clone: advertise refs/heads/main, then want <commit_id> / done.
    let advertisement = build_advertisement(&repo, Service::UploadPack, "agent/1", &cancel()).await.unwrap();
    let advertisement_text = String::from_utf8_lossy(&advertisement).to_string();
    assert!(advertisement_text.contains(&format!("{} refs/heads/main", commit_id.to_hex())));

    let mut fetch_body = Vec::new();
    fetch_body.extend(encode_data(format!("want {}\n", commit_id.to_hex()).as_bytes()));
    fetch_body.extend(encode_data(b"done\n"));

    let fetch_response = handle_upload_pack(&repo, &fetch_body[..], &cancel()).await.unwrap();
    let pack_start = fetch_response.windows(4).position(|w| w == b"PACK").unwrap();
    let object_count = u32::from_be_bytes(fetch_response[pack_start + 8..pack_start + 12].try_into().unwrap());
    assert_eq!(object_count, 3, "closure of the pushed commit must contain exactly blob+tree+commit");

    let hash_width = git_smart_http::hash::SHA1_WIDTH;
    let trailer = &fetch_response[fetch_response.len() - hash_width..];
    let computed = ObjectId::hash_bytes(&fetch_response[pack_start..fetch_response.len() - hash_width]);
    assert_eq!(trailer, computed.as_bytes());
}

#[tokio::test]
async fn concurrent_pushes_to_the_same_ref_yield_exactly_one_ok() {
    let repo = std::sync::Arc::new(MemoryRepository::new(PathBuf::from("/tmp/race.git")));
    let base = ObjectId::hash_loose_content("commit", b"base");
    repo.force_set_ref("refs/heads/main", base.clone());

    let make_push = |new_byte: u8| {
        let zero_base = base.clone();
        let new_id = ObjectId::from_bytes(vec![new_byte; git_smart_http::hash::SHA1_WIDTH]);
        let mut body = Vec::new();
        body.extend(encode_data(
            format!("{} {} refs/heads/main\0report-status\n", zero_base.to_hex(), new_id.to_hex()).as_bytes(),
        ));
        body.extend_from_slice(encode_flush());
        body
    };

    let repo_a = repo.clone();
    let body_a = make_push(0xAA);
    let push_a = tokio::spawn(async move { handle_receive_pack(repo_a.as_ref(), &body_a[..], &cancel()).await });

    let repo_b = repo.clone();
    let body_b = make_push(0xBB);
    let push_b = tokio::spawn(async move { handle_receive_pack(repo_b.as_ref(), &body_b[..], &cancel()).await });

    let (result_a, result_b) = tokio::join!(push_a, push_b);
    let text_a = String::from_utf8(result_a.unwrap().unwrap().response_body).unwrap();
    let text_b = String::from_utf8(result_b.unwrap().unwrap().response_body).unwrap();

    let a_ok = text_a.contains("ok refs/heads/main");
    let b_ok = text_b.contains("ok refs/heads/main");
    assert!(a_ok ^ b_ok, "exactly one of the two concurrent pushes must succeed");
}
