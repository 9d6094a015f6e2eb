//! End-to-end tests of the file engine over memory and on-disk DHTs.

use std::sync::Arc;

use ringfs::config::Config;
use ringfs::context::FsContext;
use ringfs::crypto;
use ringfs::descriptor::{Descriptor, MAIN};
use ringfs::dht::{Dht, MemoryDht, DEFAULT_SUBKEY};
use ringfs::dir::{Dir, THIS_DIR};
use ringfs::error::DfsError;
use ringfs::file::{File, OpenMode};
use ringfs::local_store::LocalStore;
use ringfs::KeySet;

const BLOCK: usize = 1024;

fn context(dht: Arc<dyn Dht>, with_keys: bool) -> FsContext {
    let mut config = Config::default();
    config.main.uid = "uid".to_string();
    config.main.nick = "nick".to_string();
    let keys = if with_keys {
        KeySet {
            kd: Some(crypto::sha1_16(b"the description key")),
            kf: Some(crypto::sha1_16(b"the file key")),
            kff: Some(crypto::sha1_16(b"the metadata key")),
            ..KeySet::default()
        }
    } else {
        KeySet::default()
    };
    FsContext::new(dht, &config, keys)
}

async fn write_file(ctx: &FsContext, uri: &str, content: &[u8]) -> ringfs::Uri {
    let uri = ctx.parse_uri(uri).expect("parseable uri");
    let mut file = File::open(ctx, uri, OpenMode::Write).await.unwrap();
    file.write(content).await.unwrap();
    file.close().await.unwrap()
}

async fn read_file(ctx: &FsContext, uri: &str) -> Vec<u8> {
    let uri = ctx.parse_uri(uri).expect("parseable uri");
    let mut file = File::open(ctx, uri, OpenMode::Read).await.unwrap();
    let content = file.read().await.unwrap();
    file.close().await.unwrap();
    content
}

#[tokio::test]
async fn memory_dht_round_trip() {
    let dht = MemoryDht::new();
    dht.put(b"k", b"v", DEFAULT_SUBKEY).await.unwrap();
    assert_eq!(dht.get(b"k", DEFAULT_SUBKEY).await.unwrap(), Some(b"v".to_vec()));
    assert_eq!(dht.get(b"absent", DEFAULT_SUBKEY).await.unwrap(), None);
}

#[tokio::test]
async fn local_store_persists_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = LocalStore::open(dir.path()).unwrap();
        Dht::put(&store, b"id", b"payload", DEFAULT_SUBKEY).await.unwrap();
    }
    let store = LocalStore::open(dir.path()).unwrap();
    assert_eq!(
        Dht::get(&store, b"id", DEFAULT_SUBKEY).await.unwrap(),
        Some(b"payload".to_vec())
    );
}

#[tokio::test]
async fn single_block_file_round_trips_by_readable_and_static_uri() {
    for with_keys in [false, true] {
        let ctx = context(Arc::new(MemoryDht::new()), with_keys);
        let content = vec![0x41u8; 500];
        let closed = write_file(&ctx, "dfs://nick@uid/small", &content).await;

        assert_eq!(read_file(&ctx, "dfs://nick@uid/small").await, content);
        assert_eq!(read_file(&ctx, &closed.to_static()).await, content);
    }
}

#[tokio::test]
async fn file_round_trips_at_block_boundaries() {
    let ctx = context(Arc::new(MemoryDht::new()), true);
    for (i, len) in [0usize, 1, BLOCK - 1, BLOCK, BLOCK + 1, 3 * BLOCK].into_iter().enumerate() {
        let content: Vec<u8> = (0..len).map(|j| (j % 251) as u8).collect();
        let uri = format!("dfs://nick@uid/sized-{}", i);
        write_file(&ctx, &uri, &content).await;
        assert_eq!(read_file(&ctx, &uri).await, content, "length {}", len);
    }
}

#[tokio::test]
async fn incremental_writes_equal_one_write() {
    let ctx = context(Arc::new(MemoryDht::new()), true);
    // Spread over many small writes so the 4 KiB max-buffer forces
    // intermediate flushes.
    let content: Vec<u8> = (0..9000usize).map(|j| (j % 7 + 1) as u8).collect();
    let uri = ctx.parse_uri("dfs://nick@uid/streamed").unwrap();
    let mut file = File::open(&ctx, uri, OpenMode::Write).await.unwrap();
    for chunk in content.chunks(613) {
        file.write(chunk).await.unwrap();
    }
    file.close().await.unwrap();
    assert_eq!(read_file(&ctx, "dfs://nick@uid/streamed").await, content);
}

#[tokio::test]
async fn parts_and_descriptors_are_exactly_one_block() {
    let ctx = context(Arc::new(MemoryDht::new()), true);
    let content = vec![7u8; 2 * BLOCK + 100];
    write_file(&ctx, "dfs://nick@uid/sized", &content).await;

    let uri = ctx.parse_uri("dfs://nick@uid/sized").unwrap();
    let descriptor = ctx.dht.get(&uri.hd(), &uri.nick).await.unwrap().unwrap();
    assert_eq!(descriptor.len(), BLOCK);

    let mut file = File::open(&ctx, uri, OpenMode::Read).await.unwrap();
    assert_eq!(file.part_uris().len(), 3);
    for part_ref in file.part_uris().to_vec() {
        let part_uri = ctx.parse_uri(&part_ref).unwrap();
        let blob = ctx.dht.get(&part_uri.hd(), &part_uri.nick).await.unwrap().unwrap();
        assert_eq!(blob.len(), BLOCK);
    }
    assert_eq!(file.read().await.unwrap(), content);
}

#[tokio::test]
async fn thirteen_blocks_span_a_two_block_descriptor_chain() {
    // 13 parts with 12 references per descriptor block: the first block
    // links to exactly one successor holding the last reference.
    let ctx = context(Arc::new(MemoryDht::new()), false);
    let content: Vec<u8> = (0..13 * BLOCK).map(|j| (j % 239) as u8).collect();
    write_file(&ctx, "dfs://nick@uid/chained", &content).await;

    let uri = ctx.parse_uri("dfs://nick@uid/chained").unwrap();
    let mut file = File::open(&ctx, uri.clone(), OpenMode::Read).await.unwrap();
    assert_eq!(file.part_uris().len(), 13);
    assert_eq!(file.read().await.unwrap(), content);

    // Walk the raw chain: with no kff configured, descriptor blocks are
    // ciphered under the file's own locator, each with its own IV.
    let md_key = uri.hd();
    let mut top = ctx.dht.get(&uri.hd(), &uri.nick).await.unwrap().unwrap();
    crypto::CbcDecryptor::new(&md_key, &uri.hd()).apply(&mut top);
    let top = Descriptor::parse(&top).unwrap();
    assert_eq!(top.get_int(MAIN, "parts"), Some(13));
    assert_eq!(top.get_int(MAIN, "length"), Some(13 * BLOCK as u64));

    let link = top.get(MAIN, "n").expect("first block links onward");
    let next_uri = ctx.parse_uri(link).unwrap();
    let mut chained = ctx.dht.get(&next_uri.hd(), &next_uri.nick).await.unwrap().unwrap();
    crypto::CbcDecryptor::new(&md_key, &next_uri.hd()).apply(&mut chained);
    let chained = Descriptor::parse(&chained).unwrap();
    assert!(chained.get(MAIN, "n").is_none(), "chain must end after two blocks");
    assert!(chained.get("Part", "12").is_some());
    assert!(chained.get("Part", "11").is_none());
}

#[tokio::test]
async fn twelve_blocks_need_no_chain() {
    let ctx = context(Arc::new(MemoryDht::new()), false);
    let content = vec![3u8; 12 * BLOCK];
    write_file(&ctx, "dfs://nick@uid/flat", &content).await;

    let uri = ctx.parse_uri("dfs://nick@uid/flat").unwrap();
    let mut raw = ctx.dht.get(&uri.hd(), &uri.nick).await.unwrap().unwrap();
    crypto::CbcDecryptor::new(&uri.hd(), &uri.hd()).apply(&mut raw);
    let descriptor = Descriptor::parse(&raw).unwrap();
    assert_eq!(descriptor.get_int(MAIN, "parts"), Some(12));
    assert!(descriptor.get(MAIN, "n").is_none());
    assert_eq!(read_file(&ctx, "dfs://nick@uid/flat").await, content);
}

#[tokio::test]
async fn missing_reference_and_wrong_mode_errors() {
    let ctx = context(Arc::new(MemoryDht::new()), true);

    let uri = ctx.parse_uri("dfs://nick@uid/never-written").unwrap();
    match File::open(&ctx, uri, OpenMode::Read).await {
        Err(DfsError::NoReference(_)) => {}
        other => panic!("expected NoReference, got {:?}", other.map(|_| ())),
    }

    write_file(&ctx, "dfs://nick@uid/present", b"x").await;
    let uri = ctx.parse_uri("dfs://nick@uid/present").unwrap();
    let mut reader = File::open(&ctx, uri.clone(), OpenMode::Read).await.unwrap();
    assert!(matches!(reader.write(b"nope").await, Err(DfsError::BadMode(_))));
    assert!(matches!(reader.seek(0), Err(DfsError::BadMode(_))));
    assert!(matches!(reader.tell(), Err(DfsError::BadMode(_))));
    assert!(matches!(reader.truncate(0), Err(DfsError::BadMode(_))));
    reader.close().await.unwrap();
    assert!(matches!(reader.read().await, Err(DfsError::Closed)));

    let mut writer = File::open(&ctx, uri, OpenMode::Write).await.unwrap();
    assert!(matches!(writer.read().await, Err(DfsError::BadMode(_))));
    writer.close().await.unwrap();
}

#[tokio::test]
async fn verification_catches_a_corrupted_part() {
    let dht: Arc<dyn Dht> = Arc::new(MemoryDht::new());
    let mut ctx = context(dht, true);
    ctx.params.verify = true;

    let content = vec![9u8; 2 * BLOCK];
    write_file(&ctx, "dfs://nick@uid/checked", &content).await;
    assert_eq!(read_file(&ctx, "dfs://nick@uid/checked").await, content);

    // Overwrite the first part with noise of the right size.
    let uri = ctx.parse_uri("dfs://nick@uid/checked").unwrap();
    let file = File::open(&ctx, uri, OpenMode::Read).await.unwrap();
    let first = ctx.parse_uri(&file.part_uris()[0]).unwrap();
    ctx.dht.put(&first.hd(), &crypto::random_bytes(BLOCK), &first.nick).await.unwrap();

    let uri = ctx.parse_uri("dfs://nick@uid/checked").unwrap();
    let mut reader = File::open(&ctx, uri, OpenMode::Read).await.unwrap();
    assert!(matches!(reader.read().await, Err(DfsError::Integrity(_))));
}

#[tokio::test]
async fn missing_part_is_an_incomplete_read() {
    let dht = Arc::new(MemoryDht::new());
    let ctx = context(dht.clone(), false);
    write_file(&ctx, "dfs://nick@uid/holey", &vec![1u8; 2 * BLOCK]).await;

    let uri = ctx.parse_uri("dfs://nick@uid/holey").unwrap();
    let file = File::open(&ctx, uri, OpenMode::Read).await.unwrap();
    let victim = ctx.parse_uri(&file.part_uris()[1]).unwrap();
    drop(file);

    // Rebuild the store with every blob except the second part, so the
    // read finds the descriptor but comes up short on the part fetch.
    let fresh = MemoryDht::new();
    let uri = ctx.parse_uri("dfs://nick@uid/holey").unwrap();
    let top = dht.get(&uri.hd(), &uri.nick).await.unwrap().unwrap();
    fresh.put(&uri.hd(), &top, &uri.nick).await.unwrap();
    let reader = File::open(&ctx, uri.clone(), OpenMode::Read).await.unwrap();
    for part_ref in reader.part_uris() {
        let part_uri = ctx.parse_uri(part_ref).unwrap();
        if part_uri.hd() == victim.hd() {
            continue;
        }
        let blob = dht.get(&part_uri.hd(), &part_uri.nick).await.unwrap().unwrap();
        fresh.put(&part_uri.hd(), &blob, &part_uri.nick).await.unwrap();
    }
    drop(reader);

    let holey_ctx = context(Arc::new(fresh), false);
    let uri = holey_ctx.parse_uri("dfs://nick@uid/holey").unwrap();
    let mut reader = File::open(&holey_ctx, uri, OpenMode::Read).await.unwrap();
    assert!(matches!(reader.read().await, Err(DfsError::IncompleteRead(_))));
}

#[tokio::test]
async fn directory_add_rename_remove() {
    let ctx = context(Arc::new(MemoryDht::new()), true);
    let mut root = Dir::create(&ctx, "/", None, None, true).await.unwrap();

    let f1 = write_file(&ctx, "dfs://nick@uid/f1", b"file one").await;
    root.add(&f1, Some("a/")).await.unwrap();
    assert!(root.list().contains(&"a/".to_string()));

    root.rename("a/", "b/").await.unwrap();
    assert_eq!(root.list(), vec![THIS_DIR.to_string(), "b/".to_string()]);

    root.remove("b/").await.unwrap();
    assert_eq!(root.list(), vec![THIS_DIR.to_string()]);

    assert!(matches!(root.remove("b/").await, Err(DfsError::NotFound(_))));
    assert!(matches!(root.rename("ghost", "x").await, Err(DfsError::NotFound(_))));

    root.close().await.unwrap();
    assert!(matches!(root.add(&f1, Some("late")).await, Err(DfsError::Closed)));
}

#[tokio::test]
async fn directories_round_trip_through_the_dht() {
    let ctx = context(Arc::new(MemoryDht::new()), true);
    let mut root = Dir::create(&ctx, "home", None, None, true).await.unwrap();
    let root_uri = root.uri().clone();

    let f1 = write_file(&ctx, "dfs://nick@uid/notes", b"some notes").await;
    root.add(&f1, Some("notes")).await.unwrap();

    let child = Dir::create(&ctx, "docs", None, Some(&mut root), true).await.unwrap();
    let child_uri = child.uri().clone();
    root.close().await.unwrap();

    let reopened = Dir::open(&ctx, root_uri.clone(), true).await.unwrap();
    assert_eq!(reopened.name(), Some("home/"));
    assert_eq!(reopened.entry("notes"), Some(f1.to_static()).as_deref());
    assert_eq!(reopened.entry("docs/"), Some(child_uri.to_static()).as_deref());

    // The child carries its parent under the reserved name.
    let child = Dir::open(&ctx, child_uri, true).await.unwrap();
    assert_eq!(child.name(), Some("docs/"));
    assert_eq!(child.entry("../"), Some(root_uri.to_static()).as_deref());

    // The entry resolves back to readable content.
    assert_eq!(read_file(&ctx, reopened.entry("notes").unwrap()).await, b"some notes");
}

#[tokio::test]
async fn non_atomic_directories_save_on_close() {
    let dht: Arc<dyn Dht> = Arc::new(MemoryDht::new());
    let ctx = context(dht, true);
    let mut dir = Dir::create(&ctx, "lazy", None, None, false).await.unwrap();
    let dir_uri = dir.uri().clone();

    let f1 = write_file(&ctx, "dfs://nick@uid/deferred", b"d").await;
    dir.add(&f1, Some("entry")).await.unwrap();

    // Not saved yet: a second handle still sees the old listing.
    let stale = Dir::open(&ctx, dir_uri.clone(), false).await.unwrap();
    assert_eq!(stale.entry("entry"), None);

    dir.close().await.unwrap();
    let fresh = Dir::open(&ctx, dir_uri, false).await.unwrap();
    assert_eq!(fresh.entry("entry"), Some(f1.to_static()).as_deref());
}
