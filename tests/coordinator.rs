//! End-to-end exercise of the coordinator against a real temporary
//! directory tree standing in for the source root, using a small in-repo
//! `Decoder` rather than an actual RAR archive. Mirrors the teacher's
//! `tests/shadow_fs/common.rs` fixture (`TempDir` plus the filesystem
//! under test) adapted to `rarvfs`'s synchronous coordinator API.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fuser::FileType;
use tempfile::TempDir;

use rarvfs::config::ConfigStore;
use rarvfs::coordinator::{RarFs, Resolved};
use rarvfs::decoder::{ArchiveHandle, Decoder, MemberInfo, Sink};
use rarvfs::error::{Error, Result};
use rarvfs::filecache::Caches;

struct FixtureHandle(String);
impl ArchiveHandle for FixtureHandle {}

type ArchiveContents = HashMap<String, Vec<u8>>;

#[derive(Default)]
struct FixtureDecoder {
    archives: Mutex<HashMap<String, (Vec<MemberInfo>, ArchiveContents)>>,
}

impl FixtureDecoder {
    fn add_archive(&self, path: &Path, members: Vec<MemberInfo>, contents: HashMap<String, Vec<u8>>) {
        self.archives.lock().unwrap().insert(path.to_string_lossy().into_owned(), (members, contents));
    }
}

impl Decoder for FixtureDecoder {
    type Handle = FixtureHandle;

    fn open(&self, archive_path: &Path, _password: Option<&str>) -> Result<Self::Handle> {
        let key = archive_path.to_string_lossy().into_owned();
        if self.archives.lock().unwrap().contains_key(&key) {
            Ok(FixtureHandle(key))
        } else {
            Err(Error::NotFound)
        }
    }

    fn list(&self, handle: &Self::Handle) -> Result<Vec<MemberInfo>> {
        let guard = self.archives.lock().unwrap();
        Ok(guard.get(&handle.0).map(|(m, _)| m.clone()).unwrap_or_default())
    }

    fn extract_range(
        &self,
        handle: &Self::Handle,
        member: &str,
        offset: u64,
        length: u64,
        dest: &mut [u8],
    ) -> Result<usize> {
        let guard = self.archives.lock().unwrap();
        let (_, contents) = guard.get(&handle.0).ok_or(Error::NotFound)?;
        let data = contents.get(member).ok_or(Error::NotFound)?;
        let start = offset as usize;
        if start >= data.len() {
            return Ok(0);
        }
        let end = (start + length as usize).min(data.len());
        dest[..end - start].copy_from_slice(&data[start..end]);
        Ok(end - start)
    }

    fn extract_stream(&self, handle: &Self::Handle, member: &str, sink: &mut dyn Sink) -> Result<()> {
        let guard = self.archives.lock().unwrap();
        let (_, contents) = guard.get(&handle.0).ok_or(Error::NotFound)?;
        let data = contents.get(member).ok_or(Error::NotFound)?;
        sink.write_chunk(data);
        Ok(())
    }
}

struct Fixture {
    tempdir: TempDir,
    fs: RarFs<FixtureDecoder>,
}

impl Fixture {
    fn new() -> Self {
        let tempdir = TempDir::new().expect("create temp dir");
        let fs = RarFs::new(
            tempdir.path().to_path_buf(),
            Caches::new(ConfigStore::empty()),
            FixtureDecoder::default(),
            5,
            10 * 1024 * 1024 * 1024,
        );
        Self { tempdir, fs }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.tempdir.path().join(name)
    }

    fn write_file(&self, name: &str, data: &[u8]) {
        std::fs::write(self.path(name), data).expect("write fixture file");
    }

    fn create_dir(&self, name: &str) {
        std::fs::create_dir(self.path(name)).expect("create fixture dir");
    }
}

fn member(name: &str, size: u64, is_dir: bool) -> MemberInfo {
    MemberInfo {
        name: name.to_owned(),
        size,
        mtime: 0,
        method: 0,
        is_dir,
        is_symlink: false,
        link_target: None,
        raw_offset: None,
        volume_index: 0,
    }
}

fn stored_member(name: &str, size: u64, raw_offset: u64) -> MemberInfo {
    MemberInfo { raw_offset: Some(raw_offset), ..member(name, size, false) }
}

#[test]
fn real_tree_merges_archive_members_alongside_plain_files() {
    let fx = Fixture::new();
    fx.write_file("readme.txt", b"hello");
    fx.create_dir("photos");
    fx.write_file("album.rar", b"stub rar bytes");
    fx.fs.decoder().add_archive(
        &fx.path("album.rar"),
        vec![member("vacation", 0, true), member("vacation/beach.jpg", 4, false), member("notes.txt", 5, false)],
        HashMap::new(),
    );

    let root = fx.fs.resolve("/").expect("resolve root");
    let mut listing = fx.fs.list_dir(&root).expect("list root");
    listing.sort_by(|a, b| a.0.cmp(&b.0));

    assert_eq!(
        listing,
        vec![
            ("album.rar".to_owned(), FileType::RegularFile),
            ("notes.txt".to_owned(), FileType::RegularFile),
            ("photos".to_owned(), FileType::Directory),
            ("readme.txt".to_owned(), FileType::RegularFile),
            ("vacation".to_owned(), FileType::Directory),
        ]
    );
}

#[test]
fn archive_members_are_readable_through_the_decoder() {
    let fx = Fixture::new();
    fx.write_file("album.rar", b"stub rar bytes");
    let archive_path = fx.path("album.rar");
    fx.fs.decoder().add_archive(
        &archive_path,
        vec![member("vacation", 0, true), member("vacation/beach.jpg", 4, false)],
        HashMap::from([("vacation/beach.jpg".to_owned(), b"\xFF\xD8\xFF\xD9".to_vec())]),
    );

    match fx.fs.resolve("/vacation/beach.jpg").expect("resolve nested member") {
        Resolved::ArchiveMember(_, entry) => {
            assert_eq!(entry.stat.size, 4);
            assert!(!entry.stat.is_dir);
        }
        _ => panic!("expected an archive member"),
    }

    let dir = fx.fs.resolve("/vacation").expect("resolve archive dir");
    let listing = fx.fs.list_dir(&dir).expect("list archive dir");
    assert_eq!(listing, vec![("beach.jpg".to_owned(), FileType::RegularFile)]);
}

#[test]
fn real_entry_wins_over_a_same_named_archive_member() {
    let fx = Fixture::new();
    fx.write_file("shared.txt", b"real wins");
    fx.write_file("album.rar", b"stub rar bytes");
    fx.fs.decoder().add_archive(
        &fx.path("album.rar"),
        vec![member("shared.txt", 3, false)],
        HashMap::from([("shared.txt".to_owned(), b"abc".to_vec())]),
    );

    match fx.fs.resolve("/shared.txt").expect("resolve shared.txt") {
        Resolved::RealFile(p) => assert_eq!(p, fx.path("shared.txt")),
        _ => panic!("a real entry must take precedence over an archive member"),
    }

    let root = fx.fs.resolve("/").expect("resolve root");
    let listing = fx.fs.list_dir(&root).expect("list root");
    assert_eq!(listing.iter().filter(|(name, _)| name == "shared.txt").count(), 1);
}

#[test]
fn raw_flagged_member_is_served_directly_from_the_volume_file() {
    let fx = Fixture::new();
    fx.write_file("album.rar", b"====payload bytes");
    fx.fs.decoder().add_archive(&fx.path("album.rar"), vec![stored_member("blob.bin", 13, 4)], HashMap::new());

    match fx.fs.resolve("/blob.bin").expect("resolve raw member") {
        Resolved::ArchiveMember(archive_path, entry) => {
            assert!(entry.flags.raw());
            let data = fx.fs.read_archive_member(&archive_path, &entry, 0, 13).expect("raw read");
            assert_eq!(data, b"payload bytes");
        }
        _ => panic!("expected an archive member"),
    }
}

#[test]
fn unknown_paths_are_rejected_in_both_real_and_archive_scopes() {
    let fx = Fixture::new();
    fx.write_file("album.rar", b"stub rar bytes");
    fx.fs.decoder().add_archive(&fx.path("album.rar"), vec![member("a.txt", 1, false)], HashMap::new());

    assert!(matches!(fx.fs.resolve("/nonexistent.txt"), Err(Error::NotFound)));
    assert!(matches!(fx.fs.resolve("/missing.txt"), Err(Error::NotFound)));
}
