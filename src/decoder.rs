//! The RAR decoder: an external collaborator (spec.md §1, §6). This
//! module only defines the trait boundary the coordinator consumes, plus
//! a real implementation backed by the `unrar` crate (feature
//! `unrar-backend`) and a deterministic in-memory mock used by the
//! coordinator's own tests.

use std::path::Path;

use crate::error::Result;
use crate::recursion::SinkOutcome;

/// Compression method, flags, and placement of one archive member, as
/// reported by `Decoder::list` (spec.md §6).
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub name: String,
    pub size: u64,
    pub mtime: i64,
    pub method: u16,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub link_target: Option<String>,
    /// `Some` only when the member is stored (uncompressed) and can be
    /// served via raw byte-range I/O on the volume file.
    pub raw_offset: Option<u64>,
    pub volume_index: u16,
}

/// Opaque handle to an opened archive.
pub trait ArchiveHandle: Send {}

/// Sink passed to [`Decoder::extract_stream`]; implemented by
/// [`crate::recursion::ExtractBuffer`] and by any consumer that wants to
/// stream member bytes directly to a FUSE reply.
pub trait Sink {
    fn write_chunk(&mut self, chunk: &[u8]) -> SinkOutcome;
}

impl Sink for crate::recursion::ExtractBuffer {
    fn write_chunk(&mut self, chunk: &[u8]) -> SinkOutcome {
        crate::recursion::ExtractBuffer::write_chunk(self, chunk)
    }
}

/// The external RAR decoding collaborator (spec.md §6). Not implemented
/// by this crate's core; the core only depends on this trait.
pub trait Decoder: Send + Sync {
    type Handle: ArchiveHandle;

    /// Opens `archive_path` (the first volume), optionally with a
    /// password.
    fn open(&self, archive_path: &Path, password: Option<&str>) -> Result<Self::Handle>;

    /// Lists every member of the archive.
    fn list(&self, handle: &Self::Handle) -> Result<Vec<MemberInfo>>;

    /// Extracts `[offset, offset+length)` of `member` into `dest`,
    /// returning the number of bytes written.
    fn extract_range(
        &self,
        handle: &Self::Handle,
        member: &str,
        offset: u64,
        length: u64,
        dest: &mut [u8],
    ) -> Result<usize>;

    /// Streams `member`'s decompressed bytes through `sink` one chunk at
    /// a time, stopping early if the sink returns `SinkOutcome::Abort`.
    fn extract_stream(&self, handle: &Self::Handle, member: &str, sink: &mut dyn Sink) -> Result<()>;
}

#[cfg(feature = "unrar-backend")]
pub mod unrar_backend {
    //! `Decoder` implementation backed by the real `unrar` crate, which
    //! binds Alexander Roshal's UnRAR library — the same decoder the
    //! original `rar2fs` links against.

    use super::*;
    use crate::error::Error;
    use unrar::Archive;

    pub struct UnrarHandle {
        archive_path: std::path::PathBuf,
        password: Option<String>,
    }

    impl ArchiveHandle for UnrarHandle {}

    /// Thin [`Decoder`] adapter over `unrar::Archive`. Each call reopens
    /// the archive file; `unrar`'s typestate `OpenArchive` cursor is
    /// consumed as it's read, so `Handle` only remembers how to reopen it.
    pub struct UnrarDecoder;

    fn archive_of(handle: &UnrarHandle) -> Archive<'_> {
        match &handle.password {
            Some(pw) => Archive::with_password(&handle.archive_path, pw),
            None => Archive::new(&handle.archive_path),
        }
    }

    impl Decoder for UnrarDecoder {
        type Handle = UnrarHandle;

        fn open(&self, archive_path: &Path, password: Option<&str>) -> Result<Self::Handle> {
            let handle = UnrarHandle {
                archive_path: archive_path.to_path_buf(),
                password: password.map(str::to_owned),
            };
            // validate the archive opens before handing back a handle.
            archive_of(&handle).open_for_listing().map_err(|_| Error::Corrupt)?;
            Ok(handle)
        }

        fn list(&self, handle: &Self::Handle) -> Result<Vec<MemberInfo>> {
            let archive = archive_of(handle).open_for_listing().map_err(|_| Error::Corrupt)?;
            let mut out = Vec::new();
            for entry in archive {
                let header = entry.map_err(|_| Error::Corrupt)?;
                out.push(MemberInfo {
                    name: header.filename.to_string_lossy().into_owned(),
                    size: header.unpacked_size,
                    mtime: 0,
                    method: header.method as u16,
                    is_dir: header.is_directory(),
                    is_symlink: false,
                    link_target: None,
                    raw_offset: None,
                    volume_index: 0,
                });
            }
            Ok(out)
        }

        fn extract_range(
            &self,
            handle: &Self::Handle,
            member: &str,
            offset: u64,
            length: u64,
            dest: &mut [u8],
        ) -> Result<usize> {
            let mut buf = ExtractVec(Vec::new());
            self.extract_stream(handle, member, &mut buf)?;
            let data = buf.0;
            let start = offset as usize;
            if start >= data.len() {
                return Ok(0);
            }
            let end = (start + length as usize).min(data.len());
            let n = end - start;
            dest[..n].copy_from_slice(&data[start..end]);
            Ok(n)
        }

        fn extract_stream(&self, handle: &Self::Handle, member: &str, sink: &mut dyn Sink) -> Result<()> {
            let mut cursor =
                archive_of(handle).open_for_processing().map_err(|_| Error::Corrupt)?;
            loop {
                let Some(next) = cursor.read_header().map_err(|_| Error::Corrupt)? else {
                    return Err(Error::NotFound);
                };
                if next.entry().filename.to_string_lossy() == member {
                    let (data, _) = next.read().map_err(|_| Error::Encrypted)?;
                    sink.write_chunk(&data);
                    return Ok(());
                }
                cursor = next.skip().map_err(|_| Error::Corrupt)?;
            }
        }
    }

    struct ExtractVec(Vec<u8>);
    impl Sink for ExtractVec {
        fn write_chunk(&mut self, chunk: &[u8]) -> SinkOutcome {
            self.0.extend_from_slice(chunk);
            SinkOutcome::Continue
        }
    }
}

/// Deterministic in-memory decoder used by the coordinator's own tests,
/// standing in for the external collaborator.
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    pub struct MockHandle(pub String);
    impl ArchiveHandle for MockHandle {}

    type ArchiveContents = HashMap<String, Vec<u8>>;

    #[derive(Default)]
    pub struct MockDecoder {
        pub archives: Mutex<HashMap<String, (Vec<MemberInfo>, ArchiveContents)>>,
    }

    impl MockDecoder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_archive(
            &self,
            path: &str,
            members: Vec<MemberInfo>,
            contents: HashMap<String, Vec<u8>>,
        ) {
            self.archives.lock().unwrap().insert(path.to_owned(), (members, contents));
        }
    }

    impl Decoder for MockDecoder {
        type Handle = MockHandle;

        fn open(&self, archive_path: &Path, _password: Option<&str>) -> Result<Self::Handle> {
            let key = archive_path.to_string_lossy().into_owned();
            if self.archives.lock().unwrap().contains_key(&key) {
                Ok(MockHandle(key))
            } else {
                Err(crate::error::Error::NotFound)
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
            let (_, contents) = guard.get(&handle.0).ok_or(crate::error::Error::NotFound)?;
            let data = contents.get(member).ok_or(crate::error::Error::NotFound)?;
            let start = offset as usize;
            if start >= data.len() {
                return Ok(0);
            }
            let end = (start + length as usize).min(data.len());
            let n = end - start;
            dest[..n].copy_from_slice(&data[start..end]);
            Ok(n)
        }

        fn extract_stream(&self, handle: &Self::Handle, member: &str, sink: &mut dyn Sink) -> Result<()> {
            let guard = self.archives.lock().unwrap();
            let (_, contents) = guard.get(&handle.0).ok_or(crate::error::Error::NotFound)?;
            let data = contents.get(member).ok_or(crate::error::Error::NotFound)?;
            sink.write_chunk(data);
            Ok(())
        }
    }
}
