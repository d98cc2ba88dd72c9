//! rarvfs: a read-only FUSE filesystem exposing the logical contents of
//! RAR archives as ordinary files and directories under a mount point.
//!
//! The crate is organized the way the spec's component design lays it
//! out: [`dirlist`], [`filecache`], [`config`], and [`recursion`] are the
//! four core subsystems; [`coordinator`] glues them to the `fuser`
//! callback surface; [`decoder`] is the external collaborator boundary;
//! [`error`] is the crate-wide error type; [`cli`] is the binary's
//! argument and sidecar-config surface.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod dirlist;
pub mod error;
pub mod filecache;
pub mod recursion;
