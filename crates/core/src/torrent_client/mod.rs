//! Torrent client abstraction.
//!
//! The engine reads torrents through [`TorrentSource`] and writes changes
//! through [`ActionSink`]; qBittorrent is the bundled backend.

mod qbittorrent;
mod types;

pub use qbittorrent::QBittorrentClient;
pub use types::*;
