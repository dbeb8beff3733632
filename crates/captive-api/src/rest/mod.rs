// REST command bridge
//
// Console commands over `POST /rest/<path>` plus the separate bulk
// file channel used for portal templates.

pub mod client;
pub mod files;

pub use client::RestClient;
pub use files::FileChannel;
