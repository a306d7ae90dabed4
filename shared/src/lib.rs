//! vidfetch shared library
//!
//! Everything that talks to yt-dlp, ffmpeg and the filesystem, kept out of
//! the web crate so it can be tested without an HTTP server.
pub mod errors;
pub mod fetcher;
pub mod filename;
pub mod issues;
pub mod models;
pub mod platform;
pub mod tools;
pub mod ytdlp;
