//! Resumable media uploads and realtime gallery fan-out for live events.
//!
//! The client half ([`upload`], [`realtime`], [`gallery`]) gets photos from a
//! guest's device to the server and keeps every open gallery in sync. The
//! server half ([`server`], [`handlers`], [`ws`]) is the counterpart that
//! stores uploads and broadcasts events into per-event rooms.

pub mod config;
pub mod error;
pub mod gallery;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod protocol;
pub mod realtime;
pub mod server;
pub mod state;
pub mod upload;
pub mod utils;
pub mod ws;

pub use error::{RealtimeError, UploadError, UploadErrorKind};
