//! Per-socket plumbing shared by publishers and subscribers.
//!
//! Every accepted socket is split in two: a writer task draining a bounded
//! queue (see [`writer`]) and an inbound frame stream consumed by whichever
//! loop owns the socket (see [`frames`]). The [`connection::SocketHandle`]
//! is the only thing other components hold.

pub mod connection;
pub mod frames;
pub mod writer;

use std::sync::Arc;

use axum::extract::ws::WebSocket;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use self::connection::{SocketHandle, SocketOptions};
use self::frames::Frames;

/// Split an upgraded socket, spawn its writer and return the handle plus the
/// inbound text frames.
///
/// `close` should be a child of the server's shutdown token.
pub fn open_socket(
    socket: WebSocket,
    close: CancellationToken,
    options: &SocketOptions,
) -> (Arc<SocketHandle>, Frames) {
    let (tx, rx) = mpsc::channel(options.queue_capacity);
    let handle = Arc::new(SocketHandle::new(tx, close));
    let (sink, stream) = socket.split();

    drop(tokio::spawn(writer::run_writer(
        sink,
        rx,
        Arc::clone(&handle),
        options.clone(),
    )));

    let frames = frames::inbound_frames(stream, Arc::clone(&handle));
    (handle, frames)
}
