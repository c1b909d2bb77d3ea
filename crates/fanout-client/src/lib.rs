//! # fanout-client
//!
//! Subscriber-side connection to a fanout relay channel.
//!
//! [`ClientConnection::connect`] opens the socket, handlers are attached with
//! [`ClientConnection::subscribe`], and [`ClientConnection::start`] begins
//! receiving. Events are delivered to handlers one at a time from a single
//! dispatcher task; a failing or panicking handler is logged and counted
//! without stopping delivery.
//!
//! ```no_run
//! # async fn demo() -> Result<(), fanout_client::ClientError> {
//! use fanout_client::{ClientConnection, ClientEvent};
//!
//! let conn = ClientConnection::connect("ws://127.0.0.1:8080/subscribe/room1").await?;
//! let _sub = conn.subscribe(|event: &ClientEvent| {
//!     println!("{event:?}");
//!     Ok(())
//! });
//! conn.start()?;
//! conn.finished().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod connection;
mod dispatcher;
pub mod error;
pub mod event;
pub mod handlers;

pub use connection::ClientConnection;
pub use error::{ClientError, HandlerError};
pub use event::{ClientEvent, CloseReason};
pub use handlers::{EventHandler, Subscription};
