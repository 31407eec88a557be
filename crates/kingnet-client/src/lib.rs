//! Single-connection TCP client for KingNet
//!
//! This crate connects to one server, continuously reads whatever the server
//! sends, and hands every received chunk to a consumer. It performs no
//! framing: chunks are delivered exactly as the socket returns them.
//!
//! # Components
//!
//! - **Connection**: owns the stream, the receive loop and the send path
//! - **ConnectionHandler**: consumer notified of chunks and of the final
//!   disconnect
//! - **ChannelHandler / FnHandler**: ready-made consumers
//!
//! # Example
//!
//! ```no_run
//! use kingnet_client::{Connection, DisconnectReason, FnHandler};
//! use kingnet_core::ConnectionConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handler = FnHandler::new(
//!     |payload: bytes::Bytes| println!("received {:?}", payload),
//!     |reason: DisconnectReason| println!("disconnected: {}", reason),
//! );
//!
//! let connection = Connection::new(ConnectionConfig::default(), handler);
//! connection.connect("127.0.0.1", 7171).await?;
//! connection.send(vec![0x01u8, 0x02, 0x03]).await?;
//!
//! connection.close().await;
//! # Ok(())
//! # }
//! ```

mod connection;
mod error;
mod handler;
mod receive;
mod state;

pub use connection::{Connection, ConnectionInfo};
pub use error::ConnectionError;
pub use handler::{ChannelHandler, ConnectionEvent, ConnectionHandler, DisconnectReason, FnHandler};
pub use state::ConnectionState;
