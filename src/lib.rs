//! # beanwire
//!
//! Remote management-bean protocol engine: invoke operations on a local
//! bean registry from across a socket, synchronously or with callbacks,
//! with server-push notification delivery.
//!
//! ## Architecture
//!
//! - **Op catalog** ([`ops`]): the closed set of management operations,
//!   one stable byte code each.
//! - **Wire model** ([`wire`]): the closed value enum every argument and
//!   result is expressed in, including open-type composite/tabular data.
//! - **Codec** ([`codec`]): tag-byte-per-kind value serialization with
//!   per-connection bean-name compression and a registered extension range.
//! - **Framing** ([`protocol`]): request/reply layouts plus checkpointed
//!   decoders that resume cleanly across arbitrarily fragmented reads.
//! - **Connection plumbing**: a dedicated writer task ([`writer`]) fed by a
//!   serialization stage that keeps name-table interning in wire order
//!   ([`outbound`]), the request/response correlation engine
//!   ([`correlate`]) and the notification bridge ([`notify`]).
//! - **Endpoints**: [`client::BeanClient`] and [`server::BeanServer`],
//!   addressed by `beanwire://` / `beanwire+async://` URLs ([`connector`]).
//!
//! ## Example
//!
//! ```ignore
//! use beanwire::{BeanClient, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = BeanClient::connect("beanwire://127.0.0.1:9875", ClientConfig::default()).await?;
//!     let count = client.get_bean_count().await?;
//!     println!("{count} beans registered");
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod connector;
pub mod correlate;
pub mod error;
pub mod notify;
pub mod ops;
pub mod outbound;
pub mod protocol;
pub mod registry;
pub mod wire;
pub mod writer;

mod client;
mod server;

pub use client::BeanClient;
pub use connector::{CallMode, ClientConfig, ConnectorAddr};
pub use error::{BeanwireError, Result};
pub use ops::OpCode;
pub use registry::{BeanRegistry, EventSink, Subscription};
pub use server::BeanServer;
pub use wire::{Attribute, BeanInfo, BeanName, RemoteFailure, WireValue};
