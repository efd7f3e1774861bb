//! QUIC transport layer for node service messages.
//!
//! This module provides [`client::NodeClient`] and [`server::NodeServer`]
//! that communicate [`NodeMessage`](crate::message::NodeMessage) values over
//! QUIC bi-directional streams using `quinn`.

pub mod client;
pub mod server;
