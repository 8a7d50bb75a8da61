//! Shared harness for the end-to-end suites: a spawned `parleyd` and a JSON
//! WebSocket client.

pub mod client;
pub mod server;

#[allow(unused_imports)]
pub use client::TestClient;
#[allow(unused_imports)]
pub use server::TestServer;
