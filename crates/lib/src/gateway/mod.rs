//! Gateway: the HTTP surface that receives UAZAPI webhooks.
//!
//! Single port: `GET /` health JSON, `POST /webhook/uazapi` for inbound
//! messages. There is no signature verification; the webhook URL itself is
//! the access control.

mod server;

pub use server::{app, run_gateway, GatewayState};
