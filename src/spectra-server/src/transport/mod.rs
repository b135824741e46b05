//! External interfaces: a WebSocket endpoint carrying the binary + JSON
//! surfaces, and a plain REST status probe. `main.rs` mounts both under
//! one `actix_web::App`.

pub mod rest;
pub mod websocket;
