//! HTTP and WebSocket surface of the inference gateway.

pub mod app;
