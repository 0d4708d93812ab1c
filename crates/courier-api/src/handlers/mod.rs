//! HTTP and WebSocket handlers

pub mod health;
pub mod history;
pub mod publish;
pub mod websocket;
