// Shared components
pub mod config;
pub mod error;
pub mod event;
pub mod metrics;

// Hub core
pub mod broadcast;
pub mod ingress;
pub mod registry;
pub mod websocket;

// Application layer
pub mod api;
pub mod server;

// Client-side adapters
pub mod producer;
pub mod subscriber;

// Supporting modules
pub mod shutdown;
pub mod tasks;
pub mod telemetry;
