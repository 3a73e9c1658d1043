//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `http` - HTTP API (scan, resolve, SSE event stream)
//! - `mqtt_egress` - MQTT publisher for fleet-wide egress events
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `audit` - Validation audit log (JSONL format)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod audit;
pub mod egress_channel;
pub mod http;
pub mod mqtt_egress;
pub mod prometheus;

// Re-export commonly used types
pub use audit::AuditLog;
pub use egress_channel::{
    create_egress_channel, EgressMessage, EgressSender, MetricsPayload, SubscriberPayload,
    ValidationPayload,
};
pub use http::{start_api_server, ApiContext};
pub use mqtt_egress::MqttPublisher;
