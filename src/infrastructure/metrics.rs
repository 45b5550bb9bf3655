//! Aggregate process metrics.
//!
//! Counters and gauges only. Nothing here ever carries client identifiers,
//! remote addresses, room ids, or payload bytes; the `/metrics` endpoint
//! exposes exactly what this module registers.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub active_connections: IntGauge,
    pub active_rooms: IntGauge,
    pub connections_total: IntCounter,
    pub admissions_rejected_total: IntCounter,
    pub frames_in_total: IntCounter,
    pub frames_relayed_total: IntCounter,
    pub rooms_created_total: IntCounter,
    pub joins_total: IntCounter,
    pub keepalive_terminations_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let active_connections =
            IntGauge::new("relay_active_connections", "Currently open WebSocket connections")
                .expect("valid metric");
        let active_rooms = IntGauge::new(
            "relay_active_rooms",
            "Rooms with at least one local connection",
        )
        .expect("valid metric");
        let connections_total =
            IntCounter::new("relay_connections_total", "Admitted WebSocket connections")
                .expect("valid metric");
        let admissions_rejected_total = IntCounter::new(
            "relay_admissions_rejected_total",
            "Sockets rejected by the admission meters",
        )
        .expect("valid metric");
        let frames_in_total =
            IntCounter::new("relay_frames_in_total", "Inbound frames accepted for processing")
                .expect("valid metric");
        let frames_relayed_total = IntCounter::new(
            "relay_frames_relayed_total",
            "Application/media frames fanned out",
        )
        .expect("valid metric");
        let rooms_created_total =
            IntCounter::new("relay_rooms_created_total", "Rooms created").expect("valid metric");
        let joins_total =
            IntCounter::new("relay_joins_total", "Successful room joins").expect("valid metric");
        let keepalive_terminations_total = IntCounter::new(
            "relay_keepalive_terminations_total",
            "Connections terminated by the keep-alive sweep",
        )
        .expect("valid metric");

        registry
            .register(Box::new(active_connections.clone()))
            .expect("metric registers once");
        registry
            .register(Box::new(active_rooms.clone()))
            .expect("metric registers once");
        registry
            .register(Box::new(connections_total.clone()))
            .expect("metric registers once");
        registry
            .register(Box::new(admissions_rejected_total.clone()))
            .expect("metric registers once");
        registry
            .register(Box::new(frames_in_total.clone()))
            .expect("metric registers once");
        registry
            .register(Box::new(frames_relayed_total.clone()))
            .expect("metric registers once");
        registry
            .register(Box::new(rooms_created_total.clone()))
            .expect("metric registers once");
        registry
            .register(Box::new(joins_total.clone()))
            .expect("metric registers once");
        registry
            .register(Box::new(keepalive_terminations_total.clone()))
            .expect("metric registers once");

        Self {
            registry,
            active_connections,
            active_rooms,
            connections_total,
            admissions_rejected_total,
            frames_in_total,
            frames_relayed_total,
            rooms_created_total,
            joins_total,
            keepalive_terminations_total,
        }
    }

    /// Prometheus text exposition format.
    pub fn render_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buf)
            .expect("metrics encode");
        String::from_utf8(buf).expect("metrics are utf-8")
    }

    /// JSON rendering of the same values.
    pub fn render_json(&self) -> serde_json::Value {
        serde_json::json!({
            "active_connections": self.active_connections.get(),
            "active_rooms": self.active_rooms.get(),
            "connections_total": self.connections_total.get(),
            "admissions_rejected_total": self.admissions_rejected_total.get(),
            "frames_in_total": self.frames_in_total.get(),
            "frames_relayed_total": self.frames_relayed_total.get(),
            "rooms_created_total": self.rooms_created_total.get(),
            "joins_total": self.joins_total.get(),
            "keepalive_terminations_total": self.keepalive_terminations_total.get(),
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
