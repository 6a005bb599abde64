//! Result payloads produced by probe test executors
//!
//! These travel inside `task_result.result_data` and `result_report.result`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// ICMP ping summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcmpPingResult {
    pub packets_sent: u32,
    pub packets_received: u32,
    pub packet_loss_percent: f64,
    pub min_rtt_ms: f64,
    pub avg_rtt_ms: f64,
    pub max_rtt_ms: f64,
    #[serde(default)]
    pub stddev_rtt_ms: f64,
    #[serde(default)]
    pub replies: Vec<PingReply>,
    /// Address actually probed when the target was a hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_ip: Option<String>,
}

/// One echo reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingReply {
    pub seq: u32,
    pub ttl: u32,
    pub time_ms: f64,
}

/// TCP connect-time probe summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpPingResult {
    pub target: String,
    pub successful_connections: u32,
    pub failed_connections: u32,
    pub avg_connect_time_ms: f64,
    pub min_connect_time_ms: f64,
    pub max_connect_time_ms: f64,
    #[serde(default)]
    pub attempts: Vec<TcpPingAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_ip: Option<String>,
}

/// One TCP connect attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpPingAttempt {
    pub seq: u32,
    /// success or failed
    pub status: String,
    pub time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// MTR path report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtrResult {
    pub hops: Vec<MtrHop>,
    pub target: String,
    pub total_hops: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtrHop {
    pub hop: u32,
    pub ip: String,
    #[serde(default)]
    pub hostname: String,
    pub sent: u32,
    pub received: u32,
    pub loss_percent: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

/// Traceroute path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerouteResult {
    pub hops: Vec<TracerouteHop>,
    pub target: String,
    pub total_hops: u32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerouteHop {
    pub hop: u32,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub hostname: String,
    /// One RTT per probe packet
    #[serde(default)]
    pub rtts: Vec<f64>,
    #[serde(default)]
    pub timeout: bool,
}

/// BIRD routing table lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BirdRouteResult {
    pub routes: Vec<BirdRoute>,
    pub total_routes: u32,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BirdRoute {
    pub network: String,
    #[serde(default)]
    pub gateway: String,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub metric: u32,
    /// Route age in nanoseconds
    #[serde(default)]
    pub age: i64,
}

/// Result data decoded according to the task type that produced it
#[derive(Debug, Clone, PartialEq)]
pub enum TestResult {
    IcmpPing(IcmpPingResult),
    TcpPing(TcpPingResult),
    Mtr(MtrResult),
    Traceroute(TracerouteResult),
    BirdRoute(BirdRouteResult),
    /// Task types without a typed shape (e.g. http_test)
    Untyped(Value),
}

impl TestResult {
    /// Decode `data` using the shape for `task_type`
    pub fn decode(task_type: &str, data: &Value) -> Result<Self> {
        fn typed<T: serde::de::DeserializeOwned>(task_type: &str, data: &Value) -> Result<T> {
            serde_json::from_value(data.clone()).map_err(|e| Error::ProtocolMalformed {
                message: format!("invalid {} result: {}", task_type, e),
            })
        }

        Ok(match task_type {
            "icmp_ping" => TestResult::IcmpPing(typed(task_type, data)?),
            "tcp_ping" => TestResult::TcpPing(typed(task_type, data)?),
            "mtr" => TestResult::Mtr(typed(task_type, data)?),
            "traceroute" => TestResult::Traceroute(typed(task_type, data)?),
            "bird_route" => TestResult::BirdRoute(typed(task_type, data)?),
            _ => TestResult::Untyped(data.clone()),
        })
    }

    /// One-line human summary for terminal output
    pub fn summary(&self) -> String {
        match self {
            TestResult::IcmpPing(r) => format!(
                "{}/{} replies, loss {:.1}%, rtt min/avg/max {:.2}/{:.2}/{:.2} ms",
                r.packets_received, r.packets_sent, r.packet_loss_percent,
                r.min_rtt_ms, r.avg_rtt_ms, r.max_rtt_ms
            ),
            TestResult::TcpPing(r) => format!(
                "{} ok, {} failed, connect avg {:.2} ms",
                r.successful_connections, r.failed_connections, r.avg_connect_time_ms
            ),
            TestResult::Mtr(r) => format!("{} hops to {}", r.total_hops, r.target),
            TestResult::Traceroute(r) => format!(
                "{} hops to {}{}",
                r.total_hops,
                r.target,
                if r.success { "" } else { " (incomplete)" }
            ),
            TestResult::BirdRoute(r) => format!("{} routes", r.total_routes),
            TestResult::Untyped(v) => v.to_string(),
        }
    }
}
