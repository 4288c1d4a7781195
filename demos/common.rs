//! Shared utilities for demos.
//!
//! Provides common functionality used across all demos:
//! - Command-line argument parsing
//! - Logging initialization
//! - A scripted host tab API

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use bpass_relay::transport::mux::unwrap_frame;
use bpass_relay::{HostTabs, Port, Result, TabId};
use parking_lot::Mutex;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments for demos.
#[derive(Debug, Clone)]
pub struct Args {
    pub debug: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self {
            debug: args.iter().any(|a| a == "--debug"),
        }
    }
}

/// Host tab API whose active tab the demo sets by hand.
#[derive(Debug, Default)]
pub struct ScriptedTabs {
    active: Mutex<Option<TabId>>,
}

impl ScriptedTabs {
    pub fn activate(&self, tab_id: TabId) {
        *self.active.lock() = Some(tab_id);
    }
}

#[async_trait]
impl HostTabs for ScriptedTabs {
    async fn active_tab(&self) -> Result<Option<TabId>> {
        Ok(*self.active.lock())
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging.
pub fn init_logging(debug: bool) {
    let filter = if debug {
        "bpass_relay=trace"
    } else {
        "bpass_relay=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

/// Prints every frame waiting on `port`, unwrapped from its stream name.
pub async fn print_frames(label: &str, port: &mut Port) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(frame) = port.inbound.try_recv() {
        match unwrap_frame(&frame) {
            Some((name, data)) => println!("    [{label}] {name}: {}", summarize(data)),
            None => println!("    [{label}] raw: {frame}"),
        }
    }
}

fn summarize(data: &Value) -> String {
    let api_type = data.get("apiType").and_then(Value::as_str).unwrap_or("?");
    match data.get("respData") {
        Some(resp) => format!(
            "{api_type} unlocked={} matched={}",
            resp.get("isUnlocked").unwrap_or(&Value::Null),
            resp.get("matchedNum").unwrap_or(&Value::Null)
        ),
        None => api_type.to_owned(),
    }
}
