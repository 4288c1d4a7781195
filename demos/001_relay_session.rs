//! Background relay session.
//!
//! Demonstrates:
//! - Accepting top, field and leech connections for one tab
//! - Unlocking the vault and watching every peer receive its slice
//! - Filling the login form and locking again
//!
//! Usage:
//!   cargo run --example 001_relay_session
//!   cargo run --example 001_relay_session -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use bpass_relay::{
    BackgroundController, BackgroundServices, HostTabs, Port, RelayOptions, SenderInfo, TabId,
    VaultItem,
};
use common::{Args, ScriptedTabs, print_frames};
use serde_json::json;

// ============================================================================
// Constants
// ============================================================================

const TAB: u32 = 7;
const LOGIN_URL: &str = "https://accounts.example.com/login";
const LEECH_URL: &str = "moz-extension://bpass/leech.html";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    println!("=== 001: Relay Session ===\n");

    let tabs = Arc::new(ScriptedTabs::default());
    tabs.activate(TabId::new(TAB));

    let controller = BackgroundController::new(
        RelayOptions::new(),
        BackgroundServices::new(Arc::clone(&tabs) as Arc<dyn HostTabs>),
    )?;

    // ========================================================================
    // Connect
    // ========================================================================

    println!("[1] Connecting tab {TAB}...");

    let (listener, mut top) = Port::pair(SenderInfo::tab(TabId::new(TAB), LOGIN_URL));
    controller.setup_top_connection(listener)?;
    top.outbound.post(json!({ "hostname": "accounts.example.com" }))?;

    let (listener, mut field) = Port::pair(SenderInfo::tab(TabId::new(TAB), LOGIN_URL));
    controller.setup_field_connection(listener)?;

    let (listener, mut leech) = Port::pair(SenderInfo::tab(TabId::new(TAB), LEECH_URL));
    controller.setup_leech_connection(listener)?;

    print_frames("top", &mut top).await;
    print_frames("field", &mut field).await;
    print_frames("leech", &mut leech).await;
    println!("    ✓ Connected\n");

    // ========================================================================
    // Unlock
    // ========================================================================

    println!("[2] Unlocking...");
    controller.unlock(b"demo-key".to_vec()).await?;
    controller
        .aggregator()
        .add_item(VaultItem::new("example.com", "work", "alice", "s3cret"))
        .await?;

    print_frames("top", &mut top).await;
    print_frames("field", &mut field).await;
    tokio::time::sleep(RelayOptions::new().broadcast_debounce).await;
    print_frames("field", &mut field).await;
    print_frames("leech", &mut leech).await;
    println!("    ✓ Unlocked\n");

    // ========================================================================
    // Fill
    // ========================================================================

    println!("[3] Filling...");
    let item = VaultItem::new("example.com", "work", "alice", "s3cret");
    controller.fill_fields(TabId::new(TAB), item)?;
    print_frames("field", &mut field).await;
    println!("    ✓ Fill sent\n");

    if let Some(info) = controller.current_active_tab_info().await {
        println!("[4] Active tab: {}", serde_json::to_string(&info)?);
    }

    // ========================================================================
    // Lock
    // ========================================================================

    println!("\n[5] Locking...");
    controller.lock();
    print_frames("top", &mut top).await;
    print_frames("field", &mut field).await;
    println!("    ✓ Locked\n");

    controller.shutdown();
    println!("=== Session complete ===");
    Ok(())
}
