//! Broadcast benchmark suite.
//!
//! Benchmarks slice computation and fan-out at different scales:
//! - Vault sizes: 100, 1000 items
//! - Connected tabs: 10, 100
//!
//! Run with: cargo bench --bench broadcast
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::sync::Arc;

use async_trait::async_trait;
use bpass_relay::hostname::is_within_site;
use bpass_relay::{
    BackgroundController, BackgroundServices, HostTabs, Port, RelayOptions, Result, SenderInfo,
    StateSlice, TabId, VaultItem,
};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tokio::runtime::Runtime;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const VAULT_SIZES: &[usize] = &[100, 1000];
const TAB_COUNTS: &[u32] = &[10, 100];

// ============================================================================
// Fixtures
// ============================================================================

struct NoActiveTab;

#[async_trait]
impl HostTabs for NoActiveTab {
    async fn active_tab(&self) -> Result<Option<TabId>> {
        Ok(None)
    }
}

fn vault(size: usize) -> Vec<VaultItem> {
    (0..size)
        .map(|i| {
            let hostname = format!("site{}.example.com", i % 50);
            VaultItem::new(hostname, format!("item{i}"), format!("user{i}"), "pw")
        })
        .collect()
}

// ============================================================================
// Benchmark: Slice Computation
// ============================================================================

fn bench_slice(c: &mut Criterion) {
    let mut group = c.benchmark_group("slice");

    for &size in VAULT_SIZES {
        let items = vault(size);
        group.bench_with_input(BenchmarkId::new("for_hostname", size), &items, |b, items| {
            b.iter(|| StateSlice::for_hostname(true, black_box(items), "login.site7.example.com"));
        });
    }

    group.bench_function("is_within_site", |b| {
        b.iter(|| is_within_site(black_box("a.b.mail.example.com"), black_box("example.com")));
    });

    group.finish();
}

// ============================================================================
// Benchmark: Fan-out
// ============================================================================

fn bench_broadcast_all(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let mut group = c.benchmark_group("broadcast_all");
    group.sample_size(20);

    for &tabs in TAB_COUNTS {
        let (controller, mut pages) = rt.block_on(async {
            let controller = BackgroundController::new(
                RelayOptions::new(),
                BackgroundServices::new(Arc::new(NoActiveTab)),
            )
            .expect("controller");

            controller.unlock(b"bench".to_vec()).await.expect("unlock");
            for item in vault(VAULT_SIZES[0]) {
                controller.aggregator().add_item(item).await.expect("add");
            }

            let pages: Vec<Port> = (0..tabs)
                .map(|tab| {
                    let url = format!("https://site{}.example.com/login", tab % 50);
                    let (listener, page) = Port::pair(SenderInfo::tab(TabId::new(tab), url));
                    controller.setup_field_connection(listener).expect("accept");
                    page
                })
                .collect();
            (controller, pages)
        });

        group.bench_with_input(BenchmarkId::new("tabs", tabs), &tabs, |b, _| {
            b.iter(|| {
                let report = controller.broadcast_now();
                for page in &mut pages {
                    while page.inbound.try_recv().is_ok() {}
                }
                report
            });
        });

        controller.shutdown();
    }

    group.finish();
}

criterion_group!(benches, bench_slice, bench_broadcast_all);
criterion_main!(benches);
