//! Benchmarks for price level tree and engine update throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use depth_engine::events::{DepthSnapshot, DepthUpdate};
use depth_engine::tree::PriceLevelTree;
use depth_engine::{EngineConfig, OrderBookEngine};
use rust_decimal::Decimal;
use types::ids::MarketId;
use types::numeric::{Price, Quantity};
use types::side::Side;

fn price(cents: i64) -> Price {
    Price::normalize(Decimal::new(cents, 2), 2).unwrap()
}

fn populated_tree(levels: i64) -> PriceLevelTree {
    let mut tree = PriceLevelTree::new();
    let qty = Quantity::normalize(Decimal::ONE, 8).unwrap();
    for i in 0..levels {
        tree.upsert(price(50_000 - i), Side::Bid, qty, 0);
        tree.upsert(price(50_001 + i), Side::Ask, qty, 0);
    }
    tree
}

fn benchmark_tree_upsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_upsert");

    for size in [100i64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut tree = populated_tree(size);
            let qty = Quantity::normalize(Decimal::new(25, 1), 8).unwrap();
            let mut i = 0i64;
            b.iter(|| {
                let p = price(50_000 - (i % size));
                black_box(tree.upsert(p, Side::Bid, qty, i));
                i += 1;
            });
        });
    }

    group.finish();
}

fn benchmark_best_quotes(c: &mut Criterion) {
    let tree = populated_tree(10_000);
    c.bench_function("tree_best_bid_ask", |b| {
        b.iter(|| black_box((tree.best_bid(), tree.best_ask())));
    });
}

fn benchmark_band_sum(c: &mut Criterion) {
    let mut engine = OrderBookEngine::new(MarketId::new("BTCUSDT"), EngineConfig {
        max_levels: 100_000,
        ..EngineConfig::default()
    })
    .unwrap();
    engine.complete_recovery(&DepthSnapshot::empty(0), 0).unwrap();

    let bids: Vec<(String, String)> = (0..1_000)
        .map(|i| (Decimal::new(50_000 - i, 2).to_string(), "1".to_string()))
        .collect();
    let asks: Vec<(String, String)> = (0..1_000)
        .map(|i| (Decimal::new(50_001 + i, 2).to_string(), "1".to_string()))
        .collect();
    engine
        .update_depth(
            DepthUpdate {
                first_update_id: 1,
                final_update_id: 1,
                bids,
                asks,
                event_time: None,
            },
            0,
        )
        .unwrap();

    let center = Decimal::new(50_000, 2);
    let tick = Decimal::new(1, 2);
    c.bench_function("engine_sum_band_20_ticks", |b| {
        b.iter(|| black_box(engine.sum_band(center, 20, tick)));
    });
}

fn benchmark_update_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_update_depth");
    group.throughput(Throughput::Elements(1));

    group.bench_function("two_pair_diff", |b| {
        let mut engine =
            OrderBookEngine::new(MarketId::new("BTCUSDT"), EngineConfig::default()).unwrap();
        engine.complete_recovery(&DepthSnapshot::empty(0), 0).unwrap();
        let mut id = 1u64;
        b.iter(|| {
            let offset = (id % 50) as i64;
            let bid = Decimal::new(50_000 - offset, 2).to_string();
            let ask = Decimal::new(50_001 + offset, 2).to_string();
            let update =
                DepthUpdate::from_pairs(id, id, &[(bid.as_str(), "1.5")], &[(ask.as_str(), "2")]);
            black_box(engine.update_depth(update, id as i64).unwrap());
            id += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_tree_upsert,
    benchmark_best_quotes,
    benchmark_band_sum,
    benchmark_update_depth
);
criterion_main!(benches);
