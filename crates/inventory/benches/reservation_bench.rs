use std::sync::Arc;

use common::OrderId;
use criterion::{Criterion, criterion_group, criterion_main};
use inventory::{
    InMemoryReservationLedger, InMemoryStockStore, ReservationHandler, ReservationRequest,
    RestoreRequest, StockLine,
};

type Handler = ReservationHandler<InMemoryStockStore, InMemoryReservationLedger>;

fn make_handler(quantity: u32) -> Handler {
    let stock = InMemoryStockStore::with_stock((0..10).map(|i| (format!("SKU-{i:03}"), quantity)));
    ReservationHandler::new(Arc::new(stock), Arc::new(InMemoryReservationLedger::new()))
}

fn make_request(lines: usize) -> ReservationRequest {
    let order_id = OrderId::new();
    ReservationRequest {
        order_id,
        correlation_id: order_id.correlation_id(),
        items: (0..lines)
            .map(|i| StockLine::new(format!("SKU-{i:03}"), 1))
            .collect(),
    }
}

fn bench_reserve_single_line(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let handler = make_handler(u32::MAX);

    c.bench_function("inventory/reserve_single_line", |b| {
        b.iter(|| {
            rt.block_on(async {
                handler.reserve(&make_request(1)).await.unwrap();
            });
        });
    });
}

fn bench_reserve_ten_lines(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let handler = make_handler(u32::MAX);

    c.bench_function("inventory/reserve_ten_lines", |b| {
        b.iter(|| {
            rt.block_on(async {
                handler.reserve(&make_request(10)).await.unwrap();
            });
        });
    });
}

fn bench_reserve_with_rollback(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let handler = make_handler(u32::MAX);
    rt.block_on(async {
        handler
            .stock()
            .set_quantity(&"SKU-009".into(), 0)
            .await
            .unwrap();
    });

    c.bench_function("inventory/reserve_with_rollback", |b| {
        b.iter(|| {
            rt.block_on(async {
                handler.reserve(&make_request(10)).await.unwrap();
            });
        });
    });
}

fn bench_replay_duplicate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let handler = make_handler(u32::MAX);
    let request = make_request(5);
    rt.block_on(async { handler.reserve(&request).await.unwrap() });

    c.bench_function("inventory/replay_duplicate", |b| {
        b.iter(|| {
            rt.block_on(async {
                handler.reserve(&request).await.unwrap();
            });
        });
    });
}

fn bench_restore(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let handler = make_handler(0);

    c.bench_function("inventory/restore", |b| {
        b.iter(|| {
            rt.block_on(async {
                let order_id = OrderId::new();
                let request = RestoreRequest {
                    order_id,
                    correlation_id: order_id.correlation_id(),
                    items: vec![StockLine::new("SKU-000", 1)],
                    reason: "SHIPPING_FAILED".to_string(),
                };
                handler.restore(&request).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_reserve_single_line,
    bench_reserve_ten_lines,
    bench_reserve_with_rollback,
    bench_replay_duplicate,
    bench_restore,
);
criterion_main!(benches);
