//! Benchmarks for molt-market.

use chrono::{DateTime, Utc};
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use molt_core::coin::DEFAULT_DENOM;
use molt_core::{Coin, Deposit, OrderId, ResourceGroup, ResourceSpec, Wallet};
use molt_market::msg::{MsgCreateBid, MsgCreateOrder};
use molt_market::{BlockContext, Market, MarketParams};

fn uve(amount: u128) -> Coin {
    Coin::new(DEFAULT_DENOM, amount)
}

fn block(height: u64) -> BlockContext {
    let secs = 1_700_000_000 + i64::try_from(height).unwrap() * 6;
    BlockContext::new(height, DateTime::<Utc>::from_timestamp(secs, 0).unwrap())
}

/// A market holding `orders` open orders, each with `bids` bids.
fn populated(orders: u32, bids: u32) -> Market {
    let mut market = Market::new(MarketParams::default()).unwrap();
    let tenant = Wallet::new();
    let providers: Vec<Wallet> = (0..bids).map(|_| Wallet::new()).collect();
    for p in &providers {
        market.fund(p.address(), &uve(u128::from(orders) * 1_000_000)).unwrap();
    }
    for oseq in 1..=orders {
        let id = OrderId::new(tenant.address().clone(), 1, 1, oseq);
        let order = MsgCreateOrder {
            owner: tenant.address().clone(),
            id: id.clone(),
            group: ResourceGroup::single("web", ResourceSpec::new(1000, 1 << 30, 0, 0), 1),
            price_ceiling: uve(100),
        };
        market.deliver(&block(1), order).unwrap();
        for (i, p) in providers.iter().enumerate() {
            let bid = MsgCreateBid {
                provider: p.address().clone(),
                order_id: id.clone(),
                price: uve(50 + i as u128),
                deposit: Deposit::from_balance(uve(500_000)),
                resources: ResourceSpec::new(1000, 1 << 30, 0, 0),
            };
            market.deliver(&block(2), bid).unwrap();
        }
    }
    market
}

fn benchmark_create_bid(c: &mut Criterion) {
    let market = populated(50, 5);
    let provider = Wallet::new();
    let tenant = market.state().orders().next().unwrap().id.owner.clone();
    let order = OrderId::new(tenant, 1, 1, 1);

    c.bench_function("create_bid_50_orders", |b| {
        b.iter_batched(
            || {
                let mut m = market.clone();
                m.fund(provider.address(), &uve(1_000_000)).unwrap();
                m
            },
            |mut m| {
                let bid = MsgCreateBid {
                    provider: provider.address().clone(),
                    order_id: order.clone(),
                    price: uve(60),
                    deposit: Deposit::from_balance(uve(500_000)),
                    resources: ResourceSpec::new(1000, 1 << 30, 0, 0),
                };
                black_box(m.deliver(&block(3), bid).unwrap());
            },
            BatchSize::SmallInput,
        );
    });
}

fn benchmark_match(c: &mut Criterion) {
    let market = populated(100, 10);

    c.bench_function("match_100_orders_10_bids", |b| {
        b.iter_batched(
            || market.clone(),
            |mut m| black_box(m.match_open_orders(&block(3))),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, benchmark_create_bid, benchmark_match);
criterion_main!(benches);
