//! End-to-end tests of the market ledger.
//!
//! Walks a deployment through its whole life:
//! 1. Tenant opens an order
//! 2. Providers bid with locked deposits
//! 3. The cheapest bid wins and becomes a pending lease
//! 4. The provider reports the manifest
//! 5. Tenant and an operator holding a grant fund the escrow
//! 6. Usage is recorded, acknowledged and claimed
//! 7. The order is settled and the remainder refunded

use chrono::{DateTime, Utc};
use molt_core::coin::DEFAULT_DENOM;
use molt_core::{
    Address, Coin, Deposit, DepositSource, LeaseId, OrderId, ResourceGroup, ResourceSpec, Wallet,
};
use molt_market::msg::{
    MsgAccountDeposit, MsgAcknowledgeUsage, MsgActivateEscrow, MsgClaimRewards, MsgCreateBid,
    MsgCreateEscrow, MsgCreateOrder, MsgManifestReceived, MsgRecordUsage, MsgSettleOrder,
};
use molt_market::{
    AccountId, BlockContext, DepositAuthorization, LeaseCloseReason, LeaseState, Market,
    MarketError, MarketEvent, MarketParams, Scope, UsageType,
};

// ============================================================================
// Helper Functions
// ============================================================================

const T0: i64 = 1_700_000_000;
const HOUR: i64 = 3600;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn uve(amount: u128) -> Coin {
    Coin::new(DEFAULT_DENOM, amount)
}

fn block(height: u64) -> BlockContext {
    let secs = T0 + i64::try_from(height).unwrap() * 600;
    BlockContext::new(height, DateTime::<Utc>::from_timestamp(secs, 0).unwrap())
}

fn balance(market: &Market, address: &Address) -> u128 {
    market.state().bank().balance(address, DEFAULT_DENOM).amount()
}

fn supply(market: &Market) -> u128 {
    let escrowed: u128 = market.state().escrow().iter().map(|a| a.balance.amount()).sum();
    market.state().bank().total(DEFAULT_DENOM) + escrowed
}

fn create_order(market: &mut Market, tenant: &Address, order: &OrderId) {
    let msg = MsgCreateOrder {
        owner: tenant.clone(),
        id: order.clone(),
        group: ResourceGroup::single("web", ResourceSpec::new(1000, 1 << 30, 0, 0), 1),
        price_ceiling: uve(100),
    };
    market.deliver(&block(1), msg).unwrap();
}

fn bid(order: &OrderId, provider: &Address, price: u128) -> MsgCreateBid {
    MsgCreateBid {
        provider: provider.clone(),
        order_id: order.clone(),
        price: uve(price),
        deposit: Deposit::from_balance(uve(500_000)),
        resources: ResourceSpec::new(1000, 1 << 30, 0, 0),
    }
}

// ============================================================================
// Full lifecycle
// ============================================================================

#[test]
fn deployment_lifecycle_pays_provider_and_refunds_tenant() {
    init_tracing();
    let tenant = Wallet::new();
    let winner = Wallet::new();
    let loser = Wallet::new();
    let operator = Wallet::new();

    let mut market = Market::new(MarketParams::default()).unwrap();
    for w in [&tenant, &winner, &loser] {
        market.fund(w.address(), &uve(10_000_000)).unwrap();
    }
    let initial_supply = supply(&market);

    // Order and bids
    let order = OrderId::new(tenant.address().clone(), 7, 1, 1);
    create_order(&mut market, tenant.address(), &order);
    market.deliver(&block(2), bid(&order, winner.address(), 40)).unwrap();
    market.deliver(&block(2), bid(&order, loser.address(), 60)).unwrap();
    assert_eq!(balance(&market, loser.address()), 9_500_000);

    // Matching
    let events = market.match_open_orders(&block(3));
    let lease = LeaseId::new(order.clone(), winner.address().clone());
    assert!(events.contains(&MarketEvent::LeaseCreated {
        lease: lease.clone(),
        price: uve(40),
    }));
    assert!(events.iter().any(|e| matches!(e, MarketEvent::BidClosed { bid } if &bid.provider == loser.address())));
    assert_eq!(balance(&market, loser.address()), 10_000_000);

    // Manifest
    let manifest = MsgManifestReceived {
        provider: winner.address().clone(),
        lease_id: lease.clone(),
    };
    market.deliver(&block(4), manifest).unwrap();
    assert_eq!(market.state().lease(&lease).unwrap().state, LeaseState::Active);

    // Escrow: tenant funds, operator tops up through a grant
    let escrow = AccountId::for_order(&order);
    let create = MsgCreateEscrow {
        sender: tenant.address().clone(),
        order_id: order.clone(),
        amount: uve(1_000_000),
        expires_in: 100,
    };
    market.deliver(&block(5), create).unwrap();
    market
        .grant(
            tenant.address().clone(),
            operator.address().clone(),
            DepositAuthorization::new(uve(300_000), [Scope::Deployment]),
        )
        .unwrap();
    let top_up = MsgAccountDeposit {
        signer: operator.address().clone(),
        account_id: escrow.clone(),
        deposit: Deposit::new(uve(200_000), vec![DepositSource::Grant]),
    };
    market.deliver(&block(5), top_up).unwrap();
    let remaining = market.state().grants().get(tenant.address(), operator.address()).unwrap();
    assert_eq!(remaining.spend_limit, uve(100_000));

    let activate = MsgActivateEscrow {
        sender: tenant.address().clone(),
        escrow_id: escrow.clone(),
        lease_id: lease.clone(),
        recipient: winner.address().clone(),
    };
    market.deliver(&block(6), activate).unwrap();

    // One unit for one hour at 40/unit-hour
    let mut usage = MsgRecordUsage {
        sender: winner.address().clone(),
        order_id: order.clone(),
        lease_id: lease.clone(),
        usage_units: 1,
        usage_type: UsageType::Compute,
        period_start: T0,
        period_end: T0 + HOUR,
        signature: Vec::new(),
    };
    usage.signature = winner.sign(&usage.claim().sign_bytes());
    let recorded = market.deliver(&block(100), usage).unwrap();
    let Some(MarketEvent::UsageRecorded { usage: usage_id, value, .. }) = recorded.first() else {
        panic!("expected usage record");
    };
    assert_eq!(value, &uve(40));

    let claim = market.state().usage().get(*usage_id).unwrap().claim.clone();
    let ack = MsgAcknowledgeUsage {
        sender: tenant.address().clone(),
        usage_id: *usage_id,
        signature: tenant.sign(&claim.sign_bytes()),
    };
    market.deliver(&block(101), ack).unwrap();

    let claimed = market
        .deliver(
            &block(102),
            MsgClaimRewards {
                sender: winner.address().clone(),
                source: Some(lease.clone()),
            },
        )
        .unwrap();
    assert!(claimed.contains(&MarketEvent::RewardsClaimed {
        provider: winner.address().clone(),
        amount: uve(40),
    }));

    // Settlement
    let settled = market
        .deliver(
            &block(103),
            MsgSettleOrder {
                sender: tenant.address().clone(),
                order_id: order.clone(),
            },
        )
        .unwrap();
    assert!(settled.contains(&MarketEvent::OrderSettled {
        order: order.clone(),
        paid: uve(0),
        refunded: uve(1_199_960),
    }));

    let closed = market.state().lease(&lease).unwrap();
    assert_eq!(closed.state, LeaseState::Closed);
    assert_eq!(closed.close_reason, Some(LeaseCloseReason::Settled));
    assert!(market.state().escrow().get(&escrow).is_none());
    assert!(market.state().usage().is_empty());

    assert_eq!(balance(&market, tenant.address()), 9_999_960);
    assert_eq!(balance(&market, winner.address()), 10_000_040);
    assert_eq!(supply(&market), initial_supply);
}

// ============================================================================
// Failure atomicity
// ============================================================================

#[test]
fn grant_shortfall_leaves_state_untouched() {
    init_tracing();
    let tenant = Wallet::new();
    let operator = Wallet::new();
    let mut market = Market::new(MarketParams::default()).unwrap();
    market.fund(tenant.address(), &uve(10_000_000)).unwrap();

    let order = OrderId::new(tenant.address().clone(), 1, 1, 1);
    create_order(&mut market, tenant.address(), &order);
    let create = MsgCreateEscrow {
        sender: tenant.address().clone(),
        order_id: order.clone(),
        amount: uve(1_000),
        expires_in: 100,
    };
    market.deliver(&block(2), create).unwrap();
    market
        .grant(
            tenant.address().clone(),
            operator.address().clone(),
            DepositAuthorization::new(uve(500), [Scope::Deployment]),
        )
        .unwrap();

    let before = market.state().clone();
    let over = MsgAccountDeposit {
        signer: operator.address().clone(),
        account_id: AccountId::for_order(&order),
        deposit: Deposit::new(uve(501), vec![DepositSource::Grant]),
    };
    let err = market.deliver(&block(3), over).unwrap_err();

    assert!(matches!(err, MarketError::InsufficientFunds { .. }));
    assert_eq!(market.state(), &before);
}

#[test]
fn configured_bid_limit_is_enforced() {
    init_tracing();
    let params = MarketParams::from_json(r#"{"max_bids_per_order": 2}"#).unwrap();
    let mut market = Market::new(params).unwrap();
    let tenant = Wallet::new();
    let order = OrderId::new(tenant.address().clone(), 1, 1, 1);
    create_order(&mut market, tenant.address(), &order);

    let providers: Vec<Wallet> = (0..3).map(|_| Wallet::new()).collect();
    for p in &providers {
        market.fund(p.address(), &uve(1_000_000)).unwrap();
    }
    market.deliver(&block(2), bid(&order, providers[0].address(), 50)).unwrap();
    market.deliver(&block(2), bid(&order, providers[1].address(), 50)).unwrap();
    let err = market.deliver(&block(2), bid(&order, providers[2].address(), 50)).unwrap_err();

    assert!(matches!(err, MarketError::OrderMaxBidsExceeded { max: 2, .. }));
    assert_eq!(balance(&market, providers[2].address()), 1_000_000);
}

#[test]
fn equal_prices_go_to_the_earlier_bid() {
    init_tracing();
    let mut market = Market::new(MarketParams::default()).unwrap();
    let tenant = Wallet::new();
    let first = Wallet::new();
    let second = Wallet::new();
    for w in [&first, &second] {
        market.fund(w.address(), &uve(1_000_000)).unwrap();
    }
    let order = OrderId::new(tenant.address().clone(), 1, 1, 1);
    create_order(&mut market, tenant.address(), &order);
    market.deliver(&block(2), bid(&order, first.address(), 50)).unwrap();
    market.deliver(&block(2), bid(&order, second.address(), 50)).unwrap();

    market.match_open_orders(&block(3));
    let winner = LeaseId::new(order.clone(), first.address().clone());
    assert!(market.state().lease(&winner).is_some());
    assert_eq!(market.state().leases().count(), 1);
}

#[test]
fn unactivated_escrow_expires_back_to_tenant() {
    init_tracing();
    let mut market = Market::new(MarketParams::default()).unwrap();
    let tenant = Wallet::new();
    market.fund(tenant.address(), &uve(10_000)).unwrap();
    let order = OrderId::new(tenant.address().clone(), 1, 1, 1);
    create_order(&mut market, tenant.address(), &order);
    let create = MsgCreateEscrow {
        sender: tenant.address().clone(),
        order_id: order.clone(),
        amount: uve(4_000),
        expires_in: 10,
    };
    market.deliver(&block(2), create).unwrap();

    assert!(market.expire_escrows(&block(11)).is_empty());
    let events = market.expire_escrows(&block(12));

    assert!(!events.is_empty());
    assert!(market.state().escrow().get(&AccountId::for_order(&order)).is_none());
    assert_eq!(balance(&market, tenant.address()), 10_000);
}
