//! # molt-core
//!
//! Primitives shared by the MOLT compute marketplace.
//!
//! This crate provides:
//!
//! - [`Coin`] - a denominated token amount (`500uve`)
//! - [`Address`] / [`Wallet`] - Ed25519 account addresses and signing
//! - [`OrderId`], [`BidId`], [`LeaseId`] - marketplace identifiers
//! - [`ResourceSpec`] / [`ResourceGroup`] - compute resource quantities
//! - [`Deposit`] - funding backing a bid or deployment, with source validation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod coin;
pub mod deposit;
pub mod error;
pub mod ids;
pub mod resources;
pub mod wallet;

pub use coin::Coin;
pub use deposit::{Deposit, DepositError, DepositSource, SourceSet};
pub use error::MoltError;
pub use ids::{BidId, DeploymentId, GroupId, LeaseId, OrderId};
pub use resources::{ResourceGroup, ResourceSpec, ResourceUnit};
pub use wallet::{Address, Ed25519Verifier, SignatureVerifier, Wallet};
