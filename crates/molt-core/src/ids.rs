//! Marketplace identifiers.
//!
//! Identifiers nest: a deployment is `owner/dseq`, its groups add `gseq`,
//! each group's order adds `oseq`, and bids and leases add the provider.
//! All of them order lexicographically by their fields so stores keyed by
//! them iterate deterministically.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::wallet::Address;
use crate::MoltError;

fn parse_fields<'a, const N: usize>(s: &'a str, kind: &str) -> Result<[&'a str; N], MoltError> {
    let parts: Vec<&'a str> = s.split('/').collect();
    parts.try_into().map_err(|parts: Vec<&'a str>| {
        MoltError::InvalidId(format!(
            "{kind} id {s:?} has {} fields, expected {N}",
            parts.len()
        ))
    })
}

fn parse_seq<T: FromStr>(field: &str, name: &str) -> Result<T, MoltError> {
    field
        .parse()
        .map_err(|_| MoltError::InvalidId(format!("invalid {name}: {field:?}")))
}

/// Identifies a tenant deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeploymentId {
    /// Tenant owning the deployment.
    pub owner: Address,
    /// Deployment sequence, unique per owner.
    pub dseq: u64,
}

impl DeploymentId {
    /// Creates a deployment id.
    #[must_use]
    pub const fn new(owner: Address, dseq: u64) -> Self {
        Self { owner, dseq }
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.dseq)
    }
}

impl FromStr for DeploymentId {
    type Err = MoltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [owner, dseq] = parse_fields::<2>(s, "deployment")?;
        Ok(Self::new(owner.parse()?, parse_seq(dseq, "dseq")?))
    }
}

/// Identifies a resource group within a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId {
    /// Tenant owning the deployment.
    pub owner: Address,
    /// Deployment sequence.
    pub dseq: u64,
    /// Group sequence within the deployment.
    pub gseq: u32,
}

impl GroupId {
    /// Creates a group id.
    #[must_use]
    pub const fn new(owner: Address, dseq: u64, gseq: u32) -> Self {
        Self { owner, dseq, gseq }
    }

    /// Returns the owning deployment.
    #[must_use]
    pub fn deployment(&self) -> DeploymentId {
        DeploymentId::new(self.owner.clone(), self.dseq)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.owner, self.dseq, self.gseq)
    }
}

/// Identifies an order (one per group and order sequence).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId {
    /// Tenant owning the order.
    pub owner: Address,
    /// Deployment sequence.
    pub dseq: u64,
    /// Group sequence.
    pub gseq: u32,
    /// Order sequence within the group.
    pub oseq: u32,
}

impl OrderId {
    /// Creates an order id.
    #[must_use]
    pub const fn new(owner: Address, dseq: u64, gseq: u32, oseq: u32) -> Self {
        Self {
            owner,
            dseq,
            gseq,
            oseq,
        }
    }

    /// Returns the owning deployment.
    #[must_use]
    pub fn deployment(&self) -> DeploymentId {
        DeploymentId::new(self.owner.clone(), self.dseq)
    }

    /// Returns the owning group.
    #[must_use]
    pub fn group(&self) -> GroupId {
        GroupId::new(self.owner.clone(), self.dseq, self.gseq)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.owner, self.dseq, self.gseq, self.oseq)
    }
}

impl FromStr for OrderId {
    type Err = MoltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [owner, dseq, gseq, oseq] = parse_fields::<4>(s, "order")?;
        Ok(Self::new(
            owner.parse()?,
            parse_seq(dseq, "dseq")?,
            parse_seq(gseq, "gseq")?,
            parse_seq(oseq, "oseq")?,
        ))
    }
}

/// Identifies a provider's bid on an order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BidId {
    /// The order bid on.
    pub order: OrderId,
    /// The bidding provider.
    pub provider: Address,
}

impl BidId {
    /// Creates a bid id.
    #[must_use]
    pub const fn new(order: OrderId, provider: Address) -> Self {
        Self { order, provider }
    }

    /// Returns the lease id this bid becomes once matched.
    #[must_use]
    pub fn lease(&self) -> LeaseId {
        LeaseId::new(self.order.clone(), self.provider.clone())
    }
}

impl fmt::Display for BidId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.order, self.provider)
    }
}

impl FromStr for BidId {
    type Err = MoltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (order, provider) = s
            .rsplit_once('/')
            .ok_or_else(|| MoltError::InvalidId(format!("bid id {s:?} has no provider")))?;
        Ok(Self::new(order.parse()?, provider.parse()?))
    }
}

/// Identifies a lease. Shares its fields with the matched bid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaseId {
    /// The order the lease fulfils.
    pub order: OrderId,
    /// The provider running the lease.
    pub provider: Address,
}

impl LeaseId {
    /// Creates a lease id.
    #[must_use]
    pub const fn new(order: OrderId, provider: Address) -> Self {
        Self { order, provider }
    }

    /// Returns the bid that produced this lease.
    #[must_use]
    pub fn bid(&self) -> BidId {
        BidId::new(self.order.clone(), self.provider.clone())
    }

    /// Returns the deployment the lease belongs to.
    #[must_use]
    pub fn deployment(&self) -> DeploymentId {
        self.order.deployment()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.order, self.provider)
    }
}

impl FromStr for LeaseId {
    type Err = MoltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<BidId>().map(|bid| bid.lease())
    }
}
