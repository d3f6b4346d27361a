use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of an authenticated user. Identity mechanics (OAuth,
/// magic links) live outside the engine; this is whatever the auth layer
/// resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one physical vending machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MachineId(String);

impl MachineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The authenticated identity behind an engine call.
///
/// The engine never authenticates anyone itself; transports hand it a
/// resolved `Caller` and the engine only checks the role against the
/// operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// No authentication at all. Denied everywhere.
    Anonymous,
    /// An end user paying from their wallet.
    User(UserId),
    /// A read-only kiosk display account.
    Display,
    /// The trusted machine-bridge identity that opens sales.
    MachineBridge,
    /// A trusted backend service (payment-processor callbacks, admin tools).
    Service,
}

impl Caller {
    /// Only the machine bridge (or a trusted service) may open a sale.
    pub fn may_create_sessions(&self) -> bool {
        matches!(self, Caller::MachineBridge | Caller::Service)
    }

    /// Any authenticated identity may read sessions and wallets it is
    /// entitled to.
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Caller::Anonymous)
    }

    /// Whether this caller may spend from (or register recharges for) the
    /// given user's wallet.
    pub fn may_act_for(&self, user_id: &UserId) -> bool {
        match self {
            Caller::Service => true,
            Caller::User(id) => id == user_id,
            _ => false,
        }
    }

    pub fn is_service(&self) -> bool {
        matches!(self, Caller::Service)
    }
}
