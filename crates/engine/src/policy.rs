//! Deployment-wide operating policy: per-role limits and feature gates.
//!
//! The policy is an immutable value swapped behind a single atomic reference.
//! Readers load one snapshot per call and keep seeing that snapshot for the
//! call's duration; a hot reload never partially applies mid-request.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::models::Role;

/// Rate-limited action kinds tracked by the quota subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateEmail,
    CheckInbox,
    ReadMessage,
    AdminAction,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::CreateEmail => "create_email",
            ActionKind::CheckInbox => "check_inbox",
            ActionKind::ReadMessage => "read_message",
            ActionKind::AdminAction => "admin_action",
        }
    }
}

/// Admission ceilings for the three nested quota windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCeilings {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
}

impl WindowCeilings {
    pub const fn new(per_minute: u32, per_hour: u32, per_day: u32) -> Self {
        Self {
            per_minute,
            per_hour,
            per_day,
        }
    }

    /// Ceilings applied to a secondary identity (network origin): half the
    /// user ceilings, with floors so a single shared origin is never starved
    /// outright.
    pub fn for_origin(&self) -> Self {
        Self {
            per_minute: (self.per_minute / 2).max(1),
            per_hour: (self.per_hour / 2).max(3),
            per_day: (self.per_day / 2).max(10),
        }
    }

    fn halved(&self) -> Self {
        Self {
            per_minute: (self.per_minute / 2).max(1),
            per_hour: (self.per_hour / 2).max(1),
            per_day: (self.per_day / 2).max(1),
        }
    }
}

/// Per-role limits: simultaneous-active capacity plus quota ceilings per
/// action kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleLimits {
    pub max_emails_per_user: usize,
    pub create_email: WindowCeilings,
    pub check_inbox: WindowCeilings,
    pub read_message: WindowCeilings,
    pub admin_action: WindowCeilings,
}

impl RoleLimits {
    pub fn ceilings(&self, action: ActionKind) -> &WindowCeilings {
        match action {
            ActionKind::CreateEmail => &self.create_email,
            ActionKind::CheckInbox => &self.check_inbox,
            ActionKind::ReadMessage => &self.read_message,
            ActionKind::AdminAction => &self.admin_action,
        }
    }

    fn halved(&self) -> Self {
        Self {
            max_emails_per_user: (self.max_emails_per_user / 2).max(1),
            create_email: self.create_email.halved(),
            check_inbox: self.check_inbox.halved(),
            read_message: self.read_message.halved(),
            admin_action: self.admin_action.halved(),
        }
    }
}

/// Deployment operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    Full,
    Restricted,
}

/// Process-wide, read-mostly policy value. Construct via [`ModePolicy::full`]
/// or [`ModePolicy::restricted`], or deserialize from external configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModePolicy {
    pub mode: OperatingMode,
    pub standard: RoleLimits,
    pub privileged: RoleLimits,
    pub admin: RoleLimits,
    pub features: HashMap<String, bool>,
}

impl ModePolicy {
    /// Normal-service defaults.
    pub fn full() -> Self {
        let standard = RoleLimits {
            max_emails_per_user: 10,
            create_email: WindowCeilings::new(2, 10, 50),
            check_inbox: WindowCeilings::new(5, 30, 100),
            read_message: WindowCeilings::new(10, 60, 200),
            admin_action: WindowCeilings::new(0, 0, 0),
        };
        let privileged = RoleLimits {
            max_emails_per_user: 25,
            create_email: WindowCeilings::new(5, 25, 120),
            check_inbox: WindowCeilings::new(10, 60, 250),
            read_message: WindowCeilings::new(20, 120, 400),
            admin_action: WindowCeilings::new(0, 0, 0),
        };
        let admin = RoleLimits {
            max_emails_per_user: 100,
            create_email: WindowCeilings::new(10, 50, 250),
            check_inbox: WindowCeilings::new(30, 100, 500),
            read_message: WindowCeilings::new(30, 100, 500),
            admin_action: WindowCeilings::new(30, 100, 500),
        };
        let features = HashMap::from([
            ("email_creation".to_string(), true),
            ("inbox_polling".to_string(), true),
            ("admin_broadcast".to_string(), true),
        ]);
        Self {
            mode: OperatingMode::Full,
            standard,
            privileged,
            admin,
            features,
        }
    }

    /// Degraded-service defaults: every ceiling halved, nonessential
    /// features off. Admin limits are left intact so operators can still
    /// work the deployment.
    pub fn restricted() -> Self {
        let full = Self::full();
        let features = HashMap::from([
            ("email_creation".to_string(), true),
            ("inbox_polling".to_string(), true),
            ("admin_broadcast".to_string(), false),
        ]);
        Self {
            mode: OperatingMode::Restricted,
            standard: full.standard.halved(),
            privileged: full.privileged.halved(),
            admin: full.admin,
            features,
        }
    }

    /// Pure lookup, no side effects.
    pub fn limits(&self, role: Role) -> &RoleLimits {
        match role {
            Role::Standard => &self.standard,
            Role::Privileged => &self.privileged,
            Role::Admin => &self.admin,
        }
    }

    /// Pure lookup; unknown features are disabled.
    pub fn is_feature_enabled(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }
}

/// Shared handle to the current policy.
///
/// `load` is lock-free; `reload` atomically swaps the whole value. In-flight
/// operations holding a previous snapshot keep seeing the old values.
pub struct PolicyHandle {
    inner: ArcSwap<ModePolicy>,
}

impl PolicyHandle {
    pub fn new(policy: ModePolicy) -> Self {
        Self {
            inner: ArcSwap::from_pointee(policy),
        }
    }

    /// One consistent snapshot; dereference once per call.
    pub fn load(&self) -> Arc<ModePolicy> {
        self.inner.load_full()
    }

    /// Atomic whole-structure swap. Takes effect on the next `load`.
    pub fn reload(&self, policy: ModePolicy) {
        self.inner.store(Arc::new(policy));
        tracing::info!("mode policy reloaded");
    }
}

impl Default for PolicyHandle {
    fn default() -> Self {
        Self::new(ModePolicy::full())
    }
}
