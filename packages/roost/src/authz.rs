use crate::config::{AdminFileConfig, ManagedInstance};

/// Identity of the person driving a request, as asserted by the fronting
/// surface. Never cached: every mutating action rebuilds its decision from
/// the actor and the current allow lists.
#[derive(Clone, Debug)]
pub struct Actor {
    pub id: String,
    pub roles: Vec<String>,
    /// Platform-level administrator flag from the fronting surface.
    pub platform_admin: bool,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
            platform_admin: false,
        }
    }
}

/// Allow-listed user id, allow-listed role, or the platform-admin flag.
pub fn is_admin(actor: &Actor, admin: &AdminFileConfig) -> bool {
    actor.platform_admin
        || admin.users.iter().any(|u| *u == actor.id)
        || admin.roles.iter().any(|r| actor.roles.contains(r))
}

/// Whether this actor may mutate this instance: its owner, or any admin.
pub fn may_control(actor: &Actor, instance: &ManagedInstance, admin: &AdminFileConfig) -> bool {
    actor.id == instance.owner_id || is_admin(actor, admin)
}
