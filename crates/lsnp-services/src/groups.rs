//! Group routing — just enough state to route GROUP_MSG records.
//!
//! A GROUP_CREATE naming us as a member installs an entry; group messages
//! from known groups reach the inbox; everything else drops. Membership
//! semantics beyond routing (roles, invites, moderation) are out of scope.

use dashmap::DashMap;

use lsnp_core::message::GroupCreate;
use lsnp_core::PeerId;

#[derive(Debug, Clone)]
pub struct Group {
    pub group_id: String,
    pub group_name: String,
    pub owner: PeerId,
    pub members: Vec<PeerId>,
}

#[derive(Default)]
pub struct GroupTable {
    groups: DashMap<String, Group>,
}

impl GroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a group from GROUP_CREATE, provided `me` is in the member
    /// list. Returns false when the record is not addressed to us.
    pub fn install(&self, create: &GroupCreate, me: &PeerId) -> bool {
        if !create.members.contains(me) {
            return false;
        }
        self.groups.insert(
            create.group_id.clone(),
            Group {
                group_id: create.group_id.clone(),
                group_name: create.group_name.clone(),
                owner: create.from.clone(),
                members: create.members.clone(),
            },
        );
        tracing::info!(
            group = %create.group_name,
            group_id = %create.group_id,
            members = create.members.len(),
            "added to group"
        );
        true
    }

    pub fn get(&self, group_id: &str) -> Option<Group> {
        self.groups.get(group_id).map(|g| g.clone())
    }

    /// Find a group by display name, for the command surface.
    pub fn by_name(&self, name: &str) -> Option<Group> {
        self.groups
            .iter()
            .find(|g| g.group_name == name)
            .map(|g| g.clone())
    }

    /// Is this sender allowed to message this group?
    pub fn may_route(&self, group_id: &str, sender: &PeerId) -> bool {
        self.groups
            .get(group_id)
            .map(|g| g.members.contains(sender))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> Vec<Group> {
        self.groups.iter().map(|g| g.clone()).collect()
    }
}
