// ABOUTME: Serializable directory snapshot consumed by InMemoryDirectory
// ABOUTME: TOML export format covering users, groups, and servers

use crate::entities::{Group, Server, User};
use serde::{Deserialize, Serialize};

/// A complete directory export.
///
/// This is the wire format the CLI loads; the authoritative store behind
/// it is out of scope here. Servers carry their accounts inline, groups
/// carry their membership and grants, users carry their keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySnapshot {
    pub users: Vec<User>,
    pub groups: Vec<Group>,
    pub servers: Vec<Server>,
}
