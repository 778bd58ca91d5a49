// ABOUTME: Access resolution over the user/group/account graph
// ABOUTME: Transitive membership and cycle-safe grant expansion

use chrono::{DateTime, Utc};
use keywarden_model::{AccessGrant, Directory, EntityRef, Group, PublicKey, ServerAccount};
use std::collections::HashSet;

/// Who created a rule and when. Rendered into provenance comments for
/// top-level grants; member expansions carry none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub granted_by: String,
    pub grant_date: DateTime<Utc>,
}

/// One flattened render instruction produced by grant expansion.
///
/// The keyfile builder turns these into comment and key lines; the graph
/// never deals in text beyond entity labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Provenance comment for a grant source or group member.
    Header {
        label: String,
        provenance: Option<Provenance>,
    },
    /// Key material contributed by one source.
    Keys(Vec<PublicKey>),
    /// The source user or account is inactive.
    InactiveAccount,
    /// The source group is inactive.
    InactiveGroup,
    /// The source account's server has been decommissioned.
    DecommissionedServer,
    /// Start of a group's member expansion.
    GroupStart(String),
    /// End of a group's member expansion.
    GroupEnd(String),
}

/// Read-only view over the access graph.
///
/// All queries are pure in-memory computation; nothing here suspends.
/// Broken references never fail resolution — they degrade to comment
/// entries, because one broken grant must not abort a whole keyfile.
pub struct AccessGraph<'a> {
    dir: &'a dyn Directory,
}

impl<'a> AccessGraph<'a> {
    pub fn new(dir: &'a dyn Directory) -> Self {
        Self { dir }
    }

    /// Groups the account belongs to, directly or through nested group
    /// membership, in directory order. Each group appears once; cyclic
    /// nesting terminates.
    pub fn membership_sets(&self, hostname: &str, account: &ServerAccount) -> Vec<Group> {
        let all_groups = self.dir.list_groups();
        let account_ref = EntityRef::ServerAccount {
            hostname: hostname.to_string(),
            account: account.name.clone(),
        };

        let mut member_names: HashSet<String> = HashSet::new();
        // Fixpoint: a group contains the account if the account (or an
        // already-contained group) is among its members. Iterate until
        // no pass adds anything; cycles cannot recur thanks to the set.
        loop {
            let mut changed = false;
            for group in &all_groups {
                if member_names.contains(&group.name) {
                    continue;
                }
                let contains = group.members.iter().any(|member| match member {
                    EntityRef::Group { name } => member_names.contains(name),
                    other => *other == account_ref,
                });
                if contains {
                    member_names.insert(group.name.clone());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        all_groups
            .into_iter()
            .filter(|g| member_names.contains(&g.name))
            .collect()
    }

    /// Flatten one grant into render entries.
    ///
    /// Group sources expand recursively into their members with a
    /// seen-set scoped to this single expansion, initialized with the
    /// source group itself, so cyclic membership terminates and no group
    /// is expanded twice within one grant.
    pub fn expand_grant(&self, grant: &AccessGrant) -> Vec<Entry> {
        let mut entries = Vec::new();
        let provenance = Some(Provenance {
            granted_by: grant.granted_by.clone(),
            grant_date: grant.grant_date,
        });

        match &grant.source {
            EntityRef::User { uid } => {
                entries.push(Entry::Header {
                    label: uid.clone(),
                    provenance,
                });
                entries.push(self.user_body(uid));
            }
            EntityRef::ServerAccount { hostname, account } => {
                entries.push(Entry::Header {
                    label: format!("{account}@{hostname}"),
                    provenance,
                });
                entries.push(self.account_body(&grant.source, hostname));
            }
            EntityRef::Group { name } => {
                let mut seen: HashSet<String> = HashSet::new();
                seen.insert(name.clone());
                entries.push(Entry::Header {
                    label: format!("{name} group"),
                    provenance,
                });
                match self.dir.group_by_name(name) {
                    Some(group) if group.active => {
                        entries.push(Entry::GroupStart(name.clone()));
                        self.expand_members(&group.members, &mut seen, &mut entries);
                        entries.push(Entry::GroupEnd(name.clone()));
                    }
                    _ => entries.push(Entry::InactiveGroup),
                }
            }
        }

        entries
    }

    fn expand_members(
        &self,
        members: &[EntityRef],
        seen: &mut HashSet<String>,
        entries: &mut Vec<Entry>,
    ) {
        for member in members {
            match member {
                EntityRef::User { uid } => {
                    entries.push(Entry::Header {
                        label: uid.clone(),
                        provenance: None,
                    });
                    entries.push(self.user_body(uid));
                }
                EntityRef::ServerAccount { hostname, .. } => {
                    entries.push(Entry::Header {
                        label: member.label(),
                        provenance: None,
                    });
                    entries.push(self.account_body(member, hostname));
                }
                EntityRef::Group { name } => {
                    if !seen.insert(name.clone()) {
                        continue;
                    }
                    entries.push(Entry::Header {
                        label: format!("{name} group"),
                        provenance: None,
                    });
                    entries.push(Entry::GroupStart(name.clone()));
                    if let Some(group) = self.dir.group_by_name(name) {
                        self.expand_members(&group.members, seen, entries);
                    }
                    entries.push(Entry::GroupEnd(name.clone()));
                }
            }
        }
    }

    fn user_body(&self, uid: &str) -> Entry {
        match self.dir.user_by_uid(uid) {
            Some(user) if user.active => Entry::Keys(user.keys),
            _ => Entry::InactiveAccount,
        }
    }

    fn account_body(&self, source: &EntityRef, hostname: &str) -> Entry {
        use keywarden_model::KeyManagement;

        match self.dir.server_by_hostname(hostname) {
            Ok(server) if server.key_management != KeyManagement::Decommissioned => {
                Entry::Keys(self.dir.public_keys(source))
            }
            _ => Entry::DecommissionedServer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keywarden_model::{
        Authorization, InMemoryDirectory, KeyManagement, Server, SyncStatus, User,
    };

    fn user(uid: &str, active: bool, keys: &[&str]) -> User {
        User {
            uid: uid.to_string(),
            name: String::new(),
            active,
            keys: keys.iter().map(|k| PublicKey::new(*k)).collect(),
        }
    }

    fn group(name: &str, members: Vec<EntityRef>) -> Group {
        Group {
            name: name.to_string(),
            active: true,
            members,
            grants: vec![],
        }
    }

    fn user_ref(uid: &str) -> EntityRef {
        EntityRef::User {
            uid: uid.to_string(),
        }
    }

    fn group_ref(name: &str) -> EntityRef {
        EntityRef::Group {
            name: name.to_string(),
        }
    }

    fn account_ref(hostname: &str, account: &str) -> EntityRef {
        EntityRef::ServerAccount {
            hostname: hostname.to_string(),
            account: account.to_string(),
        }
    }

    fn server(hostname: &str, management: KeyManagement, accounts: Vec<ServerAccount>) -> Server {
        Server {
            id: 0,
            hostname: hostname.to_string(),
            ip_address: None,
            port: None,
            key_management: management,
            authorization: Authorization::None,
            host_key_fingerprint: None,
            uuid: None,
            ldap_access_options: vec![],
            accounts,
        }
    }

    fn account(name: &str) -> ServerAccount {
        ServerAccount {
            name: name.to_string(),
            active: true,
            sync_status: SyncStatus::Active,
            keys: vec![],
            grants: vec![],
        }
    }

    fn grant_from(source: EntityRef) -> AccessGrant {
        AccessGrant {
            source,
            granted_by: "admin".to_string(),
            grant_date: "2024-01-15T09:30:00Z".parse().expect("should parse date"),
            options: vec![],
        }
    }

    fn directory(
        users: Vec<User>,
        groups: Vec<Group>,
        servers: Vec<Server>,
    ) -> InMemoryDirectory {
        InMemoryDirectory::new(keywarden_model::DirectorySnapshot {
            users,
            groups,
            servers,
        })
        .expect("should build directory")
    }

    #[test]
    fn test_membership_direct_and_transitive() {
        // account is in "web", "web" is a member of "all"
        let dir = directory(
            vec![],
            vec![
                group("web", vec![account_ref("web1", "deploy")]),
                group("all", vec![group_ref("web")]),
                group("unrelated", vec![user_ref("alice")]),
            ],
            vec![server("web1", KeyManagement::Keys, vec![account("deploy")])],
        );
        let graph = AccessGraph::new(&dir);

        let sets = graph.membership_sets("web1", &account("deploy"));
        let names: Vec<&str> = sets.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["web", "all"]);
    }

    #[test]
    fn test_membership_cycle_terminates() {
        // a contains b, b contains a; account only in a
        let dir = directory(
            vec![],
            vec![
                group(
                    "a",
                    vec![group_ref("b"), account_ref("web1", "deploy")],
                ),
                group("b", vec![group_ref("a")]),
            ],
            vec![server("web1", KeyManagement::Keys, vec![account("deploy")])],
        );
        let graph = AccessGraph::new(&dir);

        let sets = graph.membership_sets("web1", &account("deploy"));
        let names: Vec<&str> = sets.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_expand_user_grant() {
        let dir = directory(
            vec![user("alice", true, &["ssh-ed25519 AAAA alice"])],
            vec![],
            vec![],
        );
        let graph = AccessGraph::new(&dir);

        let entries = graph.expand_grant(&grant_from(user_ref("alice")));
        assert_eq!(entries.len(), 2);
        assert!(matches!(
            &entries[0],
            Entry::Header { label, provenance: Some(p) }
                if label == "alice" && p.granted_by == "admin"
        ));
        assert!(matches!(&entries[1], Entry::Keys(keys) if keys.len() == 1));
    }

    #[test]
    fn test_expand_inactive_user_degrades_to_comment() {
        let dir = directory(
            vec![user("bob", false, &["ssh-ed25519 AAAA bob"])],
            vec![],
            vec![],
        );
        let graph = AccessGraph::new(&dir);

        let entries = graph.expand_grant(&grant_from(user_ref("bob")));
        assert_eq!(entries[1], Entry::InactiveAccount);
    }

    #[test]
    fn test_expand_unknown_user_degrades_to_comment() {
        let dir = directory(vec![], vec![], vec![]);
        let graph = AccessGraph::new(&dir);

        let entries = graph.expand_grant(&grant_from(user_ref("ghost")));
        assert_eq!(entries[1], Entry::InactiveAccount);
    }

    #[test]
    fn test_expand_decommissioned_server_account() {
        let mut retired = account("deploy");
        retired.keys = vec![PublicKey::new("ssh-ed25519 AAAA deploy")];
        let dir = directory(
            vec![],
            vec![],
            vec![server("old1", KeyManagement::Decommissioned, vec![retired])],
        );
        let graph = AccessGraph::new(&dir);

        let entries = graph.expand_grant(&grant_from(account_ref("old1", "deploy")));
        assert_eq!(entries[1], Entry::DecommissionedServer);
    }

    #[test]
    fn test_expand_group_cycle_expands_each_group_once() {
        // admins contains ops, ops contains admins (cycle) plus alice
        let dir = directory(
            vec![user("alice", true, &["ssh-ed25519 AAAA alice"])],
            vec![
                group("admins", vec![group_ref("ops")]),
                group("ops", vec![group_ref("admins"), user_ref("alice")]),
            ],
            vec![],
        );
        let graph = AccessGraph::new(&dir);

        let entries = graph.expand_grant(&grant_from(group_ref("admins")));

        let admin_starts = entries
            .iter()
            .filter(|e| matches!(e, Entry::GroupStart(n) if n == "admins"))
            .count();
        let ops_starts = entries
            .iter()
            .filter(|e| matches!(e, Entry::GroupStart(n) if n == "ops"))
            .count();
        assert_eq!(admin_starts, 1, "source group expanded exactly once");
        assert_eq!(ops_starts, 1, "nested group expanded exactly once");

        // alice's keys still surface through the nested expansion
        assert!(entries
            .iter()
            .any(|e| matches!(e, Entry::Keys(keys) if !keys.is_empty())));
    }

    #[test]
    fn test_expand_inactive_group_grant() {
        let mut inactive = group("retired", vec![user_ref("alice")]);
        inactive.active = false;
        let dir = directory(
            vec![user("alice", true, &["ssh-ed25519 AAAA alice"])],
            vec![inactive],
            vec![],
        );
        let graph = AccessGraph::new(&dir);

        let entries = graph.expand_grant(&grant_from(group_ref("retired")));
        assert_eq!(entries[1], Entry::InactiveGroup);
        assert!(!entries
            .iter()
            .any(|e| matches!(e, Entry::GroupStart(_))));
    }

    #[test]
    fn test_member_headers_carry_no_provenance() {
        let dir = directory(
            vec![user("alice", true, &["ssh-ed25519 AAAA alice"])],
            vec![group("admins", vec![user_ref("alice")])],
            vec![],
        );
        let graph = AccessGraph::new(&dir);

        let entries = graph.expand_grant(&grant_from(group_ref("admins")));
        let member_header = entries
            .iter()
            .find(|e| matches!(e, Entry::Header { label, .. } if label == "alice"))
            .expect("should have member header");
        assert!(matches!(
            member_header,
            Entry::Header {
                provenance: None,
                ..
            }
        ));
    }
}
