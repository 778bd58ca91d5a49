// ABOUTME: Renders resolved access into authorized-keys file bytes
// ABOUTME: Header/provenance comments, option prefixes, LDAP user synthesis

use crate::graph::{AccessGraph, Entry};
use chrono::SecondsFormat;
use keywarden_model::{
    render_option_prefix, Authorization, Directory, Server, ServerAccount, SyncStatus,
    SYNC_ACCOUNT,
};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::collections::BTreeMap;

/// A generated keyfile for one remote account name.
///
/// Ephemeral: recomputed every sync, never persisted locally.
#[derive(Debug, Clone)]
pub struct KeyFile {
    /// Literal bytes to place on the remote server.
    pub content: String,
    /// Require the remote OS account to exist before writing; delete the
    /// remote file when it does not. Set for `manual LDAP` users.
    pub check_account_exists: bool,
    /// Explicit account to report outcomes against. Synthesized LDAP
    /// user files carry none.
    pub account: Option<String>,
}

/// Renders keyfiles for every syncable account on a server.
pub struct KeyFileBuilder<'a> {
    dir: &'a dyn Directory,
    base_url: Option<&'a str>,
}

impl<'a> KeyFileBuilder<'a> {
    pub fn new(dir: &'a dyn Directory, base_url: Option<&'a str>) -> Self {
        Self { dir, base_url }
    }

    /// Generate the full keyfile set for a server.
    ///
    /// Explicit accounts first, then synthesized LDAP users for servers
    /// under LDAP authorization (`only_account` filters the latter, as
    /// the per-account sync path does). The `keys-sync` file is always
    /// discarded: the sync identity is never itself a sync target.
    pub fn build_for_server(
        &self,
        server: &Server,
        only_account: Option<&str>,
    ) -> BTreeMap<String, KeyFile> {
        let graph = AccessGraph::new(self.dir);
        let mut keyfiles = BTreeMap::new();

        for account in &server.accounts {
            if !account.active || account.sync_status == SyncStatus::Proposed {
                continue;
            }
            let filename = account.name.replace('/', "");
            let content = self.render_account(&graph, server, account);
            keyfiles.insert(
                filename,
                KeyFile {
                    content,
                    check_account_exists: false,
                    account: Some(account.name.clone()),
                },
            );
        }

        if server.ldap_authorized() {
            self.synthesize_ldap_users(server, only_account, &mut keyfiles);
        }

        keyfiles.remove(SYNC_ACCOUNT);
        keyfiles
    }

    fn render_account(
        &self,
        graph: &AccessGraph<'_>,
        server: &Server,
        account: &ServerAccount,
    ) -> String {
        let link = self.base_url.map(|base| {
            format!(
                "{}/servers/{}/accounts/{}",
                base,
                utf8_percent_encode(&server.hostname, NON_ALPHANUMERIC),
                utf8_percent_encode(&account.name, NON_ALPHANUMERIC),
            )
        });
        let mut content = header(&format!("account '{}'", account.name), link.as_deref());

        // The account's own rules apply first, then rules inherited from
        // each group it belongs to, wrapped in membership banners.
        for grant in &account.grants {
            let prefix = render_option_prefix(&grant.options);
            render_entries(&graph.expand_grant(grant), &prefix, &mut content);
        }

        for group in graph.membership_sets(&server.hostname, account) {
            if !group.active {
                continue;
            }
            content.push_str(&format!(
                "# === Start of rules applied due to membership in {} group ===\n",
                group.name
            ));
            for grant in &group.grants {
                let prefix = render_option_prefix(&grant.options);
                render_entries(&graph.expand_grant(grant), &prefix, &mut content);
            }
            content.push_str(&format!(
                "# === End of rules applied due to membership in {} group ===\n\n",
                group.name
            ));
        }

        content
    }

    fn synthesize_ldap_users(
        &self,
        server: &Server,
        only_account: Option<&str>,
        keyfiles: &mut BTreeMap<String, KeyFile>,
    ) {
        let prefix = render_option_prefix(&server.ldap_access_options);
        let check = server.authorization == Authorization::ManualLdap;

        for user in self.dir.list_users() {
            let filename = user.uid.replace('/', "");
            if let Some(only) = only_account {
                if filename != only {
                    continue;
                }
            }
            if keyfiles.contains_key(&filename) || user.keys.is_empty() {
                continue;
            }
            let mut content = header(&format!("LDAP user '{}'", user.uid), self.base_url);
            if user.active {
                for key in &user.keys {
                    content.push_str(&prefix);
                    content.push_str(key.export());
                    content.push('\n');
                }
            } else {
                content.push_str("# Inactive account\n");
            }
            keyfiles.insert(
                filename,
                KeyFile {
                    content,
                    check_account_exists: check,
                    account: None,
                },
            );
        }
    }
}

fn header(subject: &str, link: Option<&str>) -> String {
    match link {
        Some(link) => format!(
            "## Auto generated keys file for {subject}\n## Do not edit this file! Modify at {link}\n"
        ),
        None => {
            format!("## Auto generated keys file for {subject}\n## Do not edit this file!\n")
        }
    }
}

fn render_entries(entries: &[Entry], prefix: &str, out: &mut String) {
    for entry in entries {
        match entry {
            Entry::Header { label, provenance } => {
                out.push_str(&format!("# {label}"));
                if let Some(p) = provenance {
                    out.push_str(&format!(
                        " granted access by {} on {}",
                        p.granted_by,
                        p.grant_date.to_rfc3339_opts(SecondsFormat::Secs, false)
                    ));
                }
                out.push('\n');
            }
            Entry::Keys(keys) => {
                for key in keys {
                    out.push_str(prefix);
                    out.push_str(key.export());
                    out.push('\n');
                }
            }
            Entry::InactiveAccount => out.push_str("# Inactive account\n"),
            Entry::InactiveGroup => out.push_str("# Inactive group\n"),
            Entry::DecommissionedServer => out.push_str("# Decommissioned server\n"),
            Entry::GroupStart(name) => {
                out.push_str(&format!("# == Start of {name} group members ==\n"));
            }
            Entry::GroupEnd(name) => {
                out.push_str(&format!("# == End of {name} group members ==\n"));
            }
        }
    }
}
