//! Known client binary suites.

use crate::script::ProxyBinary;

/// baton binaries.
pub const BATON_BINARIES: [&str; 7] = [
    "baton",
    "baton-metaquery",
    "baton-get",
    "baton-chmod",
    "baton-list",
    "baton-metamod",
    "baton-specificquery",
];

/// icommands binaries.
pub const ICOMMAND_BINARIES: [&str; 47] = [
    "ibun", "icd", "ichksum", "ichmod", "icp", "idbug", "ienv", "ierror", "iexecmd", "iexit",
    "ifsck", "iget", "igetwild", "ihelp", "iinit", "ilocate", "ils", "ilsresc", "imcoll",
    "imiscsvrinfo", "imkdir", "imv", "ipasswd", "iphybun", "iphymv", "ips", "iput", "ipwd",
    "iqdel", "iqmod", "iqstat", "iquest", "iquota", "ireg", "irepl", "irm", "irmtrash", "irsync",
    "irule", "iscan", "isysmeta", "itrim", "iuserinfo", "ixmsg", "izonereport", "imeta", "iadmin",
];

/// icommands that read a file from the host.
pub const HOST_INPUT_BINARIES: [&str; 1] = ["iput"];

/// A family of client binaries proxied together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suite {
    /// baton JSON clients.
    Baton,
    /// iRODS icommands.
    ICommands,
}

impl Suite {
    /// Binaries in the suite.
    #[must_use]
    pub fn binaries(self) -> Vec<ProxyBinary> {
        let names: &[&str] = match self {
            Self::Baton => &BATON_BINARIES,
            Self::ICommands => &ICOMMAND_BINARIES,
        };
        names
            .iter()
            .map(|name| {
                if HOST_INPUT_BINARIES.contains(name) {
                    ProxyBinary::HostInput((*name).to_string())
                } else {
                    ProxyBinary::Direct((*name).to_string())
                }
            })
            .collect()
    }

    /// Prefix of the suite's proxy directory.
    #[must_use]
    pub const fn directory_prefix(self) -> &'static str {
        match self {
            Self::Baton => "baton-proxies-",
            Self::ICommands => "icommands-proxies-",
        }
    }
}
