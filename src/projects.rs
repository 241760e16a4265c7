//! Linux Foundation projects and their Jenkins servers.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Project {
    pub key: &'static str,
    pub name: &'static str,
    pub full_name: &'static str,
    pub jenkins_url: Option<&'static str>,
    pub aliases: &'static [&'static str],
}

impl Project {
    pub fn has_jenkins(&self) -> bool {
        self.jenkins_url.is_some()
    }

    /// Line shown in the interactive project menu. Aliases are included so
    /// typing one narrows the list to this project.
    pub fn menu_label(&self) -> String {
        let mut label = format!("{} ({})", self.full_name, self.key);
        if !self.aliases.is_empty() {
            label.push_str(&format!(" [{}]", self.aliases.join(", ")));
        }
        if let Some(url) = self.jenkins_url {
            label.push_str(&format!(" {url}"));
        }
        label
    }

    /// Host part of the Jenkins URL, used as the default scp host.
    pub fn jenkins_host(&self) -> Option<&'static str> {
        let url = self.jenkins_url?;
        let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
        rest.split('/').next().filter(|h| !h.is_empty())
    }
}

pub const PROJECTS: &[Project] = &[
    Project {
        key: "agl",
        name: "AGL",
        full_name: "Automotive Grade Linux",
        jenkins_url: Some("https://build.automotivelinux.org"),
        aliases: &["automotive-grade-linux", "automotivelinux"],
    },
    Project {
        key: "akraino",
        name: "Akraino",
        full_name: "Akraino Edge Stack",
        jenkins_url: Some("https://jenkins.akraino.org"),
        aliases: &["akraino-edge-stack"],
    },
    Project {
        key: "anuket",
        name: "Anuket",
        full_name: "Anuket (Formerly OPNFV)",
        jenkins_url: None,
        aliases: &["opnfv", "anuket-opnfv"],
    },
    Project {
        key: "edgex",
        name: "EdgeX",
        full_name: "EdgeX Foundry",
        jenkins_url: Some("https://jenkins.edgexfoundry.org"),
        aliases: &["edgexfoundry", "edgex-foundry"],
    },
    Project {
        key: "fdio",
        name: "FD.io",
        full_name: "Fast Data Project",
        jenkins_url: Some("https://jenkins.fd.io"),
        aliases: &["fast-data"],
    },
    Project {
        key: "hyperledger",
        name: "HyperLedger",
        full_name: "Hyperledger",
        jenkins_url: None,
        aliases: &[],
    },
    Project {
        key: "lf-broadband",
        name: "LF Broadband",
        full_name: "Linux Foundation Broadband",
        jenkins_url: Some("https://jenkins.opencord.org"),
        aliases: &["opencord", "voltha"],
    },
    Project {
        key: "lf-edge",
        name: "LF Edge",
        full_name: "Linux Foundation Edge",
        jenkins_url: None,
        aliases: &["lfedge"],
    },
    Project {
        key: "odpi",
        name: "ODPi",
        full_name: "Open Data Platform Initiative",
        jenkins_url: None,
        aliases: &["open-data-platform"],
    },
    Project {
        key: "onap",
        name: "ONAP",
        full_name: "Open Network Automation Platform",
        jenkins_url: Some("https://jenkins.onap.org"),
        aliases: &["ecomp", "open-network-automation-platform"],
    },
    Project {
        key: "opendaylight",
        name: "OpenDaylight",
        full_name: "OpenDaylight Project",
        jenkins_url: Some("https://jenkins.opendaylight.org/releng"),
        aliases: &["odl", "opendaylight-project"],
    },
    Project {
        key: "o-ran-sc",
        name: "O-RAN",
        full_name: "O-RAN Software Community",
        jenkins_url: Some("https://jenkins.o-ran-sc.org"),
        aliases: &["oran", "o-ran", "oran-sc", "o-ran-software-community"],
    },
    Project {
        key: "zowe",
        name: "Zowe",
        full_name: "Zowe Open Mainframe Project",
        jenkins_url: None,
        aliases: &["open-mainframe", "openmainframe"],
    },
];

/// Lowercase with `-`, `_` and spaces removed, so "O-RAN SC" matches "oransc".
fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Find a project by key, name or alias, ignoring case and separators.
/// Falls back to a substring match when it identifies exactly one project.
pub fn find_project(query: &str) -> Option<&'static Project> {
    let query = normalize(query);
    if query.is_empty() {
        return None;
    }

    let exact = PROJECTS.iter().find(|p| {
        normalize(p.key) == query
            || normalize(p.name) == query
            || p.aliases.iter().any(|a| normalize(a) == query)
    });
    if exact.is_some() {
        return exact;
    }

    let mut partial = PROJECTS.iter().filter(|p| {
        normalize(p.key).contains(&query)
            || normalize(p.full_name).contains(&query)
            || p.aliases.iter().any(|a| normalize(a).contains(&query))
    });
    match (partial.next(), partial.next()) {
        (Some(project), None) => Some(project),
        _ => None,
    }
}

pub fn projects_with_jenkins() -> impl Iterator<Item = &'static Project> {
    PROJECTS.iter().filter(|p| p.has_jenkins())
}
