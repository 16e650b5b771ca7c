//! Static table of proxied FortiFlex operations.

/// Prefix under which every operation is exposed.
pub const EDGE_PREFIX: &str = "/api/fortiflex";

/// HTTP method accepted at the gateway edge. Downstream is always POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeMethod {
    Post,
    Put,
}

/// Session value copied into the outbound body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionField {
    SerialNumber,
    AccountId,
}

impl SessionField {
    /// Key written into the outbound JSON body.
    pub fn body_key(self) -> &'static str {
        match self {
            Self::SerialNumber => "programSerialNumber",
            Self::AccountId => "accountId",
        }
    }

    /// Human-readable name used in error details.
    pub fn label(self) -> &'static str {
        match self {
            Self::SerialNumber => "Program serial number",
            Self::AccountId => "Account ID",
        }
    }
}

/// One proxied operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDescriptor {
    /// Operation name, also the edge path suffix.
    pub name: &'static str,
    pub edge_method: EdgeMethod,
    pub downstream_path: &'static str,
    /// Session fields injected into the outbound body. Non-empty means the
    /// inbound body is only a template.
    pub injects: &'static [SessionField],
    /// The operation does not change vendor state.
    pub read_only: bool,
    /// A successful response refreshes the session's config-type cache.
    pub derives_config_types: bool,
}

impl RouteDescriptor {
    pub fn edge_path(&self) -> String {
        format!("{}/{}", EDGE_PREFIX, self.name)
    }
}

const fn route(
    name: &'static str,
    edge_method: EdgeMethod,
    downstream_path: &'static str,
    read_only: bool,
) -> RouteDescriptor {
    RouteDescriptor {
        name,
        edge_method,
        downstream_path,
        injects: &[],
        read_only,
        derives_config_types: false,
    }
}

use EdgeMethod::{Post, Put};

pub static ROUTES: &[RouteDescriptor] = &[
    route("programs/list", Post, "/programs/list", true),
    route("programs/points", Post, "/programs/points", true),
    RouteDescriptor {
        name: "configs/list",
        edge_method: Post,
        downstream_path: "/configs/list",
        injects: &[SessionField::SerialNumber],
        read_only: true,
        derives_config_types: true,
    },
    route("configs/create", Post, "/configs/create", false),
    route("configs/update", Post, "/configs/update", false),
    route("configs/disable", Put, "/configs/disable", false),
    route("configs/enable", Put, "/configs/enable", false),
    RouteDescriptor {
        name: "entitlements/list-all",
        edge_method: Post,
        downstream_path: "/entitlements/list",
        injects: &[SessionField::SerialNumber, SessionField::AccountId],
        read_only: true,
        derives_config_types: false,
    },
    route("entitlements/vm/create", Post, "/entitlements/vm/create", false),
    route("entitlements/hardware/create", Post, "/entitlements/hardware/create", false),
    route("entitlements/cloud/create", Post, "/entitlements/cloud/create", false),
    route("entitlements/update", Post, "/entitlements/update", false),
    route("entitlements/stop", Put, "/entitlements/stop", false),
    route("entitlements/reactivate", Put, "/entitlements/reactivate", false),
    route("entitlements/vm/token", Post, "/entitlements/vm/token", false),
    route("entitlements/points", Post, "/entitlements/points", true),
    route("entitlements/transfer", Post, "/entitlements/transfer", false),
    route("groups/list", Post, "/groups/list", true),
    route("groups/nexttoken", Post, "/groups/nexttoken", true),
    route("tools/calc", Post, "/tools/licenses", true),
    route("tools/check-token", Post, "/tools/check-token", true),
];

/// Look up an operation by name.
pub fn find(name: &str) -> Option<&'static RouteDescriptor> {
    ROUTES.iter().find(|r| r.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_route_names_are_unique() {
        let names: HashSet<_> = ROUTES.iter().map(|r| r.name).collect();
        assert_eq!(names.len(), ROUTES.len());
        assert_eq!(ROUTES.len(), 21);
    }

    #[test]
    fn test_put_operations() {
        let mut put: Vec<_> = ROUTES
            .iter()
            .filter(|r| r.edge_method == EdgeMethod::Put)
            .map(|r| r.name)
            .collect();
        put.sort_unstable();
        assert_eq!(
            put,
            vec![
                "configs/disable",
                "configs/enable",
                "entitlements/reactivate",
                "entitlements/stop"
            ]
        );
    }

    #[test]
    fn test_renamed_downstream_paths() {
        assert_eq!(find("tools/calc").unwrap().downstream_path, "/tools/licenses");
        assert_eq!(
            find("entitlements/list-all").unwrap().downstream_path,
            "/entitlements/list"
        );
        assert!(find("entitlements/list").is_none());
    }

    #[test]
    fn test_injecting_routes() {
        let configs = find("configs/list").unwrap();
        assert_eq!(configs.injects, &[SessionField::SerialNumber]);
        assert!(configs.derives_config_types);
        assert_eq!(configs.edge_path(), "/api/fortiflex/configs/list");

        let entitlements = find("entitlements/list-all").unwrap();
        assert_eq!(
            entitlements.injects,
            &[SessionField::SerialNumber, SessionField::AccountId]
        );

        let injecting = ROUTES.iter().filter(|r| !r.injects.is_empty()).count();
        assert_eq!(injecting, 2);
        assert_eq!(ROUTES.iter().filter(|r| r.derives_config_types).count(), 1);
    }

    #[test]
    fn test_read_only_flags() {
        let read_only: HashSet<_> = ROUTES.iter().filter(|r| r.read_only).map(|r| r.name).collect();
        assert_eq!(read_only.len(), 9);
        assert!(read_only.contains("tools/check-token"));
        assert!(!read_only.contains("entitlements/vm/token"));
    }
}
