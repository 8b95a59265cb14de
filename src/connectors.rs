//! Built-in source definitions embedded in the binary
//!
//! Lets users write `--source shopify` instead of a path to a YAML file.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Built-in source YAML definitions
pub static BUILTIN_SOURCES: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    m.insert("shopify", include_str!("../connectors/shopify.yaml"));
    m.insert("shiphero", include_str!("../connectors/shiphero.yaml"));
    m
});

/// Get a built-in source by name
pub fn get_builtin(name: &str) -> Option<&'static str> {
    BUILTIN_SOURCES.get(name).copied()
}

/// Check if a name refers to a built-in source
pub fn is_builtin(name: &str) -> bool {
    BUILTIN_SOURCES.contains_key(name)
}

/// List built-in source names
pub fn list_builtin() -> Vec<&'static str> {
    let mut names: Vec<_> = BUILTIN_SOURCES.keys().copied().collect();
    names.sort_unstable();
    names
}

/// Secret expected in the secrets file
#[derive(Debug, Clone)]
pub struct SecretField {
    pub name: &'static str,
    pub required: bool,
    pub description: &'static str,
}

/// Display metadata for a built-in source
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub budget: &'static str,
    pub secrets: &'static [SecretField],
}

/// Detailed info about the built-in sources
pub fn list_builtin_info() -> Vec<SourceInfo> {
    vec![
        SourceInfo {
            name: "shiphero",
            description: "ShipHero products, orders, shipments and inventory changes",
            budget: "4004 credits, 60/s restore, complexity per query",
            secrets: &[
                SecretField {
                    name: "refresh_token",
                    required: true,
                    description: "Long-lived refresh token from the ShipHero developer settings",
                },
                SecretField {
                    name: "access_token",
                    required: false,
                    description: "Current access token; refreshed up front when it or its expiry is absent",
                },
                SecretField {
                    name: "access_token_expires_at",
                    required: false,
                    description: "Expiry of access_token (RFC 3339)",
                },
            ],
        },
        SourceInfo {
            name: "shopify",
            description: "Shopify orders, products, customers and inventory levels",
            budget: "1000 points, 50/s restore, cost per query",
            secrets: &[
                SecretField {
                    name: "shop_domain",
                    required: true,
                    description: "Shop domain, e.g. acme.myshopify.com",
                },
                SecretField {
                    name: "access_token",
                    required: true,
                    description: "Admin API access token (shpat_...)",
                },
            ],
        },
    ]
}
