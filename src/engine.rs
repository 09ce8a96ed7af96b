//! Supported store engines and their chart value mappings.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Per-store credentials handed to the chart.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub db_password: String,
    pub root_password: String,
    pub admin_password: String,
}

impl fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("db_password", &"[REDACTED]")
            .field("root_password", &"[REDACTED]")
            .field("admin_password", &"[REDACTED]")
            .finish()
    }
}

/// Application stack installed into a store namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    WooCommerce,
    Medusa,
}

impl Engine {
    pub fn slug(&self) -> &'static str {
        match self {
            Engine::WooCommerce => "woocommerce",
            Engine::Medusa => "medusa",
        }
    }

    /// Chart directory for this engine under `chart_root`.
    pub fn chart_path(&self, chart_root: &Path) -> PathBuf {
        chart_root.join(self.slug())
    }

    /// `--set` values for an install, in a stable order.
    pub fn chart_values(&self, host: &str, creds: &StoreCredentials) -> Vec<(String, String)> {
        let keys: [&str; 3] = match self {
            Engine::WooCommerce => [
                "mysql.auth.password",
                "mysql.auth.rootPassword",
                "wordpress.adminPassword",
            ],
            Engine::Medusa => [
                "postgresql.auth.password",
                "postgresql.auth.postgresPassword",
                "medusa.adminPassword",
            ],
        };

        vec![
            ("ingress.host".to_string(), host.to_string()),
            (keys[0].to_string(), creds.db_password.clone()),
            (keys[1].to_string(), creds.root_password.clone()),
            (keys[2].to_string(), creds.admin_password.clone()),
        ]
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "woocommerce" => Ok(Engine::WooCommerce),
            "medusa" => Ok(Engine::Medusa),
            other => Err(other.to_string()),
        }
    }
}
