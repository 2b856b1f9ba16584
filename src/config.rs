//! Request options and the engine preference set derived from them.
//!
//! Options can be built in code or loaded from YAML:
//!
//! ```rust
//! use tracewire::Options;
//!
//! let options = Options::from_yaml_str(
//!     r#"
//! descriptive_values: true
//! tls:
//!   desegment_records: true
//!   keys:
//!     - address: 10.0.0.5
//!       port: 443
//!       protocol: http
//!       key_file: /keys/server.pem
//! "#,
//! )
//! .unwrap();
//!
//! let prefs = options.preferences();
//! assert_eq!(prefs.get("tls.keys_list"), Some("10.0.0.5,443,http,/keys/server.pem,"));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::{DissectError, Result};

/// Environment variable that turns on debug echo by default.
pub const DEBUG_ENV: &str = "DEBUG";

/// Options recognized by every capture and offline request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Render each dissected tree to the trace output.
    pub debug: bool,
    /// Replace raw field values with their human-readable labels.
    pub descriptive_values: bool,
    /// Skip frames the engine fails on instead of aborting.
    pub ignore_errors: bool,
    pub tls: TlsConf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            debug: std::env::var(DEBUG_ENV).is_ok_and(|v| v == "true"),
            descriptive_values: false,
            ignore_errors: false,
            tls: TlsConf::default(),
        }
    }
}

/// TLS decryption and reassembly settings passed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConf {
    pub desegment_records: bool,
    pub desegment_application_data: bool,
    pub keys: Vec<TlsKey>,
}

/// One RSA key entry, in the engine's `ip,port,protocol,keyfile,password` order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsKey {
    pub address: String,
    pub port: u16,
    pub protocol: String,
    pub key_file: String,
    pub password: String,
}

impl TlsKey {
    fn render(&self) -> String {
        let port = if self.port == 0 { String::new() } else { self.port.to_string() };
        [self.address.as_str(), port.as_str(), &self.protocol, &self.key_file, &self.password]
            .join(",")
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_descriptive_values(mut self, descriptive: bool) -> Self {
        self.descriptive_values = descriptive;
        self
    }

    pub fn with_ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = ignore;
        self
    }

    pub fn with_tls(mut self, tls: TlsConf) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_tls_key(mut self, key: TlsKey) -> Self {
        self.tls.keys.push(key);
        self
    }

    /// Parse options from YAML. Missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let options: Options = serde_yaml_ng::from_str(yaml)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DissectError::file_error(path.to_path_buf(), e))?;
        Self::from_yaml_str(&text)
    }

    /// Reject key entries the engine's list syntax cannot carry.
    pub fn validate(&self) -> Result<()> {
        for (i, key) in self.tls.keys.iter().enumerate() {
            if key.key_file.is_empty() {
                return Err(DissectError::configuration(format!("tls key {} has no key_file", i)));
            }
            let fields = [&key.address, &key.protocol, &key.key_file, &key.password];
            if fields.iter().any(|f| f.contains([',', ';'])) {
                return Err(DissectError::configuration(format!(
                    "tls key {} contains ',' or ';' in a field",
                    i
                )));
            }
        }
        Ok(())
    }

    /// Engine preferences implied by these options.
    pub fn preferences(&self) -> Preferences {
        let mut prefs = Preferences::default();
        if self.tls.desegment_records {
            prefs.set("tls.desegment_ssl_records", "TRUE");
        }
        if self.tls.desegment_application_data {
            prefs.set("tls.desegment_ssl_application_data", "TRUE");
        }
        if !self.tls.keys.is_empty() {
            let list: Vec<String> = self.tls.keys.iter().map(TlsKey::render).collect();
            prefs.set("tls.keys_list", list.join(";"));
        }
        prefs
    }
}

/// Name/value preference pairs handed to the engine when a session starts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Preferences(BTreeMap<String, String>);

impl Preferences {
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
