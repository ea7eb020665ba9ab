//! `bazel config --output=json --dump_all` parsing and diffing
//!
//! The per-configuration detail map explains what actually differs when a
//! target shows up under a new configuration checksum.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use targetscope_core::Configuration;

/// One entry of the configuration dump. There are further fields in the
/// output that we don't represent; these are the ones consulted when
/// explaining a changed configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationDump {
    #[serde(rename = "ConfigHash")]
    pub config_hash: String,

    #[serde(rename = "Fragments", default)]
    pub fragments: Value,

    #[serde(rename = "FragmentOptions", default)]
    pub fragment_options: Value,
}

#[derive(Debug, Error)]
pub enum ConfigurationDumpError {
    #[error("failed to parse configuration dump: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
    },

    #[error("saw duplicate configuration for {0:?}")]
    Duplicate(String),
}

/// Parse the JSON array printed by `bazel config --output=json --dump_all`
/// and index it by configuration checksum.
pub fn parse_configuration_dump(
    bytes: &[u8],
) -> Result<HashMap<Configuration, ConfigurationDump>, ConfigurationDumpError> {
    let dumps: Vec<ConfigurationDump> =
        serde_json::from_slice(bytes).map_err(|source| ConfigurationDumpError::Parse { source })?;
    let mut by_checksum = HashMap::with_capacity(dumps.len());
    for dump in dumps {
        let configuration = Configuration::normalize(&dump.config_hash);
        if by_checksum.insert(configuration.clone(), dump).is_some() {
            return Err(ConfigurationDumpError::Duplicate(configuration.checksum().to_owned()));
        }
    }
    Ok(by_checksum)
}

/// Produce a JSON-Patch-style description of what changed between two
/// configuration dumps. Returns a serialised array of add/remove/replace
/// operations; an empty array means the dumps are identical apart from
/// their hashes.
pub fn diff_configurations(
    before: &ConfigurationDump,
    after: &ConfigurationDump,
) -> Result<String, ConfigurationDumpError> {
    let before_value =
        serde_json::to_value(before).map_err(|source| ConfigurationDumpError::Parse { source })?;
    let after_value =
        serde_json::to_value(after).map_err(|source| ConfigurationDumpError::Parse { source })?;
    let mut operations = Vec::new();
    diff_values("", &before_value, &after_value, &mut operations);
    // The hashes always differ between two distinct configurations; they are
    // the question, not the answer.
    operations.retain(|op| op["path"] != "/ConfigHash");
    serde_json::to_string(&operations).map_err(|source| ConfigurationDumpError::Parse { source })
}

fn diff_values(path: &str, before: &Value, after: &Value, operations: &mut Vec<Value>) {
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            let keys: BTreeSet<&String> = b.keys().chain(a.keys()).collect();
            for key in keys {
                let child_path = format!("{path}/{}", escape_pointer_token(key));
                match (b.get(key), a.get(key)) {
                    (Some(bv), Some(av)) => diff_values(&child_path, bv, av, operations),
                    (Some(_), None) => operations.push(json!({"op": "remove", "path": child_path})),
                    (None, Some(av)) => {
                        operations.push(json!({"op": "add", "path": child_path, "value": av}))
                    }
                    (None, None) => unreachable!("key came from one of the maps"),
                }
            }
        }
        (Value::Array(b), Value::Array(a)) => {
            for (index, (bv, av)) in b.iter().zip(a.iter()).enumerate() {
                diff_values(&format!("{path}/{index}"), bv, av, operations);
            }
            for (index, av) in a.iter().enumerate().skip(b.len()) {
                operations.push(json!({"op": "add", "path": format!("{path}/{index}"), "value": av}));
            }
            for index in a.len()..b.len() {
                operations.push(json!({"op": "remove", "path": format!("{path}/{index}")}));
            }
        }
        (b, a) => {
            if b != a {
                operations.push(json!({"op": "replace", "path": path, "value": a}));
            }
        }
    }
}

// JSON pointer escaping: `~` becomes `~0`, `/` becomes `~1`.
fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}
