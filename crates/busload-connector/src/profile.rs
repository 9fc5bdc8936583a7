//! Connector profile files.
//!
//! A profile file is TOML holding one or more named profiles.  Each profile
//! lists the inputs and outputs that exist and the topic each is bound to:
//!
//! ```toml
//! [[profile]]
//! name = "MyProfile"
//!
//! [[profile.input]]
//! name = "MySubscriber::MyReader"
//! topic = "Square"
//! durability = "transient"
//!
//! [[profile.output]]
//! name = "MyPublisher::MyWriter"
//! topic = "Square"
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use busload_types::{BridgeError, EndpointRef};
use serde::{Deserialize, Serialize};

/// How many undelivered samples an input keeps between takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// Keep only the newest undelivered sample; older ones are dropped.
    Volatile,
    /// Keep every undelivered sample until taken.
    #[default]
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: EndpointRef,
    pub topic: String,
    #[serde(default)]
    pub durability: Durability,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: EndpointRef,
    pub topic: String,
}

/// One named set of endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default, rename = "input")]
    pub inputs: Vec<InputSpec>,
    #[serde(default, rename = "output")]
    pub outputs: Vec<OutputSpec>,
}

#[derive(Debug, Deserialize)]
struct ProfileFile {
    #[serde(default, rename = "profile")]
    profiles: Vec<Profile>,
}

/// Read `path` and return the profile called `name`.
pub fn load_profile(path: &Path, name: &str) -> Result<Profile, BridgeError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        BridgeError::Config(format!("failed to read profile file {}: {e}", path.display()))
    })?;
    parse_profile(&raw, name)
}

/// Parse profile-file text and return the profile called `name`.
pub fn parse_profile(raw: &str, name: &str) -> Result<Profile, BridgeError> {
    let file: ProfileFile = toml::from_str(raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse profile file: {e}")))?;

    let profile = file
        .profiles
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| BridgeError::Config(format!("profile '{name}' not found")))?;

    profile.validate()?;
    Ok(profile)
}

impl Profile {
    /// Reject profiles that name the same endpoint twice.
    fn validate(&self) -> Result<(), BridgeError> {
        let mut seen = HashSet::new();
        for name in self.inputs.iter().map(|i| &i.name) {
            if !seen.insert(name) {
                return Err(BridgeError::Config(format!(
                    "profile '{}' declares input '{name}' twice",
                    self.name
                )));
            }
        }
        seen.clear();
        for name in self.outputs.iter().map(|o| &o.name) {
            if !seen.insert(name) {
                return Err(BridgeError::Config(format!(
                    "profile '{}' declares output '{name}' twice",
                    self.name
                )));
            }
        }
        Ok(())
    }
}
