//! Service descriptors: how a bundle lists its implementations of a capability.
//!
//! A descriptor lives at `META-INF/services/<capability>` and holds
//! implementation type names, one or more per line. Everything after `#` on a
//! line is a comment; blank lines are skipped.

use tracing::debug;

use crate::domain::{ResourceLookup, is_valid_type_name, push_distinct};
use crate::error::DeployError;

/// Directory holding service descriptors inside a bundle.
pub const SERVICE_DESCRIPTOR_DIR: &str = "META-INF/services/";

/// Resource path of the descriptor for `capability`.
pub fn descriptor_path(capability: &str) -> String {
    format!("{SERVICE_DESCRIPTOR_DIR}{capability}")
}

/// Implementation names listed for `capability`, in discovery order.
///
/// A missing descriptor yields an empty list. Identical descriptors reachable
/// through several domains are read once, and a name listed twice is returned
/// once.
pub fn discover(lookup: &dyn ResourceLookup, capability: &str) -> Result<Vec<String>, DeployError> {
    let path = descriptor_path(capability);
    let mut resources = Vec::new();
    for resource in lookup.find_resources(&path)? {
        push_distinct(&mut resources, resource);
    }

    let mut names: Vec<String> = Vec::new();
    for resource in &resources {
        let text = std::str::from_utf8(&resource.bytes).map_err(|e| DeployError::Descriptor {
            resource: resource.location(),
            reason: format!("not valid UTF-8: {e}"),
        })?;
        for name in parse(text).map_err(|reason| DeployError::Descriptor {
            resource: resource.location(),
            reason,
        })? {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }

    debug!(capability = %capability, found = names.len(), "Discovered implementations");
    Ok(names)
}

/// Names in a descriptor body; errors carry the offending line.
pub fn parse(text: &str) -> Result<Vec<&str>, String> {
    let mut names = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        };
        for token in line.split([' ', '\t', ',']).filter(|t| !t.is_empty()) {
            if !is_valid_type_name(token) {
                return Err(format!(
                    "line {}: illegal implementation name `{token}`",
                    index + 1
                ));
            }
            names.push(token);
        }
    }
    Ok(names)
}
