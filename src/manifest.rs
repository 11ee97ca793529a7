//! Manifest rendering.
//!
//! A manifest is the rendered artifact describing exactly what was deployed
//! for a release. The format is a stable, human-readable key/value text so
//! that manifests for equal inputs compare equal byte-for-byte.

use std::collections::BTreeMap;

use crate::types::{PackageIdentifier, StreamName};

/// Render the deployment manifest for a release.
///
/// Properties are emitted in sorted key order so rendering is
/// deterministic.
#[must_use]
pub fn render(
    stream: &StreamName,
    definition: &str,
    package: &PackageIdentifier,
    properties: &BTreeMap<String, String>,
) -> String {
    let mut out = String::new();
    out.push_str("apiVersion: flowplane/v1\n");
    out.push_str(&format!("stream: {stream}\n"));
    out.push_str(&format!("package: {package}\n"));
    out.push_str(&format!("definition: {definition}\n"));
    if properties.is_empty() {
        out.push_str("properties: {}\n");
    } else {
        out.push_str("properties:\n");
        for (key, value) in properties {
            out.push_str(&format!("  {key}: {value}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> StreamName {
        StreamName::new(s).unwrap()
    }

    #[test]
    fn renders_deterministically() {
        let mut properties = BTreeMap::new();
        properties.insert("deployer.memory".to_owned(), "512m".to_owned());
        properties.insert("app.log.level".to_owned(), "debug".to_owned());

        let package = PackageIdentifier::parse("ticktock:1.0.0");
        let first = render(&name("ticker"), "time | log", &package, &properties);
        let second = render(&name("ticker"), "time | log", &package, &properties);

        assert_eq!(first, second);
        assert!(first.contains("stream: ticker"));
        assert!(first.contains("package: ticktock:1.0.0"));
        // sorted key order
        let log_pos = first.find("app.log.level").unwrap();
        let mem_pos = first.find("deployer.memory").unwrap();
        assert!(log_pos < mem_pos);
    }

    #[test]
    fn empty_properties_render_as_empty_map() {
        let package = PackageIdentifier::parse("ticktock");
        let manifest = render(&name("ticker"), "time | log", &package, &BTreeMap::new());
        assert!(manifest.contains("properties: {}"));
    }
}
