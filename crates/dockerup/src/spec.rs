//! Data model — `ContainerSpec`, `Status`, fingerprints, canonical serialization.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Desired-state record for one container, as loaded from an inventory
/// source. Mirrors the JSON schema documented for the original `dockerup`
/// tool's `containers.d/*.json` files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSpec {
    pub image: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(rename = "portMappings")]
    pub port_mappings: Vec<PortMapping>,
    pub volumes: Vec<Volume>,
    pub env: BTreeMap<String, String>,
    pub links: BTreeMap<String, String>,
    pub network: Option<String>,
    pub privileged: bool,
    pub cpu: Option<i64>,
    pub memory: Option<i64>,
    pub entrypoint: Option<Vec<String>>,
    pub command: Option<Vec<String>>,
    pub restart: Option<String>,
    pub update: UpdatePolicy,
}

impl Default for ContainerSpec {
    fn default() -> Self {
        Self {
            image: String::new(),
            name: None,
            kind: None,
            port_mappings: Vec::new(),
            volumes: Vec::new(),
            env: BTreeMap::new(),
            links: BTreeMap::new(),
            network: None,
            privileged: false,
            cpu: None,
            memory: None,
            entrypoint: None,
            command: None,
            restart: None,
            update: UpdatePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdatePolicy {
    pub pull: Option<bool>,
    pub eager: bool,
    pub rolling: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<String>,
}

/// One entry of a container's `volumes` list. Exactly one of the three
/// JSON shapes from spec.md §3 is accepted per element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Volume {
    VolumesFrom {
        from: String,
    },
    Bind {
        #[serde(rename = "hostPath")]
        host_path: String,
        #[serde(rename = "containerPath")]
        container_path: String,
        #[serde(default)]
        mode: Option<Mode>,
    },
    Local {
        #[serde(rename = "containerPath")]
        container_path: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Ro,
    Rw,
}

impl ContainerSpec {
    /// Splits `image` into `(repository, tag)`, defaulting the tag to
    /// `latest` when absent.
    pub fn image_ref(&self) -> (&str, &str) {
        match self.image.split_once(':') {
            Some((repo, tag)) => (repo, tag),
            None => (self.image.as_str(), "latest"),
        }
    }

    /// Whether this spec targets the `docker` runtime. Any other (or
    /// absent-but-explicit) value means the spec is a silent no-op at
    /// launch time per spec.md §7.
    pub fn is_docker_type(&self) -> bool {
        matches!(self.kind.as_deref(), None | Some("docker"))
    }

    /// Cache key derived from image and name, per spec.md §3. `:` and `/`
    /// are replaced with `_` in the image portion.
    pub fn fingerprint(&self) -> String {
        let image_clean = self.image.replace([':', '/'], "_");
        match &self.name {
            Some(name) => format!("{image_clean}-{name}"),
            None => image_clean,
        }
    }

    /// Whether `name` is reserved (`local-*` prefix), per spec.md §3
    /// invariant and §9 open question (c): enforced at the driver
    /// boundary, not here.
    pub fn has_reserved_name(&self) -> bool {
        self.name
            .as_deref()
            .is_some_and(|n| n.starts_with("local-"))
    }

    /// Canonical byte-serialization used for cache equality checks
    /// (spec.md §9). `BTreeMap` fields above already guarantee sorted key
    /// order; `serde_json::to_string` over this struct produces a stable
    /// field order because struct fields serialize in declaration order.
    pub fn canonical(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Whether a pull of `image` is permitted for this spec, given the
    /// global `pull` setting.
    pub fn pull_allowed(&self, global_pull: bool) -> bool {
        if !global_pull {
            return false;
        }
        self.update.pull.unwrap_or(true)
    }
}

/// Actual-state projection for one spec, per spec.md §3.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub image: Option<String>,
    pub id: Option<String>,
    pub tag: Option<String>,
    pub running: bool,
}

impl Status {
    pub fn absent() -> Self {
        Self::default()
    }
}

/// The merged settings document (spec.md §4.B / §6).
#[derive(Debug, Clone)]
pub struct Inventory {
    pub containers: Vec<ContainerSpec>,
    pub settings: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_with_name_joins_image_and_name() {
        let spec = ContainerSpec {
            image: "ex/a:1".into(),
            name: Some("a".into()),
            ..Default::default()
        };
        assert_eq!(spec.fingerprint(), "ex_a_1-a");
    }

    #[test]
    fn fingerprint_without_name_is_just_the_image() {
        let spec = ContainerSpec {
            image: "ex/a:1".into(),
            ..Default::default()
        };
        assert_eq!(spec.fingerprint(), "ex_a_1");
    }

    #[test]
    fn image_ref_defaults_tag_to_latest() {
        let spec = ContainerSpec {
            image: "redis".into(),
            ..Default::default()
        };
        assert_eq!(spec.image_ref(), ("redis", "latest"));
    }

    #[test]
    fn image_ref_splits_explicit_tag() {
        let spec = ContainerSpec {
            image: "redis:7".into(),
            ..Default::default()
        };
        assert_eq!(spec.image_ref(), ("redis", "7"));
    }

    #[test]
    fn reserved_name_is_detected() {
        let spec = ContainerSpec {
            image: "redis".into(),
            name: Some("local-thing".into()),
            ..Default::default()
        };
        assert!(spec.has_reserved_name());
    }

    #[test]
    fn canonical_serialization_is_order_independent_for_maps() {
        let mut a = ContainerSpec {
            image: "redis".into(),
            ..Default::default()
        };
        a.env.insert("B".into(), "2".into());
        a.env.insert("A".into(), "1".into());

        let mut b = ContainerSpec {
            image: "redis".into(),
            ..Default::default()
        };
        b.env.insert("A".into(), "1".into());
        b.env.insert("B".into(), "2".into());

        assert_eq!(a.canonical().unwrap(), b.canonical().unwrap());
    }

    #[test]
    fn unknown_type_is_not_docker() {
        let spec = ContainerSpec {
            image: "redis".into(),
            kind: Some("rkt".into()),
            ..Default::default()
        };
        assert!(!spec.is_docker_type());
    }

    #[test]
    fn pull_allowed_respects_global_and_per_spec_flags() {
        let mut spec = ContainerSpec {
            image: "redis".into(),
            ..Default::default()
        };
        assert!(spec.pull_allowed(true));
        assert!(!spec.pull_allowed(false));

        spec.update.pull = Some(false);
        assert!(!spec.pull_allowed(true));
    }

    #[test]
    fn volume_shapes_round_trip() {
        let bind: Volume = serde_json::from_str(
            r#"{"hostPath":"/h","containerPath":"/c","mode":"ro"}"#,
        )
        .unwrap();
        assert!(matches!(bind, Volume::Bind { .. }));

        let local: Volume = serde_json::from_str(r#"{"containerPath":"/c"}"#).unwrap();
        assert!(matches!(local, Volume::Local { .. }));

        let from: Volume = serde_json::from_str(r#"{"from":"db"}"#).unwrap();
        assert!(matches!(from, Volume::VolumesFrom { .. }));
    }

    #[test]
    fn port_mappings_deserialize_from_camel_case() {
        let spec: ContainerSpec = serde_json::from_str(
            r#"{"image":"redis","portMappings":[{"containerPort":"8080","hostPort":"8080"}]}"#,
        )
        .unwrap();
        assert_eq!(spec.port_mappings.len(), 1);
        assert_eq!(spec.port_mappings[0].container_port, "8080");
        assert_eq!(spec.port_mappings[0].host_port.as_deref(), Some("8080"));
    }
}
