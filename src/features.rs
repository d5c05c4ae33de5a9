//! Feature authority
//!
//! Features are named capability modules (`servlet-4.0`, `ssl-1.0`). A feature
//! may include other features, may be superseded by a newer feature, and two
//! versions of the same feature family cannot be enabled at once.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};
use crate::server::RuntimeInfo;

/// Capability enabled by the `ssl` family of features
pub const SSL_CAPABILITY: &str = "ssl";
/// Capability enabled by the `appSecurity` family of features
pub const APP_SECURITY_CAPABILITY: &str = "appSecurity";
/// Capability enabled by the `ejbRemote` family of features
pub const EJB_REMOTE_CAPABILITY: &str = "ejbRemote";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDef {
    /// Canonical public name, e.g. `servlet-4.0`
    pub name: String,
    #[serde(default)]
    pub symbolic_name: Option<String>,
    #[serde(default)]
    pub superseded_by: Option<String>,
    /// Features pulled in when this one is enabled
    #[serde(default)]
    pub includes: Vec<String>,
}

impl FeatureDef {
    /// Family name without the version suffix (`servlet-4.0` -> `servlet`)
    pub fn family(&self) -> &str {
        family_of(&self.name)
    }

    pub fn symbolic(&self) -> String {
        self.symbolic_name
            .clone()
            .unwrap_or_else(|| format!("com.ibm.websphere.appserver.{}", self.name))
    }
}

pub fn family_of(name: &str) -> &str {
    name.rsplit_once('-')
        .filter(|(_, version)| version.starts_with(|c: char| c.is_ascii_digit()))
        .map_or(name, |(family, _)| family)
}

/// Two configured features whose dependency closures require incompatible
/// versions of the same family
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureConflict {
    /// Conflicting family
    pub family: String,
    /// Dependency chain from the first configured feature to its family member
    pub first: Vec<String>,
    /// Dependency chain from the second configured feature to its family member
    pub second: Vec<String>,
}

impl FeatureConflict {
    /// The configured feature at the head of the first chain
    pub fn first_root(&self) -> &str {
        self.first.first().map_or("", String::as_str)
    }

    pub fn second_root(&self) -> &str {
        self.second.first().map_or("", String::as_str)
    }

    pub fn involves(&self, feature: &str) -> bool {
        self.first_root().eq_ignore_ascii_case(feature) || self.second_root().eq_ignore_ascii_case(feature)
    }
}

pub trait FeatureAuthority {
    /// Canonical public name for a free-text token; `None` when unrecognized
    fn canonical_name(&self, token: &str) -> Option<String>;

    /// Feature that supersedes `name`, if it is superseded
    fn superseded_by(&self, name: &str) -> Option<String>;

    fn symbolic_name(&self, public_name: &str) -> Option<String>;

    fn public_name(&self, symbolic_name: &str) -> Option<String>;

    /// Every public feature name, for suggestions
    fn feature_names(&self) -> Vec<String>;

    /// Whether any enabled feature (directly, through inclusion, or through
    /// a superseding feature) provides `capability`
    fn enables(&self, enabled: &[String], capability: &str) -> bool;

    /// Unresolved pairwise conflicts for the enabled set
    fn conflicts(&self, enabled: &[String], runtime: Option<&RuntimeInfo>) -> Vec<FeatureConflict>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCatalog {
    pub features: Vec<FeatureDef>,
}

impl FeatureCatalog {
    pub fn builtin() -> Self {
        toml::from_str(BUILTIN_FEATURES).expect("built-in feature catalog is valid TOML")
    }

    pub fn load(path: &Path) -> CatalogResult<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            other => Err(CatalogError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    fn find(&self, name: &str) -> Option<&FeatureDef> {
        self.features
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Every feature reachable from `root`, with the shortest chain that reached it
    fn closure(&self, root: &str) -> BTreeMap<String, Vec<String>> {
        let mut reached: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let Some(start) = self.find(root) else {
            return reached;
        };
        let mut queue = VecDeque::from([(start.name.clone(), vec![start.name.clone()])]);
        while let Some((name, chain)) = queue.pop_front() {
            if reached.contains_key(&name) {
                continue;
            }
            if let Some(def) = self.find(&name) {
                for included in &def.includes {
                    if let Some(next) = self.find(included) {
                        let mut next_chain = chain.clone();
                        next_chain.push(next.name.clone());
                        queue.push_back((next.name.clone(), next_chain));
                    }
                }
            }
            reached.insert(name, chain);
        }
        reached
    }
}

impl FeatureAuthority for FeatureCatalog {
    fn canonical_name(&self, token: &str) -> Option<String> {
        self.find(token).map(|f| f.name.clone())
    }

    fn superseded_by(&self, name: &str) -> Option<String> {
        self.find(name).and_then(|f| f.superseded_by.clone())
    }

    fn symbolic_name(&self, public_name: &str) -> Option<String> {
        self.find(public_name).map(FeatureDef::symbolic)
    }

    fn public_name(&self, symbolic_name: &str) -> Option<String> {
        self.features
            .iter()
            .find(|f| f.symbolic().eq_ignore_ascii_case(symbolic_name))
            .map(|f| f.name.clone())
    }

    fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    fn enables(&self, enabled: &[String], capability: &str) -> bool {
        enabled.iter().any(|feature| {
            let mut roots = vec![feature.clone()];
            if let Some(replacement) = self.superseded_by(feature) {
                roots.push(replacement);
            }
            roots.iter().any(|root| {
                self.closure(root)
                    .keys()
                    .any(|name| family_of(name).eq_ignore_ascii_case(capability))
            })
        })
    }

    fn conflicts(&self, enabled: &[String], _runtime: Option<&RuntimeInfo>) -> Vec<FeatureConflict> {
        // family -> member -> chain from the first configured feature that reached it
        let mut families: HashMap<String, BTreeMap<String, Vec<String>>> = HashMap::new();
        let roots: BTreeSet<String> = enabled
            .iter()
            .filter_map(|token| self.canonical_name(token))
            .collect();

        for root in &roots {
            for (name, chain) in self.closure(root) {
                families
                    .entry(family_of(&name).to_string())
                    .or_default()
                    .entry(name)
                    .or_insert(chain);
            }
        }

        let mut conflicts = Vec::new();
        for (family, members) in families {
            let members: Vec<_> = members.into_iter().collect();
            for (i, (_, first)) in members.iter().enumerate() {
                for (_, second) in &members[i + 1..] {
                    if first.first() == second.first() {
                        continue;
                    }
                    conflicts.push(FeatureConflict {
                        family: family.clone(),
                        first: first.clone(),
                        second: second.clone(),
                    });
                }
            }
        }
        conflicts.sort();
        conflicts
    }
}

const BUILTIN_FEATURES: &str = r#"
features = [
    { name = "servlet-3.1" },
    { name = "servlet-4.0" },
    { name = "servlet-5.0" },
    { name = "jsp-2.3", includes = ["servlet-4.0"] },
    { name = "el-3.0" },
    { name = "jdbc-4.1" },
    { name = "jdbc-4.2" },
    { name = "jdbc-4.3" },
    { name = "jndi-1.0" },
    { name = "ssl-1.0" },
    { name = "transportSecurity-1.0", includes = ["ssl-1.0"] },
    { name = "appSecurity-1.0", superseded_by = "appSecurity-2.0" },
    { name = "appSecurity-2.0" },
    { name = "appSecurity-3.0", includes = ["appSecurity-2.0"] },
    { name = "ejbLite-3.2" },
    { name = "ejbRemote-3.2", includes = ["ejbLite-3.2"] },
    { name = "cdi-2.0" },
    { name = "jaxrs-2.1", includes = ["servlet-4.0"] },
    { name = "jsonp-1.1" },
    { name = "jsonb-1.0", includes = ["jsonp-1.1"] },
    { name = "localConnector-1.0" },
    { name = "restConnector-2.0", includes = ["ssl-1.0", "appSecurity-2.0", "jaxrs-2.1"] },
    { name = "adminCenter-1.0", includes = ["restConnector-2.0"] },
    { name = "mpHealth-2.2", includes = ["cdi-2.0", "jaxrs-2.1"] },
    { name = "mpMetrics-2.3", includes = ["cdi-2.0", "jaxrs-2.1"] },
    { name = "mpConfig-1.4", includes = ["cdi-2.0"] },
    { name = "webProfile-8.0", includes = [
        "servlet-4.0", "jsp-2.3", "el-3.0", "jdbc-4.2", "jndi-1.0", "appSecurity-3.0",
        "ssl-1.0", "cdi-2.0", "jaxrs-2.1", "jsonb-1.0", "jsonp-1.1",
    ] },
]
"#;
