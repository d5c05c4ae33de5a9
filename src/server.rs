//! The server that owns a configuration tree
//!
//! Variable resolution, dropin discovery, the secure-port check and the
//! published-module check all need to know which server a document belongs to.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::merge::{MergeNodeId, MergeTree};

pub const SERVER_XML: &str = "server.xml";
const DROPINS_DIR: &str = "configDropins";
const APPLICATION_ELEMENTS: [&str; 3] = ["application", "webApplication", "enterpriseApplication"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub version: String,
    #[serde(default)]
    pub install_dir: Option<PathBuf>,
}

/// An id that exists at runtime without being declared in any file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticId {
    pub element: String,
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropinKind {
    Defaults,
    Overrides,
}

impl DropinKind {
    fn directory(self) -> &'static str {
        match self {
            DropinKind::Defaults => "defaults",
            DropinKind::Overrides => "overrides",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    /// `${server.config.dir}`
    pub config_dir: PathBuf,
    /// `${wlp.user.dir}`
    pub user_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub host: String,
    /// Secure port the tooling talks to when the server is remote
    pub secure_port: Option<u16>,
    pub runtime: Option<RuntimeInfo>,
    pub synthetic_ids: Vec<SyntheticId>,
}

impl ServerInfo {
    /// Server whose `server.xml` lives directly in `config_dir`
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        let name = config_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "defaultServer".to_string());
        // <user dir>/servers/<name>
        let user_dir = config_dir
            .parent()
            .filter(|p| p.file_name().is_some_and(|n| n == "servers"))
            .and_then(Path::parent)
            .map(Path::to_path_buf);
        Self {
            name,
            config_dir,
            user_dir,
            output_dir: None,
            host: "localhost".to_string(),
            secure_port: None,
            runtime: None,
            synthetic_ids: Vec::new(),
        }
    }

    pub fn with_user_dir(mut self, user_dir: impl Into<PathBuf>) -> Self {
        self.user_dir = Some(user_dir.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>, secure_port: Option<u16>) -> Self {
        self.host = host.into();
        self.secure_port = secure_port;
        self
    }

    pub fn with_runtime(mut self, runtime: RuntimeInfo) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn server_xml(&self) -> PathBuf {
        self.config_dir.join(SERVER_XML)
    }

    /// Whether `path` is this server's root configuration file
    pub fn is_root_config(&self, path: &Path) -> bool {
        path == self.server_xml()
    }

    pub fn is_local(&self) -> bool {
        matches!(
            self.host.to_ascii_lowercase().as_str(),
            "localhost" | "127.0.0.1" | "::1" | "0:0:0:0:0:0:0:1"
        )
    }

    pub fn shared_config_dir(&self) -> Option<PathBuf> {
        self.user_dir.as_ref().map(|dir| dir.join("shared").join("config"))
    }

    pub fn dropins_dir(&self, kind: DropinKind) -> PathBuf {
        self.config_dir.join(DROPINS_DIR).join(kind.directory())
    }

    /// Configured synthetic ids plus the `global` library when the shared
    /// global library directory exists
    pub fn all_synthetic_ids(&self) -> Vec<SyntheticId> {
        let mut ids = self.synthetic_ids.clone();
        let global = self
            .user_dir
            .as_ref()
            .map(|dir| dir.join("shared").join("lib").join("global"));
        if global.is_some_and(|dir| dir.is_dir())
            && !ids.iter().any(|s| s.element == "library" && s.id == "global")
        {
            ids.push(SyntheticId {
                element: "library".to_string(),
                id: "global".to_string(),
            });
        }
        ids
    }

    /// Location variables the runtime defines for this server
    pub fn location_variables(&self) -> Vec<(String, String)> {
        let display = |p: &Path| p.to_string_lossy().into_owned();
        let mut vars = vec![
            ("server.config.dir".to_string(), display(&self.config_dir)),
            ("wlp.server.name".to_string(), self.name.clone()),
            (
                "server.output.dir".to_string(),
                display(self.output_dir.as_deref().unwrap_or(&self.config_dir)),
            ),
        ];
        if let Some(user_dir) = &self.user_dir {
            vars.push(("wlp.user.dir".to_string(), display(user_dir)));
            vars.push(("usr.extension.dir".to_string(), display(&user_dir.join("extension"))));
            vars.push(("shared.app.dir".to_string(), display(&user_dir.join("shared").join("apps"))));
            vars.push(("shared.config.dir".to_string(), display(&user_dir.join("shared").join("config"))));
            vars.push((
                "shared.resource.dir".to_string(),
                display(&user_dir.join("shared").join("resources")),
            ));
        }
        if let Some(install_dir) = self.runtime.as_ref().and_then(|r| r.install_dir.as_ref()) {
            vars.push(("wlp.install.dir".to_string(), display(install_dir)));
        }
        vars
    }
}

/// Server settings applied to every configuration found by discovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerDefaults {
    pub user_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub secure_port: Option<u16>,
    pub runtime: Option<RuntimeInfo>,
}

impl ServerDefaults {
    /// Server owning the configuration directory `config_dir`
    pub fn server_for(&self, config_dir: &Path) -> ServerInfo {
        let mut server = ServerInfo::new(config_dir);
        if let Some(user_dir) = &self.user_dir {
            server.user_dir = Some(user_dir.clone());
        }
        if let Some(host) = &self.host {
            server.host = host.clone();
        }
        server.secure_port = self.secure_port;
        server.runtime = self.runtime.clone();
        server
    }
}

/// A module deployed to the server by the tooling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedModule {
    pub name: String,
    /// Modules managed outside the tooling are never reported
    #[serde(default)]
    pub external: bool,
    /// Shared library ids the module's deployment descriptor asks for
    #[serde(default)]
    pub shared_libraries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSyncIssue {
    MissingApplication {
        module: String,
    },
    SharedLibRefMismatch {
        module: String,
        application: MergeNodeId,
        missing: Vec<String>,
    },
}

impl ModuleSyncIssue {
    pub fn module(&self) -> &str {
        match self {
            ModuleSyncIssue::MissingApplication { module }
            | ModuleSyncIssue::SharedLibRefMismatch { module, .. } => module,
        }
    }
}

/// Server-side knowledge about deployed modules
pub trait ServerBehaviour {
    fn published_modules(&self) -> &[PublishedModule];

    fn sync_issue(&self, module: &PublishedModule, config: &MergeTree) -> Option<ModuleSyncIssue> {
        module_sync_issue(module, config)
    }

    /// Out-of-sync issues for every non-external module
    fn out_of_sync(&self, config: &MergeTree) -> Vec<ModuleSyncIssue> {
        self.published_modules()
            .iter()
            .filter(|module| !module.external)
            .filter_map(|module| self.sync_issue(module, config))
            .collect()
    }
}

/// Fixed list of published modules
#[derive(Debug, Clone, Default)]
pub struct DeployedModules {
    modules: Vec<PublishedModule>,
}

impl DeployedModules {
    pub fn new(modules: Vec<PublishedModule>) -> Self {
        Self { modules }
    }
}

impl ServerBehaviour for DeployedModules {
    fn published_modules(&self) -> &[PublishedModule] {
        &self.modules
    }
}

fn module_sync_issue(module: &PublishedModule, config: &MergeTree) -> Option<ModuleSyncIssue> {
    let application = config.children(config.root()).find(|&id| {
        let node = config.node(id);
        APPLICATION_ELEMENTS.contains(&node.name.as_str()) && declares_module(config, id, &module.name)
    });

    let Some(application) = application else {
        return Some(ModuleSyncIssue::MissingApplication {
            module: module.name.clone(),
        });
    };
    if module.shared_libraries.is_empty() {
        return None;
    }

    let referenced: Vec<&str> = config
        .children_named(application, "classloader")
        .flat_map(|loader| {
            let node = config.node(loader);
            ["commonLibraryRef", "privateLibraryRef"]
                .into_iter()
                .filter_map(move |attr| node.attribute_value(attr))
        })
        .flat_map(|value| value.split([',', ' ']).filter(|t| !t.is_empty()))
        .collect();
    let missing: Vec<String> = module
        .shared_libraries
        .iter()
        .filter(|lib| !referenced.contains(&lib.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() {
        None
    } else {
        Some(ModuleSyncIssue::SharedLibRefMismatch {
            module: module.name.clone(),
            application,
            missing,
        })
    }
}

fn declares_module(config: &MergeTree, application: MergeNodeId, module: &str) -> bool {
    let node = config.node(application);
    if node.attribute_value("name") == Some(module) || node.attribute_value("id") == Some(module) {
        return true;
    }
    node.attribute_value("location")
        .map(Path::new)
        .and_then(Path::file_stem)
        .is_some_and(|stem| stem == module)
}
