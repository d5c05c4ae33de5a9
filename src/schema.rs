//! Schema authority
//!
//! The engine never interprets XSD itself. It asks a [`SchemaAuthority`] for
//! element and attribute declarations and for literal validation against a
//! declared simple type. [`SchemaCatalog`] is a serde-loadable implementation
//! with a built-in catalog of common server configuration elements.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};

/// Generic "factory type id" data type; attributes of this type identify an instance
pub const FACTORY_ID_TYPE: &str = "factoryId";
pub const PASSWORD_TYPE: &str = "password";
pub const PASSWORD_HASH_TYPE: &str = "passwordHash";
pub const DURATION_TYPE: &str = "duration";
/// Reference to exactly one configuration instance
pub const PID_TYPE: &str = "pid";
/// Comma or space separated list of references
pub const PID_LIST_TYPE: &str = "pidList";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDecl {
    pub name: String,
    #[serde(rename = "type", default = "default_type")]
    pub data_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
    /// Element types an id reference may point at
    #[serde(default)]
    pub references: Vec<String>,
    /// Enumerated literals, compared case-insensitively
    #[serde(default)]
    pub values: Vec<String>,
}

fn default_type() -> String {
    "string".to_string()
}

impl AttributeDecl {
    pub fn is_factory_id(&self) -> bool {
        self.data_type == FACTORY_ID_TYPE
    }

    pub fn is_password(&self) -> bool {
        self.data_type == PASSWORD_TYPE || self.data_type == PASSWORD_HASH_TYPE
    }

    pub fn is_reference(&self) -> bool {
        self.data_type == PID_TYPE || self.data_type == PID_LIST_TYPE
    }

    pub fn is_singleton_reference(&self) -> bool {
        self.data_type == PID_TYPE
    }

    pub fn is_duration(&self) -> bool {
        self.data_type == DURATION_TYPE
    }

    /// Name of the nested element that expresses the same relationship
    /// as this reference attribute (`jdbcDriverRef` -> `jdbcDriver`)
    pub fn nested_element_name(&self) -> Option<&str> {
        self.name.strip_suffix("Ref")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDecl {
    pub name: String,
    /// Simple type of the text content; present only for atomic elements
    #[serde(default)]
    pub text_type: Option<String>,
    #[serde(default)]
    pub min_occurs: u32,
    /// `None` means unbounded
    #[serde(default)]
    pub max_occurs: Option<u32>,
    /// Whether attributes outside the declared set are tolerated
    #[serde(default)]
    pub extra_properties: bool,
    #[serde(default)]
    pub attributes: Vec<AttributeDecl>,
    /// Catalog keys of permitted child elements
    #[serde(default)]
    pub children: Vec<String>,
    /// Features that make this element available; empty means always available
    #[serde(default)]
    pub enabling_features: Vec<String>,
}

impl ElementDecl {
    pub fn is_atomic(&self) -> bool {
        self.text_type.is_some()
    }

    pub fn is_singleton(&self) -> bool {
        self.max_occurs == Some(1)
    }

    /// The attribute that identifies instances of this element, if any
    pub fn identity_attribute(&self) -> Option<&AttributeDecl> {
        self.attributes
            .iter()
            .find(|a| a.name == "id")
            .or_else(|| self.attributes.iter().find(|a| a.is_factory_id()))
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDecl> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Black-box access to the configuration schema
pub trait SchemaAuthority {
    /// Declaration of the document root element
    fn root_declaration(&self, name: &str) -> Option<&ElementDecl>;

    /// Declaration of `name` as a child of `parent`
    fn element_declaration(&self, parent: &ElementDecl, name: &str) -> Option<&ElementDecl>;

    fn attribute_declaration<'a>(
        &self,
        element: &'a ElementDecl,
        name: &str,
    ) -> Option<&'a AttributeDecl> {
        element.attribute(name)
    }

    /// Names of every element permitted under `parent`
    fn child_names(&self, parent: &ElementDecl) -> Vec<String>;

    /// Validate a literal against the attribute's simple type
    fn validate_literal(&self, attribute: &AttributeDecl, literal: &str) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    pub root: String,
    pub elements: BTreeMap<String, ElementDecl>,
}

impl SchemaCatalog {
    /// Catalog of commonly used server configuration elements
    pub fn builtin() -> Self {
        toml::from_str(BUILTIN_SCHEMA).expect("built-in schema catalog is valid TOML")
    }

    /// Load a catalog from a TOML or JSON file
    pub fn load(path: &Path) -> CatalogResult<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(CatalogError::UnsupportedFormat(ext.to_string())),
            None => Err(CatalogError::UnsupportedFormat(String::new())),
        }
    }

    fn children_of<'a, 'p>(
        &'a self,
        parent: &'p ElementDecl,
    ) -> impl Iterator<Item = &'a ElementDecl> + use<'a, 'p> {
        parent.children.iter().filter_map(|key| self.elements.get(key))
    }
}

impl SchemaAuthority for SchemaCatalog {
    fn root_declaration(&self, name: &str) -> Option<&ElementDecl> {
        self.elements.get(&self.root).filter(|decl| decl.name == name)
    }

    fn element_declaration(&self, parent: &ElementDecl, name: &str) -> Option<&ElementDecl> {
        self.children_of(parent).find(|decl| decl.name == name)
    }

    fn child_names(&self, parent: &ElementDecl) -> Vec<String> {
        self.children_of(parent).map(|decl| decl.name.clone()).collect()
    }

    fn validate_literal(&self, attribute: &AttributeDecl, literal: &str) -> Result<(), String> {
        if !attribute.values.is_empty() {
            return if attribute
                .values
                .iter()
                .any(|v| v.eq_ignore_ascii_case(literal))
            {
                Ok(())
            } else {
                Err(format!("expected one of {}", attribute.values.join(", ")))
            };
        }
        match attribute.data_type.as_str() {
            "boolean" => match literal.to_ascii_lowercase().as_str() {
                "true" | "false" => Ok(()),
                _ => Err("expected true or false".to_string()),
            },
            "int" => literal
                .trim()
                .parse::<i32>()
                .map(|_| ())
                .map_err(|_| "expected an integer".to_string()),
            "long" => literal
                .trim()
                .parse::<i64>()
                .map(|_| ())
                .map_err(|_| "expected a long integer".to_string()),
            "short" => literal
                .trim()
                .parse::<i16>()
                .map(|_| ())
                .map_err(|_| "expected a short integer".to_string()),
            _ => Ok(()),
        }
    }
}

const BUILTIN_SCHEMA: &str = r#"
root = "server"

[elements.server]
name = "server"
attributes = [{ name = "description" }]
children = [
    "featureManager", "include", "variable", "httpEndpoint", "keyStore", "ssl",
    "sslDefault", "application", "webApplication", "enterpriseApplication",
    "library", "dataSource", "jdbcDriver", "connectionManager", "basicRegistry",
    "quickStartSecurity", "logging", "applicationManager", "applicationMonitor",
    "executor", "httpSession", "webContainer", "authData", "jndiEntry",
]

[elements.featureManager]
name = "featureManager"
max_occurs = 1
attributes = [{ name = "onError", values = ["WARN", "FAIL", "IGNORE"] }]
children = ["feature"]

[elements.feature]
name = "feature"
text_type = "string"

[elements.include]
name = "include"
attributes = [
    { name = "location", type = "location", required = true },
    { name = "optional", type = "boolean", default = "false" },
    { name = "onConflict", values = ["MERGE", "REPLACE", "IGNORE"], default = "MERGE" },
]

[elements.variable]
name = "variable"
attributes = [
    { name = "name", required = true },
    { name = "value" },
    { name = "defaultValue" },
]

[elements.httpEndpoint]
name = "httpEndpoint"
attributes = [
    { name = "id", type = "factoryId" },
    { name = "host" },
    { name = "httpPort", type = "int" },
    { name = "httpsPort", type = "int" },
    { name = "enabled", type = "boolean" },
]

[elements.keyStore]
name = "keyStore"
attributes = [
    { name = "id", type = "factoryId" },
    { name = "location", type = "location" },
    { name = "password", type = "password", required = true },
    { name = "type" },
    { name = "pollingRate", type = "duration" },
]

[elements.ssl]
name = "ssl"
enabling_features = ["ssl-1.0", "transportSecurity-1.0"]
attributes = [
    { name = "id", type = "factoryId" },
    { name = "keyStoreRef", type = "pid", references = ["keyStore"] },
    { name = "trustStoreRef", type = "pid", references = ["keyStore"] },
    { name = "sslProtocol" },
]
children = ["keyStore"]

[elements.sslDefault]
name = "sslDefault"
max_occurs = 1
enabling_features = ["ssl-1.0", "transportSecurity-1.0"]
attributes = [{ name = "sslRef", type = "pid", references = ["ssl"] }]

[elements.application]
name = "application"
attributes = [
    { name = "id", type = "factoryId" },
    { name = "name" },
    { name = "location", type = "location", required = true },
    { name = "type" },
    { name = "context-root" },
    { name = "autoStart", type = "boolean" },
]
children = ["classloader"]

[elements.webApplication]
name = "webApplication"
attributes = [
    { name = "id", type = "factoryId" },
    { name = "name" },
    { name = "location", type = "location", required = true },
    { name = "context-root" },
    { name = "autoStart", type = "boolean" },
]
children = ["classloader"]

[elements.enterpriseApplication]
name = "enterpriseApplication"
attributes = [
    { name = "id", type = "factoryId" },
    { name = "name" },
    { name = "location", type = "location", required = true },
    { name = "autoStart", type = "boolean" },
]
children = ["classloader"]

[elements.classloader]
name = "classloader"
max_occurs = 1
attributes = [
    { name = "commonLibraryRef", type = "pidList", references = ["library"] },
    { name = "privateLibraryRef", type = "pidList", references = ["library"] },
    { name = "delegation", values = ["parentFirst", "parentLast"] },
]

[elements.library]
name = "library"
attributes = [
    { name = "id", type = "factoryId" },
    { name = "name" },
    { name = "apiTypeVisibility" },
]
children = ["fileset", "file", "folder"]

[elements.fileset]
name = "fileset"
attributes = [
    { name = "id", type = "factoryId" },
    { name = "dir", type = "location" },
    { name = "includes" },
    { name = "excludes" },
    { name = "scanInterval", type = "duration" },
]

[elements.file]
name = "file"
attributes = [{ name = "id", type = "factoryId" }, { name = "name", type = "location" }]

[elements.folder]
name = "folder"
attributes = [{ name = "id", type = "factoryId" }, { name = "dir", type = "location" }]

[elements.dataSource]
name = "dataSource"
enabling_features = ["jdbc-4.1", "jdbc-4.2", "jdbc-4.3"]
attributes = [
    { name = "id", type = "factoryId" },
    { name = "jndiName", required = true },
    { name = "jdbcDriverRef", type = "pid", references = ["jdbcDriver"] },
    { name = "connectionManagerRef", type = "pid", references = ["connectionManager"] },
    { name = "type" },
    { name = "transactional", type = "boolean" },
    { name = "queryTimeout", type = "duration" },
]
children = ["jdbcDriver", "connectionManager", "properties"]

[elements.jdbcDriver]
name = "jdbcDriver"
enabling_features = ["jdbc-4.1", "jdbc-4.2", "jdbc-4.3"]
attributes = [
    { name = "id", type = "factoryId" },
    { name = "libraryRef", type = "pid", references = ["library"] },
]
children = ["library"]

[elements.connectionManager]
name = "connectionManager"
attributes = [
    { name = "id", type = "factoryId" },
    { name = "maxPoolSize", type = "int" },
    { name = "minPoolSize", type = "int" },
    { name = "connectionTimeout", type = "duration" },
    { name = "agedTimeout", type = "duration" },
    { name = "maxIdleTime", type = "duration" },
]

[elements.properties]
name = "properties"
max_occurs = 1
extra_properties = true
attributes = [
    { name = "databaseName" },
    { name = "serverName" },
    { name = "portNumber", type = "int" },
    { name = "user" },
    { name = "password", type = "password" },
]

[elements.basicRegistry]
name = "basicRegistry"
enabling_features = ["appSecurity-2.0", "appSecurity-3.0"]
attributes = [{ name = "id", type = "factoryId" }, { name = "realm" }]
children = ["user", "group"]

[elements.user]
name = "user"
attributes = [
    { name = "name", required = true },
    { name = "password", type = "passwordHash", required = true },
]

[elements.group]
name = "group"
attributes = [{ name = "name", required = true }]
children = ["member"]

[elements.member]
name = "member"
attributes = [{ name = "name", required = true }]

[elements.quickStartSecurity]
name = "quickStartSecurity"
max_occurs = 1
enabling_features = ["appSecurity-2.0", "appSecurity-3.0"]
attributes = [{ name = "userName" }, { name = "userPassword", type = "password" }]

[elements.logging]
name = "logging"
max_occurs = 1
attributes = [
    { name = "traceSpecification" },
    { name = "maxFileSize", type = "int" },
    { name = "maxFiles", type = "int" },
    { name = "consoleLogLevel", values = ["INFO", "AUDIT", "WARNING", "ERROR", "OFF"] },
    { name = "logDirectory", type = "location" },
]

[elements.applicationManager]
name = "applicationManager"
max_occurs = 1
attributes = [
    { name = "autoExpand", type = "boolean" },
    { name = "startTimeout", type = "duration" },
    { name = "stopTimeout", type = "duration" },
]

[elements.applicationMonitor]
name = "applicationMonitor"
max_occurs = 1
attributes = [
    { name = "pollingRate", type = "duration" },
    { name = "dropins", type = "location" },
    { name = "dropinsEnabled", type = "boolean" },
    { name = "updateTrigger", values = ["polled", "mbean", "disabled"] },
]

[elements.executor]
name = "executor"
max_occurs = 1
attributes = [
    { name = "coreThreads", type = "int" },
    { name = "maxThreads", type = "int" },
    { name = "keepAlive", type = "duration" },
]

[elements.httpSession]
name = "httpSession"
max_occurs = 1
attributes = [{ name = "invalidationTimeout", type = "duration" }, { name = "cookieName" }]

[elements.webContainer]
name = "webContainer"
max_occurs = 1
extra_properties = true
attributes = [{ name = "deferServletLoad", type = "boolean" }]

[elements.authData]
name = "authData"
attributes = [
    { name = "id", type = "factoryId" },
    { name = "user" },
    { name = "password", type = "password" },
]

[elements.jndiEntry]
name = "jndiEntry"
enabling_features = ["jndi-1.0"]
attributes = [
    { name = "id", type = "factoryId" },
    { name = "jndiName", required = true },
    { name = "value" },
]
"#;
