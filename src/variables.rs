//! Variable authority
//!
//! Variables come from several layers. From lowest to highest precedence:
//! `defaultValue` declarations, runtime variables, user-directory variables,
//! custom provider contributions, and explicit `<variable value=...>`
//! declarations in the configuration. Values reference variables with
//! `${name}` and may use simple integer expressions such as `${a+b}`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::document::ConfigDocument;
use crate::server::ServerInfo;

/// Variables the runtime always defines
pub const PREDEFINED: [&str; 9] = [
    "wlp.install.dir",
    "wlp.user.dir",
    "usr.extension.dir",
    "shared.app.dir",
    "shared.config.dir",
    "shared.resource.dir",
    "server.config.dir",
    "server.output.dir",
    "wlp.server.name",
];

const PREDEFINED_PREFIXES: [&str; 2] = ["env.", "com.ibm.ws.logging."];

/// Nesting limit for variables defined in terms of other variables
const MAX_DEPTH: usize = 16;

pub fn is_predefined(name: &str) -> bool {
    PREDEFINED.contains(&name) || PREDEFINED_PREFIXES.iter().any(|p| name.starts_with(p))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum VariableLayer {
    DocumentDefault,
    Runtime,
    UserDirectory,
    Custom,
    Document,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableEntry {
    pub value: String,
    pub layer: VariableLayer,
}

/// Source of extra variables for a server, such as a build plugin's
/// generated properties
pub trait VariableProvider: Send + Sync {
    fn variables(&self, server: &ServerInfo) -> Vec<(String, String)>;
}

pub trait VariableAuthority {
    fn lookup(&self, name: &str) -> Option<&str>;

    fn names(&self) -> Vec<String>;

    fn is_predefined(&self, name: &str) -> bool {
        is_predefined(name)
    }

    /// Names whose current value fits `expected_type`
    fn names_for_type(&self, expected_type: Option<&str>) -> Vec<String> {
        self.names()
            .into_iter()
            .filter(|name| {
                self.lookup(name)
                    .is_some_and(|value| value.contains("${") || value_fits(expected_type, value))
            })
            .collect()
    }
}

/// Whether a literal is acceptable for a simple type
pub fn value_fits(expected_type: Option<&str>, value: &str) -> bool {
    let value = value.trim();
    match expected_type {
        Some("int") => value.parse::<i32>().is_ok(),
        Some("long") => value.parse::<i64>().is_ok(),
        Some("short") => value.parse::<i16>().is_ok(),
        Some("boolean") => value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false"),
        _ => true,
    }
}

/// Layered variable table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableSet {
    entries: BTreeMap<String, VariableEntry>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runtime layer seeded with the server's location variables, then user
    /// directory variables, then each provider's contributions
    pub fn for_server(
        server: &ServerInfo,
        runtime: &[(String, String)],
        user_dir: &[(String, String)],
        providers: &[Arc<dyn VariableProvider>],
    ) -> Self {
        let mut set = Self::new();
        for (name, value) in server.location_variables().iter().chain(runtime) {
            set.insert(name, value, VariableLayer::Runtime);
        }
        for (name, value) in user_dir {
            set.insert(name, value, VariableLayer::UserDirectory);
        }
        for provider in providers {
            for (name, value) in provider.variables(server) {
                set.insert(&name, &value, VariableLayer::Custom);
            }
        }
        set
    }

    /// Insert unless a higher layer already defines `name`; within one layer
    /// the later declaration wins
    pub fn insert(&mut self, name: &str, value: &str, layer: VariableLayer) {
        if self.entries.get(name).is_some_and(|existing| existing.layer > layer) {
            return;
        }
        self.entries.insert(
            name.to_string(),
            VariableEntry {
                value: value.to_string(),
                layer,
            },
        );
    }

    /// Add the `<variable>` declarations found directly under the root of `document`
    pub fn add_document_variables(&mut self, document: &ConfigDocument) {
        for id in document.children_named(document.root(), "variable") {
            let element = document.element(id);
            let Some(name) = element.attribute_value("name") else {
                continue;
            };
            if let Some(value) = element.attribute_value("value") {
                self.insert(name, value, VariableLayer::Document);
            } else if let Some(default) = element.attribute_value("defaultValue") {
                self.insert(name, default, VariableLayer::DocumentDefault);
            }
        }
    }

    pub fn entry(&self, name: &str) -> Option<&VariableEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolve(&self, value: &str, expected_type: Option<&str>) -> ResolvedValueInfo {
        resolve(self, value, expected_type)
    }
}

impl VariableAuthority for VariableSet {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|e| e.value.as_str())
    }

    fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// Element-local variables layered over a base authority for the resolution
/// of a single attribute
pub struct VariableOverlay<'a> {
    base: &'a dyn VariableAuthority,
    local: BTreeMap<String, String>,
}

impl<'a> VariableOverlay<'a> {
    pub fn new(base: &'a dyn VariableAuthority) -> Self {
        Self {
            base,
            local: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.local.insert(name.into(), value.into());
        self
    }
}

impl VariableAuthority for VariableOverlay<'_> {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.local
            .get(name)
            .map(String::as_str)
            .or_else(|| self.base.lookup(name))
    }

    fn names(&self) -> Vec<String> {
        let mut names = self.base.names();
        names.extend(self.local.keys().filter(|k| self.base.lookup(k).is_none()).cloned());
        names
    }

    fn is_predefined(&self, name: &str) -> bool {
        self.base.is_predefined(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndefinedReference {
    pub name: String,
    /// Character offset of the name within the attribute value
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperandSide {
    Left,
    Right,
}

impl fmt::Display for OperandSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperandSide::Left => "left",
            OperandSide::Right => "right",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperandErrorKind {
    Missing,
    Undefined,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperandError {
    pub side: OperandSide,
    pub kind: OperandErrorKind,
    pub operand: String,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeMismatch {
    pub variable: String,
    pub expected: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ResolvedValueInfo {
    pub resolved: String,
    pub fully_resolved: bool,
    pub has_references: bool,
    pub undefined: Vec<UndefinedReference>,
    pub operand_errors: Vec<OperandError>,
    pub type_mismatch: Option<TypeMismatch>,
}

#[derive(Default)]
struct Findings {
    undefined: Vec<UndefinedReference>,
    operand_errors: Vec<OperandError>,
}

struct Token<'v> {
    start: usize,
    end: usize,
    body: &'v str,
    body_start: usize,
}

fn tokens(value: &str) -> Vec<Token<'_>> {
    let mut found = Vec::new();
    let mut cursor = 0;
    while let Some(rel) = value[cursor..].find("${") {
        let start = cursor + rel;
        let body_start = start + 2;
        let Some(close) = value[body_start..].find('}') else {
            break;
        };
        let end = body_start + close + 1;
        found.push(Token {
            start,
            end,
            body: &value[body_start..end - 1],
            body_start,
        });
        cursor = end;
    }
    found
}

fn char_offset(value: &str, byte: usize) -> usize {
    value[..byte].chars().count()
}

fn leading_ws(s: &str) -> usize {
    s.len() - s.trim_start().len()
}

/// Resolve every `${...}` reference in `value`
pub fn resolve(
    authority: &dyn VariableAuthority,
    value: &str,
    expected_type: Option<&str>,
) -> ResolvedValueInfo {
    let resolver = Resolver { authority };
    let mut findings = Findings::default();
    let (mut resolved, complete) = resolver.expand(value, 0, Some(&mut findings));
    let has_references = !tokens(value).is_empty();

    let mut type_mismatch = None;
    if complete && has_references {
        let single = tokens(value);
        if let [token] = single.as_slice()
            && token.start == 0
            && token.end == value.len()
            && let Some(expected) = expected_type
            && !value_fits(Some(expected), &resolved)
        {
            type_mismatch = Some(TypeMismatch {
                variable: token.body.trim().to_string(),
                expected: expected.to_string(),
                value: resolved.clone(),
            });
        }
    }
    if complete {
        match expected_type {
            Some("boolean") => resolved = resolved.to_ascii_lowercase(),
            Some("int" | "long" | "short") => resolved = resolved.trim().to_string(),
            _ => {}
        }
    }

    ResolvedValueInfo {
        resolved,
        fully_resolved: complete,
        has_references,
        undefined: findings.undefined,
        operand_errors: findings.operand_errors,
        type_mismatch,
    }
}

struct Resolver<'a> {
    authority: &'a dyn VariableAuthority,
}

enum Body<'v> {
    Plain(&'v str),
    Expression { operator: usize },
}

impl Resolver<'_> {
    /// Expand `value`; findings are only recorded for the outermost value
    fn expand(&self, value: &str, depth: usize, mut report: Option<&mut Findings>) -> (String, bool) {
        if depth > MAX_DEPTH {
            return (value.to_string(), false);
        }
        let mut out = String::with_capacity(value.len());
        let mut complete = true;
        let mut copied_to = 0;

        for token in tokens(value) {
            out.push_str(&value[copied_to..token.start]);
            copied_to = token.end;
            let literal = &value[token.start..token.end];

            match self.classify(token.body) {
                Body::Plain(name) if name.is_empty() => {
                    out.push_str(literal);
                    complete = false;
                }
                Body::Plain(name) => match self.authority.lookup(name) {
                    Some(defined) => {
                        let (text, nested_complete) = self.expand(defined, depth + 1, None);
                        out.push_str(&text);
                        complete &= nested_complete;
                    }
                    None => {
                        out.push_str(literal);
                        complete = false;
                        if !self.authority.is_predefined(name)
                            && let Some(findings) = report.as_deref_mut()
                        {
                            findings.undefined.push(UndefinedReference {
                                name: name.to_string(),
                                offset: char_offset(
                                    value,
                                    token.body_start + leading_ws(token.body),
                                ),
                            });
                        }
                    }
                },
                Body::Expression { operator } => {
                    match self.evaluate(value, &token, operator, depth, report.as_deref_mut()) {
                        Some(result) => out.push_str(&result.to_string()),
                        None => {
                            out.push_str(literal);
                            complete = false;
                        }
                    }
                }
            }
        }
        out.push_str(&value[copied_to..]);
        (out, complete)
    }

    fn classify<'v>(&self, body: &'v str) -> Body<'v> {
        let name = body.trim();
        if self.authority.lookup(name).is_some() || self.authority.is_predefined(name) {
            return Body::Plain(name);
        }
        match body.find(['+', '-', '*', '/']) {
            Some(operator) => Body::Expression { operator },
            None => Body::Plain(name),
        }
    }

    fn evaluate(
        &self,
        value: &str,
        token: &Token<'_>,
        operator: usize,
        depth: usize,
        mut report: Option<&mut Findings>,
    ) -> Option<i64> {
        let body = token.body;
        let left_raw = &body[..operator];
        let right_raw = &body[operator + 1..];
        let left_start = token.body_start;
        let right_start = token.body_start + operator + 1;

        let left = self.operand(value, left_raw, left_start, OperandSide::Left, depth, report.as_deref_mut());
        let right = self.operand(value, right_raw, right_start, OperandSide::Right, depth, report.as_deref_mut());
        let (left, right) = (left?, right?);

        let result = match &body[operator..operator + 1] {
            "+" => left.checked_add(right),
            "-" => left.checked_sub(right),
            "*" => left.checked_mul(right),
            _ => left.checked_div(right),
        };
        // overflow and division by zero are blamed on the right operand
        if result.is_none()
            && let Some(findings) = report
        {
            findings.operand_errors.push(OperandError {
                side: OperandSide::Right,
                kind: OperandErrorKind::Invalid,
                operand: right_raw.trim().to_string(),
                offset: char_offset(value, right_start + leading_ws(right_raw)),
            });
        }
        result
    }

    fn operand(
        &self,
        value: &str,
        raw: &str,
        raw_start: usize,
        side: OperandSide,
        depth: usize,
        report: Option<&mut Findings>,
    ) -> Option<i64> {
        let operand = raw.trim();
        let offset = char_offset(value, raw_start + leading_ws(raw));
        let error = |kind| OperandError {
            side,
            kind,
            operand: operand.to_string(),
            offset,
        };

        if operand.is_empty() {
            if let Some(findings) = report {
                findings.operand_errors.push(error(OperandErrorKind::Missing));
            }
            return None;
        }
        if let Ok(number) = operand.parse::<i64>() {
            return Some(number);
        }
        match self.authority.lookup(operand) {
            Some(defined) => {
                let (text, complete) = self.expand(defined, depth + 1, None);
                let number = text.trim().parse::<i64>().ok().filter(|_| complete);
                if number.is_none()
                    && let Some(findings) = report
                {
                    findings.operand_errors.push(error(OperandErrorKind::Invalid));
                }
                number
            }
            None => {
                if !self.authority.is_predefined(operand)
                    && let Some(findings) = report
                {
                    findings.operand_errors.push(error(OperandErrorKind::Undefined));
                }
                None
            }
        }
    }
}
