//! Import path grammar: `scope1{SEP}scope2{SEP}...{SEP}name`.

use vcd_sdk::Urn;

use crate::error::{KernelError, KernelResult};
use crate::value::AttrMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathScope {
    /// `nsxtManager.object`
    Provider,
    /// `org.vdcOrGroup.object`
    Tenant,
    /// `org.vdcOrGroup.edgeGateway.object`
    EdgeGateway,
    /// `org.vdc.vapp.object`
    VApp,
    /// `org.catalog.object`
    Catalog,
    /// `object`, provider-level singleton namespaces such as compute policies.
    Global,
}

/// One accepted shape for a kind's import path.
#[derive(Debug, Clone, Copy)]
pub struct ImportForm {
    pub scope: PathScope,
    pub template: &'static [&'static str],
}

impl ImportForm {
    pub const fn new(scope: PathScope, template: &'static [&'static str]) -> Self {
        Self { scope, template }
    }

    pub fn arity(&self) -> usize {
        self.template.len()
    }

    pub fn render(&self, separator: &str) -> String {
        self.template.join(separator)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportPath {
    raw: String,
    separator: String,
    segments: Vec<String>,
}

impl ImportPath {
    pub fn parse(raw: &str, separator: &str) -> KernelResult<Self> {
        let invalid = |reason: &str| KernelError::ImportPath {
            path: raw.to_string(),
            reason: reason.to_string(),
            forms: Vec::new(),
        };
        if separator.is_empty() {
            return Err(invalid("import separator is empty"));
        }
        if raw.trim().is_empty() {
            return Err(invalid("path is empty"));
        }
        let segments: Vec<String> = raw.split(separator).map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid("path contains an empty segment"));
        }
        Ok(Self {
            raw: raw.to_string(),
            separator: separator.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn segment(&self, idx: usize) -> &str {
        self.segments.get(idx).map(String::as_str).unwrap_or_default()
    }

    pub fn arity(&self) -> usize {
        self.segments.len()
    }

    pub fn last(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// The final segment as a URN, when the user imported by ID.
    pub fn last_as_urn(&self) -> Option<Urn> {
        Urn::parse(self.last()).ok()
    }

    /// Pick the form matching this path's arity.
    pub fn classify<'f>(&self, forms: &'f [ImportForm]) -> KernelResult<&'f ImportForm> {
        forms
            .iter()
            .find(|form| form.arity() == self.arity())
            .ok_or_else(|| KernelError::ImportPath {
                path: self.raw.clone(),
                reason: format!("{} segment(s) given", self.arity()),
                forms: forms.iter().map(|f| f.render(&self.separator)).collect(),
            })
    }
}

/// Candidates printed when a name matches more than one object.
#[derive(Debug, Clone, Default)]
pub struct CandidateTable {
    headers: Vec<&'static str>,
    rows: Vec<Vec<String>>,
}

impl CandidateTable {
    pub fn new(headers: &[&'static str]) -> Self {
        Self {
            headers: headers.to_vec(),
            rows: Vec::new(),
        }
    }

    pub fn row(&mut self, cells: Vec<String>) {
        self.rows.push(cells);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> String {
        let mut lines = vec![self.headers.join(" | ")];
        lines.extend(self.rows.iter().map(|row| row.join(" | ")));
        lines.join("\n")
    }

    pub fn into_error(self, what: &str, name: &str) -> KernelError {
        KernelError::Ambiguous {
            what: what.to_string(),
            name: name.to_string(),
            count: self.rows.len(),
            table: self.render(),
        }
    }
}

/// What a descriptor's import parser produces.
#[derive(Debug, Clone)]
pub struct ImportedResource {
    pub id: String,
    pub attributes: AttrMap,
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMS: &[ImportForm] = &[
        ImportForm::new(PathScope::Provider, &["nsxt-manager-name", "profile-name"]),
        ImportForm::new(PathScope::Tenant, &["org-name", "vdc-or-group-name", "profile-name"]),
    ];

    #[test]
    fn classifies_by_arity() {
        let path = ImportPath::parse("my-org.my-vdc.web", ".").unwrap();
        assert_eq!(path.classify(FORMS).unwrap().scope, PathScope::Tenant);
        let path = ImportPath::parse("nsxManager1.web", ".").unwrap();
        assert_eq!(path.classify(FORMS).unwrap().scope, PathScope::Provider);
    }

    #[test]
    fn wrong_arity_lists_forms_with_configured_separator() {
        let path = ImportPath::parse("a/b/c/d", "/").unwrap();
        let text = path.classify(FORMS).unwrap_err().to_string();
        assert!(text.contains("nsxt-manager-name/profile-name"));
        assert!(text.contains("org-name/vdc-or-group-name/profile-name"));
    }

    #[test]
    fn custom_separator_keeps_dots_in_names() {
        let path = ImportPath::parse("org|vdc.with.dots|net", "|").unwrap();
        assert_eq!(path.segment(1), "vdc.with.dots");
        assert!(ImportPath::parse("org..net", ".").is_err());
    }

    #[test]
    fn table_renders_header_and_rows() {
        let mut table = CandidateTable::new(&["ID", "Name"]);
        table.row(vec!["urn:1".into(), "rule-same".into()]);
        table.row(vec!["urn:2".into(), "rule-same".into()]);
        assert_eq!(table.render(), "ID | Name\nurn:1 | rule-same\nurn:2 | rule-same");
        let err = table.into_error("NAT rule", "rule-same");
        assert!(err.to_string().contains("found 2 NAT rule named 'rule-same'"));
    }
}
