//! Static purity check over a strategy source file. The strategy contract
//! forbids network, filesystem, subprocess and wall-clock access; before a
//! swap is accepted the candidate source is parsed and its syntax tree
//! walked. Import aliases are resolved, so `use std::net as n` is caught
//! the same as a spelled-out `std::net::TcpStream`, and a local function
//! that merely happens to be called `open` is not a finding. Source that
//! does not parse cannot be vetted and is refused outright; either way the
//! previous strategy stays active. The dynamic half of the contract still
//! holds regardless: the host only ever feeds the strategy IO contract
//! values.

use crate::domain::errors::StrategyError;
use std::collections::HashMap;
use std::path::Path;
use syn::visit::Visit;
use syn::{ItemForeignMod, Macro, UseTree};

/// Path prefixes a strategy may not import or name. Checked against fully
/// expanded paths, after alias resolution.
const FORBIDDEN_PREFIXES: &[&[&str]] = &[
    // network
    &["std", "net"],
    &["tokio", "net"],
    &["reqwest"],
    &["hyper"],
    &["ureq"],
    &["curl"],
    // filesystem
    &["std", "fs"],
    &["tokio", "fs"],
    // subprocess and host environment
    &["std", "process"],
    &["std", "env"],
    &["tokio", "process"],
    &["libc"],
    &["nix"],
    // wall clock (the `now` parameter is authoritative)
    &["std", "time"],
    &["tokio", "time"],
    &["chrono", "Utc"],
    &["chrono", "Local"],
];

/// Macros that reach outside the source at compile or run time.
const FORBIDDEN_MACROS: &[&str] = &["include", "include_str", "include_bytes", "env", "option_env"];

fn prefix_match(segments: &[String]) -> Option<String> {
    for forbidden in FORBIDDEN_PREFIXES {
        if forbidden.len() <= segments.len()
            && forbidden.iter().zip(segments).all(|(want, got)| got == want)
        {
            return Some(forbidden.join("::"));
        }
    }
    None
}

/// First pass: gather every `use` declaration. Imports of forbidden
/// modules are violations on their own, whatever local name they take;
/// the alias map feeds path expansion in the second pass.
#[derive(Default)]
struct Imports {
    aliases: HashMap<String, Vec<String>>,
    violation: Option<String>,
}

impl Imports {
    fn register(&mut self, local: String, full: Vec<String>) {
        if let Some(symbol) = prefix_match(&full) {
            self.violation.get_or_insert(symbol);
        }
        self.aliases.insert(local, full);
    }

    fn collect(&mut self, tree: &UseTree, prefix: &mut Vec<String>) {
        match tree {
            UseTree::Path(path) => {
                prefix.push(path.ident.to_string());
                self.collect(&path.tree, prefix);
                prefix.pop();
            }
            UseTree::Name(name) => {
                let mut full = prefix.clone();
                full.push(name.ident.to_string());
                self.register(name.ident.to_string(), full);
            }
            UseTree::Rename(rename) => {
                let mut full = prefix.clone();
                full.push(rename.ident.to_string());
                self.register(rename.rename.to_string(), full);
            }
            UseTree::Glob(_) => {
                if let Some(symbol) = prefix_match(prefix) {
                    self.violation.get_or_insert(symbol);
                }
            }
            UseTree::Group(group) => {
                for item in &group.items {
                    self.collect(item, prefix);
                }
            }
        }
    }
}

impl<'ast> Visit<'ast> for Imports {
    fn visit_item_use(&mut self, node: &'ast syn::ItemUse) {
        let mut prefix = Vec::new();
        self.collect(&node.tree, &mut prefix);
    }
}

/// Second pass: walk every path expression with imports expanded, plus the
/// escape hatches an import walk alone would miss.
struct PurityVisitor<'a> {
    aliases: &'a HashMap<String, Vec<String>>,
    violation: Option<String>,
}

impl<'a, 'ast> Visit<'ast> for PurityVisitor<'a> {
    fn visit_path(&mut self, path: &'ast syn::Path) {
        if self.violation.is_none() {
            let mut segments: Vec<String> = path
                .segments
                .iter()
                .map(|segment| segment.ident.to_string())
                .collect();
            let expansion = segments
                .first()
                .and_then(|first| self.aliases.get(first))
                .cloned();
            if let Some(mut expanded) = expansion {
                expanded.extend(segments.drain(1..));
                segments = expanded;
            }
            if let Some(symbol) = prefix_match(&segments) {
                self.violation = Some(symbol);
            }
        }
        syn::visit::visit_path(self, path);
    }

    fn visit_expr_unsafe(&mut self, node: &'ast syn::ExprUnsafe) {
        self.violation.get_or_insert_with(|| "unsafe block".to_string());
        syn::visit::visit_expr_unsafe(self, node);
    }

    fn visit_item_foreign_mod(&mut self, _node: &'ast ItemForeignMod) {
        self.violation.get_or_insert_with(|| "extern block".to_string());
    }

    fn visit_macro(&mut self, node: &'ast Macro) {
        if let Some(last) = node.path.segments.last() {
            let name = last.ident.to_string();
            if FORBIDDEN_MACROS.contains(&name.as_str()) {
                self.violation.get_or_insert(format!("{}!", name));
            }
        }
        syn::visit::visit_macro(self, node);
    }
}

pub fn scan_source(source: &str, path: &str) -> Result<(), StrategyError> {
    let file = syn::parse_file(source).map_err(|e| {
        StrategyError::Load(format!(
            "purity check needs parseable Rust source ({}): {}",
            path, e
        ))
    })?;

    let mut imports = Imports::default();
    imports.visit_file(&file);
    if let Some(symbol) = imports.violation.take() {
        return Err(StrategyError::PurityViolation {
            path: path.to_string(),
            symbol,
        });
    }

    let mut visitor = PurityVisitor {
        aliases: &imports.aliases,
        violation: None,
    };
    visitor.visit_file(&file);
    match visitor.violation {
        Some(symbol) => Err(StrategyError::PurityViolation {
            path: path.to_string(),
            symbol,
        }),
        None => Ok(()),
    }
}

pub fn scan_file(path: &Path) -> Result<(), StrategyError> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| StrategyError::Load(format!("cannot read {}: {}", path.display(), e)))?;
    scan_source(&source, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation_symbol(source: &str) -> String {
        match scan_source(source, "strategy.rs") {
            Err(StrategyError::PurityViolation { symbol, .. }) => symbol,
            other => panic!("expected purity violation, got {:?}", other),
        }
    }

    #[test]
    fn clean_source_passes() {
        let source = r#"
            fn ema(closes: &[f64], period: usize) -> f64 {
                let alpha = 2.0 / (period as f64 + 1.0);
                closes.iter().fold(closes[0], |acc, c| acc + alpha * (c - acc))
            }
            fn analyze(closes: &[f64], now: i64) -> Vec<String> {
                let fast = ema(closes, 12);
                let slow = ema(closes, 26);
                if fast > slow && now > 0 { vec!["BUY".to_string()] } else { vec![] }
            }
        "#;
        assert!(scan_source(source, "strategy.rs").is_ok());
    }

    #[test]
    fn local_function_named_open_is_not_a_finding() {
        let source = r#"
            fn open(value: i64) -> i64 { value + 1 }
            fn analyze() -> i64 { open(3) }
        "#;
        assert!(scan_source(source, "strategy.rs").is_ok());
    }

    #[test]
    fn direct_forbidden_import_rejected() {
        assert_eq!(
            violation_symbol("use std::net::TcpStream;\n"),
            "std::net"
        );
    }

    #[test]
    fn aliased_import_rejected() {
        // the alias never mentions "net" at the use site
        let source = r#"
            use std::net as n;
            fn f() { let _ = n::TcpStream::connect("127.0.0.1:80"); }
        "#;
        assert_eq!(violation_symbol(source), "std::net");
    }

    #[test]
    fn renamed_type_rejected_through_alias() {
        let source = r#"
            use std::time::Instant as Ticker;
            fn f() -> Ticker { Ticker::now() }
        "#;
        assert_eq!(violation_symbol(source), "std::time");
    }

    #[test]
    fn inline_absolute_path_rejected_without_import() {
        let source = r#"
            fn f() -> Vec<u8> { std::fs::read("state.bin").unwrap_or_default() }
        "#;
        assert_eq!(violation_symbol(source), "std::fs");
    }

    #[test]
    fn wall_clock_read_rejected() {
        let source = r#"
            use chrono::Utc;
            fn f() -> i64 { Utc::now().timestamp() }
        "#;
        assert_eq!(violation_symbol(source), "chrono::Utc");
    }

    #[test]
    fn glob_import_of_forbidden_module_rejected() {
        assert_eq!(violation_symbol("use std::process::*;\n"), "std::process");
    }

    #[test]
    fn unsafe_block_rejected() {
        let source = r#"
            fn f() -> i32 { unsafe { *(1usize as *const i32) } }
        "#;
        assert_eq!(violation_symbol(source), "unsafe block");
    }

    #[test]
    fn extern_block_rejected() {
        let source = r#"
            extern "C" { fn getpid() -> i32; }
        "#;
        assert_eq!(violation_symbol(source), "extern block");
    }

    #[test]
    fn include_macro_rejected() {
        let source = r#"
            fn f() -> &'static str { include_str!("secrets.txt") }
        "#;
        assert_eq!(violation_symbol(source), "include_str!");
    }

    #[test]
    fn comments_are_not_code() {
        let source = r#"
            // never call Utc::now() in a strategy; `now` is a parameter
            fn f(now: i64) -> i64 { now }
        "#;
        assert!(scan_source(source, "strategy.rs").is_ok());
    }

    #[test]
    fn unparseable_source_is_refused_not_vetted() {
        let result = scan_source("import requests\nrequests.get('http://x')\n", "strategy.py");
        assert!(matches!(result, Err(StrategyError::Load(_))));
    }
}
