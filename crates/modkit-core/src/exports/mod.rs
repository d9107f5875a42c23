//! Discovery of a module's public command surface.
//!
//! Script files are scanned line by line for top-level declarations
//! ([`script`]). Compiled assemblies are read as metadata only
//! ([`metadata`]) and classified by name ([`classify`]). Every list
//! produced here is trimmed, free of empty names, deduplicated
//! case-insensitively and sorted case-insensitively, so the same inputs
//! always produce the same output.

pub mod classify;
pub mod metadata;
pub mod script;

use std::cmp::Ordering;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ExportError;
use classify::Classifier;
use metadata::ReflectionContext;

/// The computed export lists of a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSet {
    /// Script functions.
    pub functions: Vec<String>,
    /// Compiled cmdlets.
    pub cmdlets: Vec<String>,
    /// Script and compiled aliases.
    pub aliases: Vec<String>,
}

impl ExportSet {
    /// Scan scripts and assemblies. Script aliases and assembly aliases are
    /// merged into one list.
    pub fn detect<S: AsRef<Path>, A: AsRef<Path>>(scripts: &[S], assemblies: &[A]) -> Self {
        let binary = scan_assemblies(assemblies, &Classifier::default());
        let mut aliases = detect_script_aliases(scripts);
        aliases.extend(binary.aliases);
        Self {
            functions: detect_script_functions(scripts),
            cmdlets: binary.cmdlets,
            aliases: normalize_names(aliases),
        }
    }

    /// No functions, cmdlets or aliases.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.cmdlets.is_empty() && self.aliases.is_empty()
    }
}

/// Top-level `Verb-Noun` functions declared across `files`. Unreadable files
/// contribute nothing.
pub fn detect_script_functions<P: AsRef<Path>>(files: &[P]) -> Vec<String> {
    normalize_names(
        files
            .iter()
            .filter_map(|f| script::read_script(f.as_ref()))
            .flat_map(|text| script::function_names(&text)),
    )
}

/// Top-level `Set-Alias` / `New-Alias` names declared across `files`.
pub fn detect_script_aliases<P: AsRef<Path>>(files: &[P]) -> Vec<String> {
    normalize_names(
        files
            .iter()
            .filter_map(|f| script::read_script(f.as_ref()))
            .flat_map(|text| script::alias_names(&text)),
    )
}

/// Cmdlet names defined by `assemblies`.
pub fn detect_binary_cmdlets<P: AsRef<Path>>(assemblies: &[P]) -> Vec<String> {
    scan_assemblies(assemblies, &Classifier::default()).cmdlets
}

/// Alias names declared on cmdlets defined by `assemblies`.
pub fn detect_binary_aliases<P: AsRef<Path>>(assemblies: &[P]) -> Vec<String> {
    scan_assemblies(assemblies, &Classifier::default()).aliases
}

/// Cmdlets and aliases found in a set of assemblies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinaryExports {
    /// `Verb-Noun` names of command types.
    pub cmdlets: Vec<String>,
    /// Aliases declared on those types.
    pub aliases: Vec<String>,
}

/// Load every assembly into one reflection context and classify its types.
///
/// An assembly that fails to load, including one whose module identity is
/// already loaded, contributes nothing; the rest of the batch continues.
pub fn scan_assemblies<P: AsRef<Path>>(assemblies: &[P], classifier: &Classifier) -> BinaryExports {
    let mut ctx = ReflectionContext::new();
    for path in assemblies {
        let path = path.as_ref();
        match ctx.load_from_path(path) {
            Ok(_) => {}
            Err(ExportError::NotManaged) => {
                debug!(path = %path.display(), "skipping native image");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "assembly contributes no exports");
            }
        }
    }
    scan_context(&ctx, classifier)
}

/// Classify every type of every assembly already loaded in `ctx`.
pub fn scan_context(ctx: &ReflectionContext, classifier: &Classifier) -> BinaryExports {
    let mut cmdlets = Vec::new();
    let mut aliases = Vec::new();
    for ty in ctx.assemblies().iter().flat_map(|a| &a.types) {
        if let Some(name) = classifier.command_name(ty, ctx) {
            cmdlets.push(name);
            aliases.extend(classifier.aliases(ty));
        }
    }
    BinaryExports {
        cmdlets: normalize_names(cmdlets),
        aliases: normalize_names(aliases),
    }
}

/// Trim, drop empties, dedupe case-insensitively (the ordinally smallest
/// spelling survives) and sort case-insensitively.
pub fn normalize_names<I>(names: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut keyed: Vec<(String, String)> = names
        .into_iter()
        .map(|n| n.as_ref().trim().to_string())
        .filter(|n| !n.is_empty())
        .map(|n| (n.to_lowercase(), n))
        .collect();
    keyed.sort_by(|a, b| match a.0.cmp(&b.0) {
        Ordering::Equal => a.1.cmp(&b.1),
        other => other,
    });
    keyed.dedup_by(|later, earlier| later.0 == earlier.0);
    keyed.into_iter().map(|(_, n)| n).collect()
}

#[cfg(test)]
mod tests {
    use super::metadata::fixture::*;
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_names() {
        let names = normalize_names(["get-Widget", " Get-Widget ", "", "  ", "Add-Item", "GET-WIDGET"]);
        assert_eq!(names, vec!["Add-Item", "GET-WIDGET"]);

        let sorted = normalize_names(["b", "A", "c", "B"]);
        assert_eq!(sorted, vec!["A", "B", "c"]);
    }

    #[test]
    fn test_script_detection_is_deterministic() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("Public.ps1");
        let b = dir.path().join("More.psm1");
        fs::write(&a, "function Set-Widget { }\nfunction Get-Widget { }\nSet-Alias gw Get-Widget\n").unwrap();
        fs::write(&b, "function get-widget { }\nfunction Add-Widget {\n function Inner-Thing {}\n}\n").unwrap();
        let missing = dir.path().join("Missing.ps1");

        let files = vec![a.clone(), b.clone(), missing];
        let first = detect_script_functions(&files);
        let second = detect_script_functions(&[b, a]);
        assert_eq!(first, vec!["Add-Widget", "Get-Widget", "Set-Widget"]);
        assert_eq!(first, second);
        assert_eq!(detect_script_aliases(&files), vec!["gw"]);
    }

    #[test]
    fn test_unloadable_assemblies_contribute_nothing() {
        let dir = tempdir().unwrap();
        let junk = dir.path().join("Junk.dll");
        fs::write(&junk, b"MZ but not really").unwrap();
        let missing = dir.path().join("Missing.dll");

        let assemblies = vec![junk, missing];
        assert!(detect_binary_cmdlets(&assemblies).is_empty());
        assert!(detect_binary_aliases(&assemblies).is_empty());

        let set = ExportSet::detect::<&Path, _>(&[], &assemblies);
        assert!(set.is_empty());
    }

    #[test]
    fn test_scan_context_collects_cmdlets_and_aliases() {
        let mut b = MetadataBuilder::new(9);
        let attr = b.type_ref("System.Management.Automation", "CmdletAttribute");
        let alias = b.type_ref("System.Management.Automation", "AliasAttribute");
        let base = b.type_ref("System.Management.Automation", "Cmdlet");
        let cmdlet_ctor = b.ctor_ref(attr, &[Param::String, Param::String]);
        let alias_ctor = b.ctor_ref(alias, &[Param::StringArray]);

        let get = b.type_def(PUBLIC, "Contoso", "GetWidgetCommand", Extends::Ref(base));
        b.attribute_ref(get, cmdlet_ctor, &[Arg::Str("Get"), Arg::Str("Widget")]);
        b.attribute_ref(get, alias_ctor, &[Arg::Strs(&["gw", " ", "GW"])]);
        let add = b.type_def(PUBLIC, "Contoso", "AddWidgetCommand", Extends::Ref(base));
        b.attribute_ref(add, cmdlet_ctor, &[Arg::Str("Add"), Arg::Str("Widget")]);
        // Alias on a non-command type is ignored.
        let plain = b.type_def(PUBLIC, "Contoso", "Settings", Extends::None);
        b.attribute_ref(plain, alias_ctor, &[Arg::Strs(&["ignored"])]);

        let mut ctx = ReflectionContext::new();
        ctx.load_metadata(&b.build()).unwrap();
        let found = scan_context(&ctx, &Classifier::default());
        assert_eq!(found.cmdlets, vec!["Add-Widget", "Get-Widget"]);
        assert_eq!(found.aliases, vec!["GW"]);
    }
}
