//! Decides which types in loaded metadata are commands.
//!
//! Matching is done entirely on type names through a [`KnownTypes`] table.
//! Strategies implement [`CommandMatcher`] and are tried in order; the
//! first one that names the type wins.

use std::collections::HashMap;

use super::metadata::{AttrArg, ReflectionContext, TypeInfo, TypeName};

const AUTOMATION_NS: &str = "System.Management.Automation";

/// Role a well-known type plays in command discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownType {
    /// A base class that makes any subclass a command.
    CommandBase,
    /// Attribute carrying verb and noun constructor arguments.
    CmdletAttribute,
    /// Attribute carrying alias names.
    AliasAttribute,
}

/// Name-keyed table of well-known types.
#[derive(Debug, Clone)]
pub struct KnownTypes {
    by_name: HashMap<String, KnownType>,
}

impl Default for KnownTypes {
    fn default() -> Self {
        let mut known = Self {
            by_name: HashMap::new(),
        };
        known.insert(format!("{AUTOMATION_NS}.Cmdlet"), KnownType::CommandBase);
        known.insert(format!("{AUTOMATION_NS}.PSCmdlet"), KnownType::CommandBase);
        known.insert(
            format!("{AUTOMATION_NS}.CmdletAttribute"),
            KnownType::CmdletAttribute,
        );
        known.insert(
            format!("{AUTOMATION_NS}.AliasAttribute"),
            KnownType::AliasAttribute,
        );
        known
    }
}

impl KnownTypes {
    /// Register an additional full type name.
    pub fn insert(&mut self, full_name: impl Into<String>, kind: KnownType) {
        self.by_name.insert(full_name.into(), kind);
    }

    /// Role of `name`, if it is registered.
    pub fn kind_of(&self, name: &TypeName) -> Option<KnownType> {
        self.by_name.get(&name.full_name()).copied()
    }
}

/// One strategy for recognizing a command type.
pub trait CommandMatcher: Send + Sync + std::fmt::Debug {
    /// The command name for `ty`, or `None` if this strategy does not
    /// recognize it.
    fn command_name(
        &self,
        ty: &TypeInfo,
        ctx: &ReflectionContext,
        known: &KnownTypes,
    ) -> Option<String>;
}

/// Recognizes types carrying a cmdlet attribute with verb and noun.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmdletAttributeMatcher;

impl CommandMatcher for CmdletAttributeMatcher {
    fn command_name(
        &self,
        ty: &TypeInfo,
        _ctx: &ReflectionContext,
        known: &KnownTypes,
    ) -> Option<String> {
        ty.attributes
            .iter()
            .filter(|a| known.kind_of(&a.attribute_type) == Some(KnownType::CmdletAttribute))
            .find_map(|a| match a.args.as_slice() {
                [AttrArg::String(Some(verb)), AttrArg::String(Some(noun)), ..] => {
                    let (verb, noun) = (verb.trim(), noun.trim());
                    (!verb.is_empty() && !noun.is_empty()).then(|| format!("{verb}-{noun}"))
                }
                _ => None,
            })
    }
}

/// Recognizes types that inherit from a known command base, walking the
/// base chain by name across every loaded assembly.
#[derive(Debug, Clone, Copy)]
pub struct BaseTypeMatcher {
    /// Base types followed before giving up.
    pub max_depth: usize,
}

impl Default for BaseTypeMatcher {
    fn default() -> Self {
        Self { max_depth: 32 }
    }
}

impl CommandMatcher for BaseTypeMatcher {
    fn command_name(
        &self,
        ty: &TypeInfo,
        ctx: &ReflectionContext,
        known: &KnownTypes,
    ) -> Option<String> {
        let mut base = ty.extends.as_ref();
        for _ in 0..self.max_depth {
            let name = base?;
            if known.kind_of(name) == Some(KnownType::CommandBase) {
                return command_name_from_type(&ty.name.name);
            }
            base = ctx.find_type(&name.full_name())?.extends.as_ref();
        }
        None
    }
}

/// `GetWidgetCommand` -> `Get-Widget`: the leading capitalized word is the
/// verb, the rest (minus a `Command` suffix) the noun.
pub fn command_name_from_type(type_name: &str) -> Option<String> {
    let base = type_name.split('`').next().unwrap_or(type_name);
    let stem = base.strip_suffix("Command").unwrap_or(base);

    let mut chars = stem.char_indices();
    let (_, first) = chars.next()?;
    if !first.is_ascii_uppercase() {
        return None;
    }
    let split = chars
        .find(|(_, c)| !(c.is_ascii_lowercase() || c.is_ascii_digit()))
        .map(|(i, _)| i)?;
    let (verb, noun) = stem.split_at(split);
    if verb.len() < 2 || !noun.starts_with(|c: char| c.is_ascii_uppercase()) {
        return None;
    }
    Some(format!("{verb}-{noun}"))
}

/// Ordered matcher chain over a known-types table.
#[derive(Debug)]
pub struct Classifier {
    known: KnownTypes,
    matchers: Vec<Box<dyn CommandMatcher>>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(KnownTypes::default())
    }
}

impl Classifier {
    /// Attribute matching first, then the base-type walk.
    pub fn new(known: KnownTypes) -> Self {
        Self {
            known,
            matchers: vec![
                Box::new(CmdletAttributeMatcher),
                Box::new(BaseTypeMatcher::default()),
            ],
        }
    }

    /// A classifier with a custom matcher chain, tried in order.
    pub fn with_matchers(known: KnownTypes, matchers: Vec<Box<dyn CommandMatcher>>) -> Self {
        Self { known, matchers }
    }

    /// The command name of `ty`, if it is a public, concrete command type.
    pub fn command_name(&self, ty: &TypeInfo, ctx: &ReflectionContext) -> Option<String> {
        if ty.is_abstract() || !ty.is_public() {
            return None;
        }
        self.matchers
            .iter()
            .find_map(|m| m.command_name(ty, ctx, &self.known))
    }

    /// Alias names declared on `ty`.
    pub fn aliases(&self, ty: &TypeInfo) -> Vec<String> {
        ty.attributes
            .iter()
            .filter(|a| self.known.kind_of(&a.attribute_type) == Some(KnownType::AliasAttribute))
            .flat_map(|a| a.string_values())
            .collect()
    }
}
