//! # Template Compiler
//!
//! Turns raw format strings into token sequences.
//!
//! ## Syntax
//!
//! * `%name%` - placeholder without arguments
//! * `%name:args%` - placeholder with an argument string (anything except `%`)
//! * `%%` - a literal percent sign
//!
//! Placeholder names are ASCII letters, digits, `_`, `-` and `.`. Whether a
//! name is registered is not checked here; resolvers may be registered after
//! a template is compiled.

use crate::config::{RawLayout, RawTemplateSet};
use crate::error::{ReloadError, TemplateSyntaxError};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    Placeholder { name: String, args: Option<String> },
}

/// A compiled, immutable template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    tokens: Vec<Token>,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

impl Template {
    /// Compiles `raw` into tokens.
    ///
    /// Adjacent literal text is merged into one token. Fails on an
    /// unterminated `%`, an empty name or a name with invalid characters.
    pub fn compile(raw: &str) -> Result<Self, TemplateSyntaxError> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.char_indices().peekable();

        while let Some((position, c)) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            if let Some(&(_, '%')) = chars.peek() {
                chars.next();
                literal.push('%');
                continue;
            }

            let mut body = String::new();
            let mut terminated = false;
            for (_, c) in chars.by_ref() {
                if c == '%' {
                    terminated = true;
                    break;
                }
                body.push(c);
            }
            if !terminated {
                return Err(TemplateSyntaxError::Unterminated { position });
            }

            let (name, args) = match body.split_once(':') {
                Some((name, args)) => (name, Some(args.to_string())),
                None => (body.as_str(), None),
            };
            if name.is_empty() {
                return Err(TemplateSyntaxError::EmptyName { position });
            }
            if !name.chars().all(is_name_char) {
                return Err(TemplateSyntaxError::InvalidName {
                    position,
                    name: name.to_string(),
                });
            }

            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(Token::Placeholder {
                name: name.to_string(),
                args,
            });
        }

        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Ok(Self {
            source: raw.to_string(),
            tokens,
        })
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// The raw text this template was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn placeholder_names(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|token| match token {
            Token::Placeholder { name, .. } => Some(name.as_str()),
            Token::Literal(_) => None,
        })
    }

    /// True when the template contains no placeholders.
    pub fn is_static(&self) -> bool {
        self.placeholder_names().next().is_none()
    }
}

/// Header, footer and entry templates used for one group of viewers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub header: Template,
    pub footer: Template,
    pub entry: Template,
}

fn compile_section(section: String, raw: &str) -> Result<Template, ReloadError> {
    Template::compile(raw).map_err(|source| ReloadError::Syntax { section, source })
}

/// Every layout the engine renders with, compiled together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSet {
    default: Layout,
    servers: HashMap<String, Layout>,
    raw: RawTemplateSet,
}

impl TemplateSet {
    /// Compiles every template in `raw`. Fails on the first syntax error;
    /// nothing is returned partially compiled.
    pub fn compile(raw: &RawTemplateSet) -> Result<Self, ReloadError> {
        let default = Layout {
            header: compile_section("header".to_string(), &raw.header)?,
            footer: compile_section("footer".to_string(), &raw.footer)?,
            entry: compile_section("entry".to_string(), &raw.entry)?,
        };

        let mut servers = HashMap::new();
        for (server, layout) in &raw.servers {
            let RawLayout { header, footer, entry } = layout;
            let compile_or_inherit = |field: &str, value: &Option<String>, inherited: &Template| {
                match value {
                    Some(text) => compile_section(format!("servers.{server}.{field}"), text),
                    None => Ok(inherited.clone()),
                }
            };
            servers.insert(
                server.clone(),
                Layout {
                    header: compile_or_inherit("header", header, &default.header)?,
                    footer: compile_or_inherit("footer", footer, &default.footer)?,
                    entry: compile_or_inherit("entry", entry, &default.entry)?,
                },
            );
        }

        Ok(Self {
            default,
            servers,
            raw: raw.clone(),
        })
    }

    /// Layout for a viewer on `server`, falling back to the default layout.
    pub fn layout_for(&self, server: &str) -> &Layout {
        self.servers.get(server).unwrap_or(&self.default)
    }

    pub fn default_layout(&self) -> &Layout {
        &self.default
    }

    pub fn raw(&self) -> &RawTemplateSet {
        &self.raw
    }

    /// Every placeholder name referenced anywhere in the set.
    pub fn placeholder_names(&self) -> BTreeSet<String> {
        std::iter::once(&self.default)
            .chain(self.servers.values())
            .flat_map(|layout| [&layout.header, &layout.footer, &layout.entry])
            .flat_map(|template| template.placeholder_names())
            .map(str::to_string)
            .collect()
    }
}

/// Holder of the active [`TemplateSet`].
///
/// Readers clone the `Arc` and render from it for as long as they like; a
/// reload publishes a new `Arc` only after the whole set compiled.
pub struct TemplateStore {
    active: RwLock<Arc<TemplateSet>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for TemplateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateStore")
            .field("generation", &self.generation())
            .finish()
    }
}

impl TemplateStore {
    pub fn new(initial: TemplateSet) -> Self {
        Self {
            active: RwLock::new(Arc::new(initial)),
            generation: AtomicU64::new(0),
        }
    }

    /// The currently active set.
    pub fn load(&self) -> Arc<TemplateSet> {
        self.active.read().clone()
    }

    /// Number of successful reloads since creation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Compiles `raw` and swaps it in. On error the active set is untouched.
    pub fn reload(&self, raw: &RawTemplateSet) -> Result<Arc<TemplateSet>, ReloadError> {
        let compiled = Arc::new(TemplateSet::compile(raw)?);
        debug!(
            "Compiled template set referencing placeholders: {:?}",
            compiled.placeholder_names()
        );
        *self.active.write() = compiled.clone();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!("📝 Template set reloaded (generation {})", generation);
        Ok(compiled)
    }
}
