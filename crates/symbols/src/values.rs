//! Naming raw numeric values.

use crate::SymbolTables;

/// Domain name that marks a value as a DSID number.
const DSID_DOMAIN: &str = "dsid";

/// Most candidate names offered for an ambiguous value.
const MAX_CANDIDATES: usize = 2;

/// What a bare number most likely means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueName<'a> {
    /// A constant of the declared domain has exactly this value.
    Constant(&'a str),
    /// The domain is `dsid` and a DSID with this number exists.
    Dsid(&'a str),
    /// Constants of other domains share the value; any of them might be meant.
    Candidates(Vec<&'a str>),
    /// Nothing known; show the number.
    Number,
}

impl ValueName<'_> {
    /// Render `value` with its name(s): `RED`, or `7 (RED? LUCKY?)`, or `7`.
    pub fn render(&self, value: i64) -> String {
        match self {
            ValueName::Constant(name) | ValueName::Dsid(name) => (*name).to_string(),
            ValueName::Candidates(names) => {
                let guesses: Vec<String> = names.iter().map(|n| format!("{n}?")).collect();
                format!("{value} ({})", guesses.join(" "))
            }
            ValueName::Number => value.to_string(),
        }
    }

    /// Whether a definite name was found.
    pub fn is_exact(&self) -> bool {
        matches!(self, ValueName::Constant(_) | ValueName::Dsid(_))
    }
}

impl SymbolTables {
    /// Best guess at the meaning of `value` in `domain`.
    pub fn name_value(&self, domain: Option<&str>, value: i64) -> ValueName<'_> {
        match domain {
            Some(DSID_DOMAIN) => {
                if let Ok(id) = u32::try_from(value)
                    && let Some(d) = self.dsid(id)
                {
                    return ValueName::Dsid(&d.name);
                }
            }
            Some(domain) => {
                if let Some(c) = self
                    .constants_with_value(value)
                    .find(|c| c.domain.as_deref() == Some(domain))
                {
                    return ValueName::Constant(&c.name);
                }
            }
            None => {}
        }
        let names: Vec<&str> = self
            .constants_with_value(value)
            .take(MAX_CANDIDATES)
            .map(|c| c.name.as_str())
            .collect();
        if names.is_empty() {
            ValueName::Number
        } else {
            ValueName::Candidates(names)
        }
    }

    /// `name_value` rendered to text.
    pub fn render_value(&self, domain: Option<&str>, value: i64) -> String {
        self.name_value(domain, value).render(value)
    }
}
