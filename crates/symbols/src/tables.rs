//! Symbol table data structures and their lookup indexes.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Deserializer, Serialize};

use crate::SymbolError;

// ─── Numbers that may arrive as strings ─────────────────────────────────────
// Some exporters write offsets and line numbers as JSON strings ("42").

fn de_u32_lenient<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u32),
        Str(String),
    }
    match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected a number, got {s:?}"))),
    }
}

fn de_opt_u32_lenient<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrap(#[serde(deserialize_with = "de_u32_lenient")] u32);
    Ok(Option::<Wrap>::deserialize(deserializer)?.map(|Wrap(n)| n))
}

/// Lookup key for a source file: its base name without extension.
///
/// `list pen:10`, `src/pen.fml` and `pen.fml` all name the same file.
pub fn source_key(file: &str) -> String {
    let base = file.rsplit(['/', '\\']).next().unwrap_or(file);
    let stem = match base.rfind('.') {
        Some(i) if i > 0 => &base[..i],
        _ => base,
    };
    stem.to_ascii_lowercase()
}

/// A user-defined flow (firmware function).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Flow {
    /// Wire id.
    pub id: u32,
    /// Flow name.
    pub name: String,
    /// Declared argument names, in call order.
    #[serde(default)]
    pub args: Vec<String>,
    /// Declared local variable names, in declaration order.
    #[serde(default)]
    pub locals: Vec<String>,
    /// Source file the flow is defined in.
    #[serde(default)]
    pub file: Option<String>,
    /// Line of the flow definition.
    #[serde(default, deserialize_with = "de_opt_u32_lenient")]
    pub line: Option<u32>,
    /// Constant domain of the return value.
    #[serde(default)]
    pub value_domain: Option<String>,
    /// Constant domain of each argument (parallel to `args`).
    #[serde(default)]
    pub arg_domains: Vec<Option<String>>,
}

/// A built-in firmware primitive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Keyword {
    /// Wire id.
    pub id: u32,
    /// Keyword name.
    pub name: String,
    /// Declared argument names.
    #[serde(default)]
    pub args: Vec<String>,
    /// Constant domain of the return value.
    #[serde(default)]
    pub value_domain: Option<String>,
    /// Constant domain of each argument.
    #[serde(default)]
    pub arg_domains: Vec<Option<String>>,
}

/// A global variable, or a global array when `length` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Global {
    /// Wire id.
    pub id: u32,
    /// Variable name.
    pub name: String,
    /// Constant domain of the stored value.
    #[serde(default)]
    pub value_domain: Option<String>,
    /// Element count for arrays.
    #[serde(default)]
    pub length: Option<u32>,
}

impl Global {
    /// Whether this global is an array.
    pub fn is_array(&self) -> bool {
        self.length.is_some()
    }
}

/// A named constant, possibly an enumeration member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Constant {
    /// Wire id.
    pub id: u32,
    /// Constant name.
    pub name: String,
    /// Numeric value.
    pub value: i64,
    /// Domain (enumeration or constant group) the constant belongs to.
    #[serde(default)]
    pub domain: Option<String>,
    /// Enumeration members are fixed; assignment is rejected.
    #[serde(default)]
    pub is_enum: bool,
}

/// A DSID: a named firmware state variable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dsid {
    /// DSID number.
    pub id: u32,
    /// DSID name.
    pub name: String,
}

/// A statement: byte offset in the compiled image -> source location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Statement {
    /// Offset used by `fm.break` and reported by breakpoint/assert events.
    #[serde(deserialize_with = "de_u32_lenient")]
    pub offset: u32,
    /// Flow containing the statement.
    #[serde(default)]
    pub flow: String,
    /// Source file.
    pub file: String,
    /// Source line.
    #[serde(deserialize_with = "de_u32_lenient")]
    pub line: u32,
}

/// All symbol tables of one firmware build.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SymbolTables {
    /// Free-form build identifier, shown on reload.
    #[serde(default)]
    pub build: Option<String>,
    /// Flows.
    #[serde(default)]
    pub flows: Vec<Flow>,
    /// Keywords.
    #[serde(default)]
    pub keywords: Vec<Keyword>,
    /// Globals and global arrays.
    #[serde(default)]
    pub globals: Vec<Global>,
    /// Constants.
    #[serde(default)]
    pub constants: Vec<Constant>,
    /// DSIDs.
    #[serde(default)]
    pub dsids: Vec<Dsid>,
    /// Statements.
    #[serde(default)]
    pub statements: Vec<Statement>,

    /// Lookup indexes (lazily built on first access).
    #[serde(skip)]
    index: OnceLock<Index>,
}

#[derive(Debug, Clone, Default)]
struct Index {
    flows_by_id: HashMap<u32, usize>,
    flows_by_name: HashMap<String, usize>,
    keywords_by_id: HashMap<u32, usize>,
    keywords_by_name: HashMap<String, usize>,
    globals_by_id: HashMap<u32, usize>,
    globals_by_name: HashMap<String, usize>,
    constants_by_id: HashMap<u32, usize>,
    constants_by_name: HashMap<String, usize>,
    constants_by_value: HashMap<i64, Vec<usize>>,
    dsids_by_id: HashMap<u32, usize>,
    dsids_by_name: HashMap<String, usize>,
    statements_by_offset: HashMap<u32, usize>,
    statements_by_line: HashMap<(String, u32), usize>,
}

fn index_by<T>(
    items: &[T],
    id: impl Fn(&T) -> u32,
    name: impl Fn(&T) -> &str,
) -> (HashMap<u32, usize>, HashMap<String, usize>) {
    let mut by_id = HashMap::with_capacity(items.len());
    let mut by_name = HashMap::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        by_id.entry(id(item)).or_insert(i);
        by_name.entry(name(item).to_string()).or_insert(i);
    }
    (by_id, by_name)
}

impl SymbolTables {
    fn index(&self) -> &Index {
        self.index.get_or_init(|| {
            let (flows_by_id, flows_by_name) = index_by(&self.flows, |f| f.id, |f| f.name.as_str());
            let (keywords_by_id, keywords_by_name) =
                index_by(&self.keywords, |k| k.id, |k| k.name.as_str());
            let (globals_by_id, globals_by_name) = index_by(&self.globals, |g| g.id, |g| g.name.as_str());
            let (constants_by_id, constants_by_name) =
                index_by(&self.constants, |c| c.id, |c| c.name.as_str());
            let (dsids_by_id, dsids_by_name) = index_by(&self.dsids, |d| d.id, |d| d.name.as_str());

            let mut constants_by_value: HashMap<i64, Vec<usize>> = HashMap::new();
            for (i, c) in self.constants.iter().enumerate() {
                constants_by_value.entry(c.value).or_default().push(i);
            }

            let mut statements_by_offset = HashMap::new();
            let mut statements_by_line = HashMap::new();
            for (i, s) in self.statements.iter().enumerate() {
                statements_by_offset.entry(s.offset).or_insert(i);
                // The lowest offset on a line is where a breakpoint belongs.
                statements_by_line
                    .entry((source_key(&s.file), s.line))
                    .and_modify(|j: &mut usize| {
                        if self.statements[*j].offset > s.offset {
                            *j = i;
                        }
                    })
                    .or_insert(i);
            }

            Index {
                flows_by_id,
                flows_by_name,
                keywords_by_id,
                keywords_by_name,
                globals_by_id,
                globals_by_name,
                constants_by_id,
                constants_by_name,
                constants_by_value,
                dsids_by_id,
                dsids_by_name,
                statements_by_offset,
                statements_by_line,
            }
        })
    }

    /// Reject tables with repeated ids.
    pub(crate) fn validate(&self) -> Result<(), SymbolError> {
        fn unique<T>(
            table: &'static str,
            items: &[T],
            id: impl Fn(&T) -> u32,
        ) -> Result<(), SymbolError> {
            let mut seen = std::collections::HashSet::with_capacity(items.len());
            for item in items {
                if !seen.insert(id(item)) {
                    return Err(SymbolError::DuplicateId {
                        table,
                        id: id(item),
                    });
                }
            }
            Ok(())
        }
        unique("flows", &self.flows, |f| f.id)?;
        unique("keywords", &self.keywords, |k| k.id)?;
        unique("globals", &self.globals, |g| g.id)?;
        unique("constants", &self.constants, |c| c.id)?;
        unique("dsids", &self.dsids, |d| d.id)?;
        unique("statements", &self.statements, |s| s.offset)
    }

    /// Flow by wire id.
    pub fn flow(&self, id: u32) -> Option<&Flow> {
        self.index().flows_by_id.get(&id).map(|&i| &self.flows[i])
    }

    /// Flow by name.
    pub fn flow_by_name(&self, name: &str) -> Option<&Flow> {
        self.index().flows_by_name.get(name).map(|&i| &self.flows[i])
    }

    /// Keyword by wire id.
    pub fn keyword(&self, id: u32) -> Option<&Keyword> {
        self.index().keywords_by_id.get(&id).map(|&i| &self.keywords[i])
    }

    /// Keyword by name.
    pub fn keyword_by_name(&self, name: &str) -> Option<&Keyword> {
        self.index()
            .keywords_by_name
            .get(name)
            .map(|&i| &self.keywords[i])
    }

    /// Global by wire id.
    pub fn global(&self, id: u32) -> Option<&Global> {
        self.index().globals_by_id.get(&id).map(|&i| &self.globals[i])
    }

    /// Global by name.
    pub fn global_by_name(&self, name: &str) -> Option<&Global> {
        self.index()
            .globals_by_name
            .get(name)
            .map(|&i| &self.globals[i])
    }

    /// Constant by wire id.
    pub fn constant(&self, id: u32) -> Option<&Constant> {
        self.index()
            .constants_by_id
            .get(&id)
            .map(|&i| &self.constants[i])
    }

    /// Constant by name.
    pub fn constant_by_name(&self, name: &str) -> Option<&Constant> {
        self.index()
            .constants_by_name
            .get(name)
            .map(|&i| &self.constants[i])
    }

    /// Every constant with the given value, in table order.
    pub fn constants_with_value(&self, value: i64) -> impl Iterator<Item = &Constant> {
        self.index()
            .constants_by_value
            .get(&value)
            .into_iter()
            .flatten()
            .map(|&i| &self.constants[i])
    }

    /// DSID by number.
    pub fn dsid(&self, id: u32) -> Option<&Dsid> {
        self.index().dsids_by_id.get(&id).map(|&i| &self.dsids[i])
    }

    /// DSID by name.
    pub fn dsid_by_name(&self, name: &str) -> Option<&Dsid> {
        self.index().dsids_by_name.get(name).map(|&i| &self.dsids[i])
    }

    /// Statement at an image offset.
    pub fn statement_at(&self, offset: u32) -> Option<&Statement> {
        self.index()
            .statements_by_offset
            .get(&offset)
            .map(|&i| &self.statements[i])
    }

    /// First statement on `file:line`. `file` may omit directory and extension.
    pub fn statement_at_line(&self, file: &str, line: u32) -> Option<&Statement> {
        self.index()
            .statements_by_line
            .get(&(source_key(file), line))
            .map(|&i| &self.statements[i])
    }

    /// Whether `name` is a known flow or keyword.
    pub fn is_callable(&self, name: &str) -> bool {
        self.flow_by_name(name).is_some() || self.keyword_by_name(name).is_some()
    }
}
