// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Alias declarations and alias files.
//!
//! An alias file is plain shell. Hostprep only understands one kind of line
//! in it, the single alias declaration:
//!
//! ```text
//! alias NAME=DEFINITION
//! ```
//!
//! The name is everything between the `alias` keyword and the first `=`,
//! the definition is everything after it. Surrounding whitespace is ignored
//! for both. The definition is kept as raw shell text, quotes included, so
//! that it can be written back out exactly as the user wrote it.
//!
//! Every other line is a __passthrough__ line: comments, blank lines,
//! functions, exports, and anything that merely looks like an alias but is
//! not well-formed.
//!
//! A declaration continued onto the next line with a trailing backslash is
//! not split apart. It is kept as passthrough together with every line it
//! continues onto, so multi-line definitions survive untouched but are never
//! managed.
//!
//! Lines are split on `\n` alone. A `\r` left over from CRLF line endings
//! stays part of passthrough lines, so they are written back byte for byte.

use std::{
    collections::{BTreeMap, HashMap},
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::Path,
};

/// Single alias declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AliasEntry {
    name: String,
    definition: String,
}

impl AliasEntry {
    /// Construct alias from name and raw shell definition.
    pub fn new(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: definition.into(),
        }
    }

    /// Construct alias from name and unquoted command text.
    ///
    /// The command is wrapped in double quotes with backslashes and double
    /// quotes escaped.
    pub fn from_command(name: impl Into<String>, command: impl AsRef<str>) -> Self {
        let escaped = command
            .as_ref()
            .replace('\\', "\\\\")
            .replace('"', "\\\"");
        Self::new(name, format!("\"{escaped}\""))
    }

    /// Name of the alias.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw shell definition of the alias.
    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// Full declaration line, without line terminator.
    pub fn declaration(&self) -> String {
        format!("alias {}={}", self.name, self.definition)
    }

    /// Check that name survives being written out and parsed back.
    ///
    /// # Errors
    ///
    /// - Return reason if name is empty, or contains whitespace or `=`.
    pub fn check_name(name: &str) -> Result<(), &'static str> {
        if name.is_empty() {
            return Err("alias name is empty");
        }

        if name.contains(char::is_whitespace) {
            return Err("alias name contains whitespace");
        }

        if name.contains('=') {
            return Err("alias name contains '='");
        }

        Ok(())
    }

    /// Check that command fits on a single declaration line.
    ///
    /// # Errors
    ///
    /// - Return reason if command contains a line break.
    pub fn check_command(command: &str) -> Result<(), &'static str> {
        if command.contains(['\n', '\r']) {
            return Err("alias command spans multiple lines");
        }

        Ok(())
    }

    /// Parse a single line of an alias file.
    pub fn parse_line(line: &str) -> ParsedLine {
        let trimmed = line.trim_start();
        let Some(rest) = trimmed.strip_prefix("alias") else {
            return ParsedLine::Passthrough;
        };

        // INVARIANT: Keyword must be followed by whitespace, e.g., "aliases=1" is not an alias.
        if !rest.starts_with(char::is_whitespace) {
            return ParsedLine::Passthrough;
        }

        let rest = rest.trim_start();
        let Some((name, definition)) = rest.split_once('=') else {
            return ParsedLine::Malformed("alias keyword without '='");
        };

        let name = name.trim();
        if let Err(reason) = Self::check_name(name) {
            return ParsedLine::Malformed(reason);
        }

        if continues_on_next_line(line) {
            return ParsedLine::Malformed("alias definition continues on next line");
        }

        ParsedLine::Declaration(Self::new(name, definition.trim()))
    }
}

impl Display for AliasEntry {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.declaration())
    }
}

/// Line ends in an unescaped backslash that joins it with the next line.
fn continues_on_next_line(line: &str) -> bool {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim_start().starts_with('#') {
        return false;
    }

    let backslashes = line.len() - line.trim_end_matches('\\').len();
    backslashes % 2 == 1
}

/// Classification of a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// Well-formed alias declaration.
    Declaration(AliasEntry),

    /// Anything that is not an alias declaration.
    Passthrough,

    /// Looks like an alias declaration but is not one. Kept as passthrough.
    Malformed(&'static str),
}

/// Recoverable parse problem.
///
/// Malformed alias lines are kept verbatim as passthrough, the warning only
/// exists so the operator can be told about them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub line_number: usize,
    pub line: String,
    pub reason: &'static str,
}

impl Display for ParseWarning {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "line {}: {} (kept as is): {:?}",
            self.line_number, self.reason, self.line
        )
    }
}

/// Parsed alias file.
///
/// # Invariants
///
/// - Passthrough lines keep their original relative order.
/// - Declarations keep their order of first appearance, and a name that is
///   declared more than once keeps its last definition, just like the shell
///   would.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AliasFile {
    passthrough: Vec<String>,
    entries: Vec<AliasEntry>,
    warnings: Vec<ParseWarning>,
}

impl AliasFile {
    /// Parse alias file content.
    pub fn parse(content: &str) -> Self {
        let mut file = Self::default();
        let mut positions: HashMap<String, usize> = HashMap::new();

        let mut continued = false;
        for (index, line) in content.split_terminator('\n').enumerate() {
            let parsed = if continued {
                ParsedLine::Passthrough
            } else {
                AliasEntry::parse_line(line)
            };
            continued = continues_on_next_line(line);

            match parsed {
                ParsedLine::Declaration(entry) => match positions.get(entry.name()) {
                    Some(&position) => file.entries[position] = entry,
                    None => {
                        positions.insert(entry.name().to_string(), file.entries.len());
                        file.entries.push(entry);
                    }
                },
                ParsedLine::Passthrough => file.passthrough.push(line.to_string()),
                ParsedLine::Malformed(reason) => {
                    file.warnings.push(ParseWarning {
                        line_number: index + 1,
                        line: line.to_string(),
                        reason,
                    });
                    file.passthrough.push(line.to_string());
                }
            }
        }

        file
    }

    /// Load alias file from disk.
    ///
    /// A missing file is treated as an empty one.
    ///
    /// # Errors
    ///
    /// - Return [`std::io::Error`] if file exists but cannot be read.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        match read_to_string(path.as_ref()) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err),
        }
    }

    /// Passthrough lines in original order.
    pub fn passthrough(&self) -> &[String] {
        &self.passthrough
    }

    /// Alias declarations, one per distinct name.
    pub fn entries(&self) -> &[AliasEntry] {
        &self.entries
    }

    /// Recoverable parse problems.
    pub fn warnings(&self) -> &[ParseWarning] {
        &self.warnings
    }
}

/// Tool-owned alias table.
///
/// Entries here always win over same-named aliases already present in a
/// user's alias file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownAliasSet {
    entries: BTreeMap<String, AliasEntry>,
}

impl KnownAliasSet {
    /// Construct from name to unquoted command pairs.
    pub fn from_commands(
        commands: impl IntoIterator<Item = (impl Into<String>, impl AsRef<str>)>,
    ) -> Self {
        Self::from_entries(
            commands
                .into_iter()
                .map(|(name, command)| AliasEntry::from_command(name, command)),
        )
    }

    /// Construct from prepared entries. Later entries replace earlier ones.
    pub fn from_entries(entries: impl IntoIterator<Item = AliasEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.name().to_string(), entry))
                .collect(),
        }
    }

    /// Get tool-owned alias by name.
    pub fn get(&self, name: &str) -> Option<&AliasEntry> {
        self.entries.get(name)
    }

    /// Iterate entries ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &AliasEntry> {
        self.entries.values()
    }
}
