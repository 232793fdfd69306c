//! Line scanner for `uniform` declarations in GLSL sources.
//!
//! Declarations are assumed to fit on one line. Comments and preprocessor
//! branches are not understood, so a commented-out declaration is still
//! reported.

const BLOCK_PREFIX: &str = "layout(std140) uniform";
const UNIFORM_KEYWORD: &str = "uniform";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Declaration<'a> {
    /// `layout(std140) uniform Name { ... };`
    Block { name: &'a str },
    /// `uniform type name;` with any array suffix stripped.
    Uniform { type_name: &'a str, name: &'a str },
}

impl<'a> Declaration<'a> {
    pub(crate) fn name(&self) -> &'a str {
        match self {
            Declaration::Block { name } | Declaration::Uniform { name, .. } => name,
        }
    }
}

pub(crate) fn scan_declarations(source: &str) -> impl Iterator<Item = Declaration<'_>> {
    source.lines().filter_map(parse_line)
}

fn parse_line(line: &str) -> Option<Declaration<'_>> {
    if let Some(position) = line.find(BLOCK_PREFIX) {
        let rest = &line[position + BLOCK_PREFIX.len()..];
        let name = rest
            .trim_start()
            .split(|ch: char| ch.is_whitespace() || ch == '{')
            .next()
            .filter(|name| !name.is_empty())?;
        return Some(Declaration::Block { name });
    }

    let position = line.find(UNIFORM_KEYWORD)?;
    let rest = &line[position + UNIFORM_KEYWORD.len()..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let mut tokens = rest.split_whitespace();
    let type_name = tokens.next()?;
    let raw_name = tokens.next()?;
    let name = raw_name.strip_suffix(';').unwrap_or(raw_name);
    let name = match name.find('[') {
        Some(bracket) => &name[..bracket],
        None => name,
    };
    if name.is_empty() {
        return None;
    }
    Some(Declaration::Uniform { type_name, name })
}
