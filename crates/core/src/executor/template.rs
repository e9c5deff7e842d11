//! Path and argument templates: `{{field}}` and `{{sanitize field}}`.

use thiserror::Error;

use crate::identity::effective_name;
use crate::torrent_client::TorrentSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unterminated placeholder at offset {0}")]
    Unterminated(usize),

    #[error("unknown placeholder {0:?}")]
    UnknownField(String),

    #[error("placeholder {0:?} has no value for this torrent")]
    MissingValue(&'static str),

    #[error("template renders to an empty value")]
    Empty,
}

/// Torrent value a placeholder can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateField {
    Name,
    Hash,
    Category,
    Tracker,
    IsolationFolder,
    SavePath,
    ContentPath,
    Tags,
}

impl TemplateField {
    pub fn parse(name: &str) -> Option<Self> {
        let field = match name {
            "name" => TemplateField::Name,
            "hash" => TemplateField::Hash,
            "category" => TemplateField::Category,
            "tracker" => TemplateField::Tracker,
            "isolation_folder" => TemplateField::IsolationFolder,
            "save_path" => TemplateField::SavePath,
            "content_path" => TemplateField::ContentPath,
            "tags" => TemplateField::Tags,
            _ => return None,
        };
        Some(field)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateField::Name => "name",
            TemplateField::Hash => "hash",
            TemplateField::Category => "category",
            TemplateField::Tracker => "tracker",
            TemplateField::IsolationFolder => "isolation_folder",
            TemplateField::SavePath => "save_path",
            TemplateField::ContentPath => "content_path",
            TemplateField::Tags => "tags",
        }
    }

    fn value(&self, torrent: &TorrentSnapshot) -> Result<String, TemplateError> {
        let missing = || TemplateError::MissingValue(self.as_str());
        match self {
            TemplateField::Name => Ok(torrent.name.clone()),
            TemplateField::Hash => Ok(torrent.hash.clone()),
            TemplateField::Category => torrent
                .category
                .clone()
                .filter(|c| !c.is_empty())
                .ok_or_else(missing),
            TemplateField::Tracker => torrent.tracker_domain().ok_or_else(missing),
            TemplateField::IsolationFolder => Ok(isolation_folder(torrent)),
            TemplateField::SavePath => Ok(torrent.save_path.clone()),
            TemplateField::ContentPath => Ok(torrent.content_path.clone()),
            TemplateField::Tags => Ok(torrent.joined_tags()),
        }
    }
}

/// Fields a move destination may use.
pub const MOVE_FIELDS: &[TemplateField] = &[
    TemplateField::Name,
    TemplateField::Hash,
    TemplateField::Category,
    TemplateField::Tracker,
    TemplateField::IsolationFolder,
];

/// Fields external program arguments may use.
pub const PROGRAM_FIELDS: &[TemplateField] = &[
    TemplateField::Name,
    TemplateField::Hash,
    TemplateField::Category,
    TemplateField::Tracker,
    TemplateField::IsolationFolder,
    TemplateField::SavePath,
    TemplateField::ContentPath,
    TemplateField::Tags,
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field { field: TemplateField, sanitize: bool },
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse `source`, accepting only placeholders in `allowed`.
    pub fn parse(source: &str, allowed: &[TemplateField]) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or(TemplateError::Unterminated(offset + start))?;
            let inner = after[..end].trim();

            let (sanitize, name) = match inner.strip_prefix("sanitize ") {
                Some(name) => (true, name.trim()),
                None => (false, inner),
            };
            let field = TemplateField::parse(name)
                .filter(|f| allowed.contains(f))
                .ok_or_else(|| TemplateError::UnknownField(inner.to_string()))?;
            segments.push(Segment::Field { field, sanitize });

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    pub fn render(&self, torrent: &TorrentSnapshot) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field { field, sanitize: s } => {
                    let value = field.value(torrent)?;
                    if *s {
                        out.push_str(&sanitize(&value));
                    } else {
                        out.push_str(&value);
                    }
                }
            }
        }
        if out.trim().is_empty() {
            return Err(TemplateError::Empty);
        }
        Ok(out)
    }
}

/// Make `value` safe as a single path segment.
pub fn sanitize(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    replaced.trim_matches(|c| c == '.' || c == ' ').to_string()
}

/// Folder name that isolates a torrent's content, falling back to its hash.
pub fn isolation_folder(torrent: &TorrentSnapshot) -> String {
    let folder = sanitize(&effective_name(&torrent.name));
    if folder.is_empty() {
        torrent.hash.clone()
    } else {
        folder
    }
}
