//! Error taxonomy for the aggregation pipeline.

use serde::Serialize;

/// Errors raised while building the translation table or processing a file.
///
/// Every variant is fatal for the file being processed; there is no
/// skip-and-continue at the row level.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A date, time or value field could not be parsed.
    #[error("malformed {field} `{value}`{}", line_suffix(.line))]
    Field {
        field: &'static str,
        value: String,
        line: Option<u64>,
    },

    /// A row (or the header) does not have the expected shape.
    #[error("malformed row: {0}")]
    Row(String),

    /// The translation document could not be parsed.
    #[error("malformed translation source: {0}")]
    TranslationSource(String),

    /// The `(asset, code)` pair has no entry in the translation table.
    #[error("no translation for variable `{code}` of asset `{asset}`")]
    Translation { asset: String, code: String },

    /// The source is unreadable or corrupt, or the destination is unwritable.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Processing stopped at a batch boundary after cancellation was requested.
    #[error("processing cancelled")]
    Cancelled,
}

/// Coarse error category, reported per failed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Parse,
    Translation,
    Io,
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Field { .. } | Self::Row(_) | Self::TranslationSource(_) => ErrorKind::Parse,
            Self::Translation { .. } => ErrorKind::Translation,
            Self::Io(_) => ErrorKind::Io,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Attaches the source line to a field error.
    pub fn at_line(self, line: u64) -> Self {
        match self {
            Self::Field { field, value, .. } => Self::Field {
                field,
                value,
                line: Some(line),
            },
            other => other,
        }
    }
}

fn line_suffix(line: &Option<u64>) -> String {
    line.map(|line| format!(" at line {line}")).unwrap_or_default()
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            Self::Io(std::io::Error::other(err))
        } else {
            Self::Row(err.to_string())
        }
    }
}

impl From<quick_xml::DeError> for Error {
    fn from(err: quick_xml::DeError) -> Self {
        Self::TranslationSource(err.to_string())
    }
}

/// Result helper type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_categories() {
        let field = Error::Field {
            field: "date",
            value: "2015-13-01".to_string(),
            line: Some(2),
        };
        assert_eq!(field.kind(), ErrorKind::Parse);
        assert_eq!(Error::Row("x".into()).kind(), ErrorKind::Parse);

        let translation = Error::Translation {
            asset: "A1".into(),
            code: "v9".into(),
        };
        assert_eq!(translation.kind(), ErrorKind::Translation);

        let io = Error::from(std::io::Error::other("disk full"));
        assert_eq!(io.kind(), ErrorKind::Io);
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_field_error_message() {
        let err = Error::Field {
            field: "time",
            value: "25:99".to_string(),
            line: None,
        };
        assert_eq!(err.to_string(), "malformed time `25:99`");
        assert_eq!(err.at_line(7).to_string(), "malformed time `25:99` at line 7");
    }
}
