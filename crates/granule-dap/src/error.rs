pub type Result<T> = std::result::Result<T, DapError>;

/// Errors produced while reading a metadata document back into a [`crate::Dataset`].
#[derive(Debug, thiserror::Error)]
pub enum DapError {
    #[error("malformed xml: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("expected root element <Dataset>, found <{found}>")]
    UnexpectedRoot { found: String },

    #[error("<{element}> is missing required attribute `{attribute}`")]
    MissingAttribute {
        element: String,
        attribute: &'static str,
    },

    #[error("unknown data type `{name}`")]
    UnknownType { name: String },

    #[error("invalid number `{value}` in <{element}>")]
    InvalidNumber { element: String, value: String },

    #[error("variable `{variable}` references undeclared dimension `{dimension}`")]
    UnknownDimension { variable: String, dimension: String },
}
